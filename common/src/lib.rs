pub mod engine;
pub mod error;
pub mod schedule;
pub mod settings;
pub mod types;
pub mod wire;

pub use engine::{heat_wanted, EngineAction, EngineConfig, HeaterEngine};
pub use error::{HeaterError, Result};
pub use schedule::{DayOfWeek, HourInput, NewProgram, ProgramBook, ProgramId, ProgramSchedule, ScheduleCell};
pub use settings::{ElapsedTime, PartialSettings, Settings};
pub use types::{ControllerStatus, DailyLogEntry, HeaterState};
pub use wire::ThermometerReading;
