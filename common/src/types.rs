use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{schedule::ProgramId, settings::ElapsedTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaterState {
    Idle,
    AwaitingReading,
    Heating,
    Satisfied,
    Cooldown,
    SensorStale,
}

impl HeaterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingReading => "AWAITING_READING",
            Self::Heating => "HEATING",
            Self::Satisfied => "SATISFIED",
            Self::Cooldown => "COOLDOWN",
            Self::SensorStale => "SENSOR_STALE",
        }
    }
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub room: Option<f64>,
    pub manual: bool,
    pub auto: bool,
    pub program: ProgramId,
    pub desired_temp: f64,
    pub relay_on: bool,
    pub state: &'static str,
    pub sensor_valid: bool,
    pub reading_age_ms: Option<u64>,
    pub in_cooldown: bool,
    pub cooldown_remaining_ms: u64,
    pub time_elapsed: ElapsedTime,
    pub last_day_on: NaiveDate,
}

/// One line of the daily heating log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLogEntry {
    pub date: NaiveDate,
    #[serde(alias = "time_elapsed")]
    pub time_elapsed: ElapsedTime,
}
