use crate::{
    schedule::{ProgramId, ScheduleCell},
    settings::{Intervals, ModeSettings, Settings},
    types::{ControllerStatus, HeaterState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum time between two applied relay changes.
    pub stop_time_ms: u64,
    /// Age after which a reading no longer counts; zero disables the check.
    pub sensor_stale_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_intervals(&Intervals::default())
    }
}

impl EngineConfig {
    pub fn from_intervals(intervals: &Intervals) -> Self {
        Self {
            stop_time_ms: intervals.stop_time().as_millis() as u64,
            sensor_stale_ms: intervals.sensor_stale().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineAction {
    Keep,
    SwitchOn,
    SwitchOff,
    /// The target differs from the relay but the cool-down is still running.
    Hold { remaining_ms: u64 },
}

impl EngineAction {
    pub fn target(self) -> Option<bool> {
        match self {
            Self::SwitchOn => Some(true),
            Self::SwitchOff => Some(false),
            Self::Keep | Self::Hold { .. } => None,
        }
    }
}

/// Whether the heater should run, before debounce.
///
/// Manual wins over auto. In auto mode a `Flag(true)` cell heats below
/// `desiredTemp` and an `Override(v)` cell heats below `v`. A missing cell
/// means off.
pub fn heat_wanted(mode: &ModeSettings, room: f64, cell: Option<ScheduleCell>) -> bool {
    if mode.manual {
        return room < mode.desired_temp;
    }
    if !mode.auto {
        return false;
    }
    match cell {
        Some(ScheduleCell::Flag(true)) => room < mode.desired_temp,
        Some(ScheduleCell::Override(threshold)) => room < threshold,
        Some(ScheduleCell::Flag(false)) | None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ModeKey {
    manual: bool,
    auto: bool,
    program: ProgramId,
    desired_temp: f64,
}

impl From<&ModeSettings> for ModeKey {
    fn from(mode: &ModeSettings) -> Self {
        Self {
            manual: mode.manual,
            auto: mode.auto,
            program: mode.program,
            desired_temp: mode.desired_temp,
        }
    }
}

/// Relay decision with debounce. Time is a caller-supplied monotonic
/// millisecond counter.
#[derive(Debug, Clone)]
pub struct HeaterEngine {
    config: EngineConfig,
    state: HeaterState,
    relay_on: bool,

    room: Option<f64>,
    last_reading_ms: Option<u64>,
    last_change_ms: Option<u64>,
    last_mode: Option<ModeKey>,
}

impl HeaterEngine {
    pub fn new(config: EngineConfig, relay_on: bool) -> Self {
        Self {
            config,
            state: HeaterState::Idle,
            relay_on,
            room: None,
            last_reading_ms: None,
            last_change_ms: None,
            last_mode: None,
        }
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn state(&self) -> HeaterState {
        self.state
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    pub fn room(&self) -> Option<f64> {
        self.room
    }

    pub fn update_reading(&mut self, celsius: f64, now_ms: u64) {
        self.room = Some(celsius);
        self.last_reading_ms = Some(now_ms);
    }

    pub fn reading_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_reading_ms
            .map(|last| now_ms.saturating_sub(last))
    }

    pub fn is_reading_stale(&self, now_ms: u64) -> bool {
        if self.config.sensor_stale_ms == 0 {
            return false;
        }
        self.reading_age_ms(now_ms)
            .map(|age| age >= self.config.sensor_stale_ms)
            .unwrap_or(false)
    }

    pub fn is_in_cooldown(&self, now_ms: u64) -> bool {
        self.cooldown_remaining_ms(now_ms) > 0
    }

    pub fn cooldown_remaining_ms(&self, now_ms: u64) -> u64 {
        let Some(last) = self.last_change_ms else {
            return 0;
        };
        let elapsed = now_ms.saturating_sub(last);
        self.config.stop_time_ms.saturating_sub(elapsed)
    }

    pub fn tick(
        &mut self,
        mode: &ModeSettings,
        cell: Option<ScheduleCell>,
        now_ms: u64,
    ) -> EngineAction {
        self.observe_mode(mode);

        let Some(room) = self.room else {
            self.state = HeaterState::AwaitingReading;
            return EngineAction::Keep;
        };

        if self.is_reading_stale(now_ms) {
            self.state = HeaterState::SensorStale;
            return if self.relay_on {
                self.switch(false, now_ms)
            } else {
                EngineAction::Keep
            };
        }

        let wanted = heat_wanted(mode, room, cell);
        if wanted == self.relay_on {
            self.state = if self.relay_on {
                HeaterState::Heating
            } else if mode.manual || mode.auto {
                HeaterState::Satisfied
            } else {
                HeaterState::Idle
            };
            return EngineAction::Keep;
        }

        let remaining_ms = self.cooldown_remaining_ms(now_ms);
        if remaining_ms > 0 {
            self.state = HeaterState::Cooldown;
            return EngineAction::Hold { remaining_ms };
        }

        self.switch(wanted, now_ms)
    }

    pub fn status(&self, settings: &Settings, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            room: self.room,
            manual: settings.mode.manual,
            auto: settings.mode.auto,
            program: settings.mode.program,
            desired_temp: settings.mode.desired_temp,
            relay_on: self.relay_on,
            state: self.state.as_str(),
            sensor_valid: self.room.is_some() && !self.is_reading_stale(now_ms),
            reading_age_ms: self.reading_age_ms(now_ms),
            in_cooldown: self.is_in_cooldown(now_ms),
            cooldown_remaining_ms: self.cooldown_remaining_ms(now_ms),
            time_elapsed: settings.log.time_elapsed,
            last_day_on: settings.log.last_day_on,
        }
    }

    // Mode, program or threshold edits cancel a running cool-down.
    fn observe_mode(&mut self, mode: &ModeSettings) {
        let key = ModeKey::from(mode);
        if self.last_mode.as_ref() != Some(&key) {
            self.last_change_ms = None;
            self.last_mode = Some(key);
        }
    }

    fn switch(&mut self, on: bool, now_ms: u64) -> EngineAction {
        self.relay_on = on;
        self.last_change_ms = Some(now_ms);
        if on {
            self.state = HeaterState::Heating;
            EngineAction::SwitchOn
        } else {
            if self.state != HeaterState::SensorStale {
                self.state = HeaterState::Satisfied;
            }
            EngineAction::SwitchOff
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000;

    fn mode(manual: bool, auto: bool, desired_temp: f64) -> ModeSettings {
        ModeSettings {
            manual,
            auto,
            program: ProgramId::new(0),
            desired_temp,
        }
    }

    fn engine() -> HeaterEngine {
        HeaterEngine::new(
            EngineConfig {
                stop_time_ms: 170 * SEC,
                sensor_stale_ms: 600 * SEC,
            },
            false,
        )
    }

    #[test]
    fn manual_takes_precedence_over_schedule() {
        let both = mode(true, true, 20.0);

        assert!(heat_wanted(&both, 10.0, Some(ScheduleCell::Flag(false))));
        assert!(heat_wanted(&both, 10.0, Some(ScheduleCell::Override(5.0))));
        assert!(heat_wanted(&both, 10.0, None));
        assert!(!heat_wanted(&both, 20.0, Some(ScheduleCell::Flag(true))));
    }

    #[test]
    fn override_cell_ignores_desired_temp() {
        let auto = mode(false, true, 25.0);
        let cell = Some(ScheduleCell::Override(18.0));

        assert!(!heat_wanted(&auto, 19.0, cell));
        assert!(!heat_wanted(&auto, 18.0, cell));
        assert!(heat_wanted(&auto, 17.0, cell));
    }

    #[test]
    fn auto_mode_follows_flag_cells() {
        let auto = mode(false, true, 20.0);

        assert!(heat_wanted(&auto, 19.0, Some(ScheduleCell::Flag(true))));
        assert!(!heat_wanted(&auto, 19.0, Some(ScheduleCell::Flag(false))));
        assert!(!heat_wanted(&auto, 19.0, None));
        assert!(!heat_wanted(&mode(false, false, 20.0), 5.0, None));
    }

    #[test]
    fn waits_for_first_reading() {
        let mut engine = engine();

        assert_eq!(engine.tick(&mode(true, false, 20.0), None, 0), EngineAction::Keep);
        assert_eq!(engine.state(), HeaterState::AwaitingReading);
        assert!(!engine.relay_on());
    }

    #[test]
    fn first_switch_is_immediate() {
        let mut engine = engine();
        engine.update_reading(15.0, 0);

        assert_eq!(engine.tick(&mode(true, false, 20.0), None, 0), EngineAction::SwitchOn);
        assert!(engine.relay_on());
        assert_eq!(engine.state(), HeaterState::Heating);
    }

    #[test]
    fn cooldown_holds_relay_until_stop_time() {
        let manual = mode(true, false, 20.0);
        let mut engine = engine();
        let t = 1_000 * SEC;

        engine.update_reading(15.0, t);
        assert_eq!(engine.tick(&manual, None, t), EngineAction::SwitchOn);

        engine.update_reading(22.0, t + 30 * SEC);
        assert_eq!(
            engine.tick(&manual, None, t + 30 * SEC),
            EngineAction::Hold {
                remaining_ms: 140 * SEC
            }
        );
        assert!(engine.relay_on());
        assert_eq!(engine.state(), HeaterState::Cooldown);

        assert!(matches!(
            engine.tick(&manual, None, t + 169 * SEC),
            EngineAction::Hold { .. }
        ));
        assert_eq!(engine.tick(&manual, None, t + 170 * SEC), EngineAction::SwitchOff);
        assert!(!engine.relay_on());
    }

    #[test]
    fn mode_change_cancels_cooldown() {
        let mut engine = engine();
        let t = 1_000 * SEC;

        engine.update_reading(15.0, t);
        assert_eq!(engine.tick(&mode(true, false, 20.0), None, t), EngineAction::SwitchOn);

        // Lowering the threshold below the room temperature takes effect at once.
        let lowered = mode(true, false, 14.0);
        assert_eq!(engine.tick(&lowered, None, t + 30 * SEC), EngineAction::SwitchOff);
        assert_eq!(engine.cooldown_remaining_ms(t + 30 * SEC), 170 * SEC);
    }

    #[test]
    fn program_change_cancels_cooldown() {
        let mut engine = engine();
        let t = 1_000 * SEC;
        let mut auto = mode(false, true, 20.0);

        engine.update_reading(15.0, t);
        assert_eq!(
            engine.tick(&auto, Some(ScheduleCell::Flag(true)), t),
            EngineAction::SwitchOn
        );

        auto.program = ProgramId::new(1);
        assert_eq!(
            engine.tick(&auto, Some(ScheduleCell::Flag(false)), t + SEC),
            EngineAction::SwitchOff
        );
    }

    #[test]
    fn stale_reading_forces_off_inside_cooldown() {
        let manual = mode(true, false, 20.0);
        let mut engine = HeaterEngine::new(
            EngineConfig {
                stop_time_ms: 900 * SEC,
                sensor_stale_ms: 600 * SEC,
            },
            false,
        );

        engine.update_reading(15.0, 0);
        assert_eq!(engine.tick(&manual, None, 0), EngineAction::SwitchOn);
        assert_eq!(engine.tick(&manual, None, 599 * SEC), EngineAction::Keep);

        assert!(engine.is_in_cooldown(600 * SEC));
        assert_eq!(engine.tick(&manual, None, 600 * SEC), EngineAction::SwitchOff);
        assert_eq!(engine.state(), HeaterState::SensorStale);

        // Stays off while the reading stays old.
        assert_eq!(engine.tick(&manual, None, 2_000 * SEC), EngineAction::Keep);
        assert!(!engine.relay_on());
    }

    #[test]
    fn zero_stale_window_disables_check() {
        let mut engine = HeaterEngine::new(
            EngineConfig {
                stop_time_ms: 0,
                sensor_stale_ms: 0,
            },
            false,
        );

        engine.update_reading(15.0, 0);
        assert!(!engine.is_reading_stale(u64::MAX));
        assert_eq!(
            engine.tick(&mode(true, false, 20.0), None, 86_400 * SEC),
            EngineAction::SwitchOn
        );
    }

    #[test]
    fn reused_reading_does_not_toggle() {
        let manual = mode(true, false, 20.0);
        let mut engine = engine();

        engine.update_reading(15.0, 0);
        assert_eq!(engine.tick(&manual, None, 0), EngineAction::SwitchOn);

        // No fresh reading for several ticks.
        for second in 1..=300 {
            assert_eq!(engine.tick(&manual, None, second * SEC), EngineAction::Keep);
        }
        assert!(engine.relay_on());
    }

    #[test]
    fn status_reflects_engine_and_settings() {
        let mut settings = Settings::template();
        settings.mode.manual = true;
        settings.mode.desired_temp = 20.0;

        let mut engine = engine();
        engine.update_reading(15.0, 0);
        let _ = engine.tick(&settings.mode, None, 0);
        let status = engine.status(&settings, 10 * SEC);

        assert_eq!(status.room, Some(15.0));
        assert!(status.relay_on);
        assert_eq!(status.state, "HEATING");
        assert!(status.sensor_valid);
        assert_eq!(status.reading_age_ms, Some(10 * SEC));
        assert_eq!(status.cooldown_remaining_ms, 160 * SEC);
    }
}
