use std::{sync::OnceLock, time::Instant};

use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use heater_common::{
    settings::never_on, ControllerStatus, DailyLogEntry, ElapsedTime, EngineAction, EngineConfig,
    HeaterEngine, PartialSettings, Result, Settings,
};

use crate::{
    gpio::OutputPin,
    logging::LogLevel,
    relay::RelayActuator,
    store::{DailyLog, ProgramStore, SettingsStore},
    thermometer::Thermometer,
};

/// Everything the loop drives.
pub struct Collaborators<T, P: OutputPin> {
    pub settings: SettingsStore,
    pub programs: ProgramStore,
    pub daily_log: DailyLog,
    pub thermometer: T,
    pub relay: RelayActuator<P>,
    pub log_level: LogLevel,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub action: EngineAction,
    /// Set when this tick obtained a fresh reading.
    pub reading: Option<f64>,
    pub rolled_over: bool,
    pub relay_on: bool,
}

pub struct ControlLoop<T, P: OutputPin> {
    store: SettingsStore,
    programs: ProgramStore,
    daily_log: DailyLog,
    thermometer: T,
    relay: RelayActuator<P>,
    log_level: LogLevel,
    engine: HeaterEngine,
    status: watch::Sender<ControllerStatus>,

    settings: Settings,
    elapsed: ElapsedTime,
    last_day_on: NaiveDate,
    last_tick_ms: Option<u64>,
    carry_ms: u64,
}

impl<T: Thermometer, P: OutputPin> ControlLoop<T, P> {
    /// `initial` is the settings document as loaded at startup. A room
    /// reading it carries counts as taken at `now_ms`.
    pub fn new(parts: Collaborators<T, P>, initial: Settings, now_ms: u64) -> Self {
        let mut engine = HeaterEngine::new(
            EngineConfig::from_intervals(&initial.intervals),
            parts.relay.is_on(),
        );
        if let Some(room) = initial.temperatures.room.filter(|room| room.is_finite()) {
            engine.update_reading(room, now_ms);
        }
        let (status, _) = watch::channel(engine.status(&initial, now_ms));

        Self {
            store: parts.settings,
            programs: parts.programs,
            daily_log: parts.daily_log,
            thermometer: parts.thermometer,
            relay: parts.relay,
            log_level: parts.log_level,
            engine,
            status,
            elapsed: initial.log.time_elapsed,
            last_day_on: initial.log.last_day_on,
            settings: initial,
            last_tick_ms: None,
            carry_ms: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    /// Runs ticks until one fails. Only actuator faults end the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "control loop started, interval {:?}",
            self.settings.intervals.tick()
        );
        loop {
            let started = Instant::now();
            self.tick_at(Local::now().naive_local(), monotonic_ms())
                .await?;

            let interval = self.settings.intervals.tick();
            tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
        }
    }

    /// One control step at wall-clock `now` and monotonic `now_ms`.
    pub async fn tick_at(&mut self, now: NaiveDateTime, now_ms: u64) -> Result<TickReport> {
        let settings = match self.store.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("settings unavailable, reusing last good copy: {err}");
                self.settings.clone()
            }
        };
        self.log_level.apply(&settings.log.loglevel);
        self.engine
            .set_config(EngineConfig::from_intervals(&settings.intervals));
        self.thermometer.reconfigure(&settings);

        let rolled_over = self.roll_over(now.date()).await;

        let program_id = settings.mode.program;
        let wants_program = settings.mode.auto && !settings.mode.manual;
        let programs = &self.programs;
        let (reading, program) = tokio::join!(self.thermometer.read_celsius(), async move {
            if wants_program {
                Some(programs.load(program_id).await)
            } else {
                None
            }
        });

        let reading = match reading {
            Ok(celsius) => {
                self.engine.update_reading(celsius, now_ms);
                Some(celsius)
            }
            Err(err) => {
                warn!("no fresh temperature this tick: {err}");
                None
            }
        };

        let cell = match program {
            Some(Ok(schedule)) => Some(schedule.value_for(&now)),
            Some(Err(err)) => {
                error!("program {program_id} unavailable, heating off: {err}");
                None
            }
            None => None,
        };

        self.accumulate(now_ms);

        let action = self.engine.tick(&settings.mode, cell, now_ms);
        match action {
            EngineAction::SwitchOn => {
                self.relay.on().await?;
            }
            EngineAction::SwitchOff => {
                self.relay.off().await?;
            }
            EngineAction::Hold { remaining_ms } => {
                debug!("relay change held for {remaining_ms} ms");
            }
            EngineAction::Keep => {}
        }

        let changes =
            PartialSettings::bookkeeping(self.elapsed, self.last_day_on, self.engine.room());
        self.settings = match self.store.apply(&changes).await {
            Ok(applied) => applied,
            Err(err) => {
                warn!("failed to persist tick state, retrying next tick: {err}");
                settings.merged(&changes)
            }
        };

        self.status
            .send_replace(self.engine.status(&self.settings, now_ms));

        Ok(TickReport {
            action,
            reading,
            rolled_over,
            relay_on: self.relay.is_on(),
        })
    }

    /// Turns the relay off and releases it.
    pub async fn shutdown(self) -> Result<()> {
        let mut relay = self.relay;
        let off = relay.off().await.map(|_| ());
        let cleaned = relay.clean().await;
        info!("heater stopped");
        off.and(cleaned)
    }

    async fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.last_day_on {
            return false;
        }

        if self.last_day_on != never_on() {
            let entry = DailyLogEntry {
                date: self.last_day_on,
                time_elapsed: self.elapsed,
            };
            if let Err(err) = self.daily_log.append(entry).await {
                warn!("day rollover postponed: {err}");
                return false;
            }
            info!(
                "logged {} of heating for {}",
                self.elapsed, self.last_day_on
            );
        }

        self.elapsed = ElapsedTime::ZERO;
        self.last_day_on = today;
        true
    }

    // Credits the time since the previous tick if the relay was on for it.
    fn accumulate(&mut self, now_ms: u64) {
        if let Some(previous) = self.last_tick_ms {
            if self.relay.is_on() {
                let total = self.carry_ms + now_ms.saturating_sub(previous);
                self.elapsed = self.elapsed.saturating_add_secs(total / 1_000);
                self.carry_ms = total % 1_000;
            }
        }
        self.last_tick_ms = Some(now_ms);
    }
}

/// Milliseconds since the first call.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
