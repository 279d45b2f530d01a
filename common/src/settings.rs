use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::ProgramId;

pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Date the template carries before the heater has ever run.
pub fn never_on() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Root settings document.
///
/// `mode`, `temperatures`, `log` and `relay` must be present in a stored
/// document; the other sections fall back to the template when absent.
/// Fields missing inside any section fall back to the template as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub mode: ModeSettings,
    pub temperatures: Temperatures,
    pub log: LogSettings,
    #[serde(default)]
    pub configs: ThermometerConfig,
    #[serde(default)]
    pub intervals: Intervals,
    pub relay: RelaySettings,
    #[serde(default)]
    pub paths: Paths,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeSettings {
    pub manual: bool,
    pub auto: bool,
    pub program: ProgramId,
    #[serde(alias = "desired_temp")]
    pub desired_temp: f64,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            manual: false,
            auto: false,
            program: ProgramId::default(),
            desired_temp: 19.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Temperatures {
    pub room: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogSettings {
    pub loglevel: String,
    #[serde(alias = "last_day_on")]
    pub last_day_on: NaiveDate,
    #[serde(alias = "time_elapsed")]
    pub time_elapsed: ElapsedTime,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            loglevel: DEFAULT_LOG_LEVEL.to_string(),
            last_day_on: never_on(),
            time_elapsed: ElapsedTime::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThermometerConfig {
    #[serde(alias = "UDP_IP")]
    pub udp_ip: String,
    #[serde(alias = "UDP_port")]
    pub udp_port: u16,
    pub attempts: u8,
}

impl Default for ThermometerConfig {
    fn default() -> Self {
        Self {
            udp_ip: "127.0.0.1".to_string(),
            udp_port: 2222,
            attempts: 2,
        }
    }
}

impl ThermometerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.udp_ip, self.udp_port)
    }

    pub fn attempts(&self) -> u8 {
        self.attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Intervals {
    /// Tick interval in seconds.
    pub settings: f64,
    /// Per-attempt thermometer timeout in seconds.
    pub temperature: f64,
    #[serde(alias = "stop_time")]
    pub stop_time: u64,
    pub sensor_stale: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            settings: 1.0,
            temperature: 0.5,
            stop_time: 170,
            sensor_stale: 600,
        }
    }
}

impl Intervals {
    pub fn tick(&self) -> Duration {
        seconds(self.settings, 0.1)
    }

    pub fn thermometer_timeout(&self) -> Duration {
        seconds(self.temperature, 0.05)
    }

    pub fn stop_time(&self) -> Duration {
        Duration::from_secs(self.stop_time)
    }

    pub fn sensor_stale(&self) -> Duration {
        Duration::from_secs(self.sensor_stale)
    }
}

fn seconds(value: f64, floor: f64) -> Duration {
    if value.is_finite() && value > floor {
        Duration::from_secs_f64(value.min(86_400.0))
    } else {
        Duration::from_secs_f64(floor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    /// BCM pin number.
    pub channel: u8,
    pub active_low: bool,
    pub state: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel: 16,
            active_low: true,
            state: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Paths {
    #[serde(alias = "daily_log")]
    pub daily_log: PathBuf,
    pub program: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            daily_log: PathBuf::from("logs/daily.json"),
            program: PathBuf::from("programs/program.json"),
        }
    }
}

impl Paths {
    /// Resolves relative entries against `base` (the settings directory).
    pub fn resolve(&self, base: &Path) -> Self {
        let join = |path: &PathBuf| {
            if path.is_absolute() {
                path.clone()
            } else {
                base.join(path)
            }
        };
        Self {
            daily_log: join(&self.daily_log),
            program: join(&self.program),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::template()
    }
}

impl Settings {
    /// Document written on first run.
    pub fn template() -> Self {
        Self {
            mode: ModeSettings::default(),
            temperatures: Temperatures::default(),
            log: LogSettings::default(),
            configs: ThermometerConfig::default(),
            intervals: Intervals::default(),
            relay: RelaySettings::default(),
            paths: Paths::default(),
        }
    }

    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    /// Canonical on-disk form: pretty JSON with a trailing newline.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut payload = serde_json::to_vec_pretty(self)?;
        payload.push(b'\n');
        Ok(payload)
    }

    /// One-level merge: absent sections and absent fields keep their
    /// current value.
    pub fn merged(&self, changes: &PartialSettings) -> Self {
        Self {
            mode: merge_section(&self.mode, changes.mode.as_ref()),
            temperatures: merge_section(&self.temperatures, changes.temperatures.as_ref()),
            log: merge_section(&self.log, changes.log.as_ref()),
            configs: merge_section(&self.configs, changes.configs.as_ref()),
            intervals: merge_section(&self.intervals, changes.intervals.as_ref()),
            relay: merge_section(&self.relay, changes.relay.as_ref()),
            paths: merge_section(&self.paths, changes.paths.as_ref()),
        }
    }
}

trait Section: Clone {
    type Partial;

    fn merge(&self, changes: &Self::Partial) -> Self;
}

fn merge_section<S: Section>(current: &S, changes: Option<&S::Partial>) -> S {
    match changes {
        Some(changes) => current.merge(changes),
        None => current.clone(),
    }
}

fn pick<T: Clone>(change: &Option<T>, current: &T) -> T {
    change.clone().unwrap_or_else(|| current.clone())
}

/// Sparse update accepted by the settings store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PartialMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperatures: Option<PartialTemperatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<PartialLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configs: Option<PartialThermometerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<PartialIntervals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<PartialRelay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<PartialPaths>,
}

impl PartialSettings {
    pub fn relay_state(on: bool) -> Self {
        Self {
            relay: Some(PartialRelay {
                state: Some(on),
                ..PartialRelay::default()
            }),
            ..Self::default()
        }
    }

    /// The per-tick update written by the control loop.
    pub fn bookkeeping(elapsed: ElapsedTime, last_day_on: NaiveDate, room: Option<f64>) -> Self {
        Self {
            log: Some(PartialLog {
                time_elapsed: Some(elapsed),
                last_day_on: Some(last_day_on),
                ..PartialLog::default()
            }),
            temperatures: room.map(|room| PartialTemperatures { room: Some(room) }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialMode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramId>,
    #[serde(alias = "desired_temp", skip_serializing_if = "Option::is_none")]
    pub desired_temp: Option<f64>,
}

impl Section for ModeSettings {
    type Partial = PartialMode;

    fn merge(&self, changes: &PartialMode) -> Self {
        Self {
            manual: pick(&changes.manual, &self.manual),
            auto: pick(&changes.auto, &self.auto),
            program: pick(&changes.program, &self.program),
            desired_temp: pick(&changes.desired_temp, &self.desired_temp),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialTemperatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<f64>,
}

impl Section for Temperatures {
    type Partial = PartialTemperatures;

    fn merge(&self, changes: &PartialTemperatures) -> Self {
        Self {
            room: changes.room.or(self.room),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    #[serde(alias = "last_day_on", skip_serializing_if = "Option::is_none")]
    pub last_day_on: Option<NaiveDate>,
    #[serde(alias = "time_elapsed", skip_serializing_if = "Option::is_none")]
    pub time_elapsed: Option<ElapsedTime>,
}

impl Section for LogSettings {
    type Partial = PartialLog;

    fn merge(&self, changes: &PartialLog) -> Self {
        Self {
            loglevel: pick(&changes.loglevel, &self.loglevel),
            last_day_on: pick(&changes.last_day_on, &self.last_day_on),
            time_elapsed: pick(&changes.time_elapsed, &self.time_elapsed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialThermometerConfig {
    #[serde(alias = "UDP_IP", skip_serializing_if = "Option::is_none")]
    pub udp_ip: Option<String>,
    #[serde(alias = "UDP_port", skip_serializing_if = "Option::is_none")]
    pub udp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u8>,
}

impl Section for ThermometerConfig {
    type Partial = PartialThermometerConfig;

    fn merge(&self, changes: &PartialThermometerConfig) -> Self {
        Self {
            udp_ip: pick(&changes.udp_ip, &self.udp_ip),
            udp_port: pick(&changes.udp_port, &self.udp_port),
            attempts: pick(&changes.attempts, &self.attempts),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialIntervals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(alias = "stop_time", skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_stale: Option<u64>,
}

impl Section for Intervals {
    type Partial = PartialIntervals;

    fn merge(&self, changes: &PartialIntervals) -> Self {
        Self {
            settings: pick(&changes.settings, &self.settings),
            temperature: pick(&changes.temperature, &self.temperature),
            stop_time: pick(&changes.stop_time, &self.stop_time),
            sensor_stale: pick(&changes.sensor_stale, &self.sensor_stale),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialRelay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_low: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
}

impl Section for RelaySettings {
    type Partial = PartialRelay;

    fn merge(&self, changes: &PartialRelay) -> Self {
        Self {
            channel: pick(&changes.channel, &self.channel),
            active_low: pick(&changes.active_low, &self.active_low),
            state: pick(&changes.state, &self.state),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialPaths {
    #[serde(alias = "daily_log", skip_serializing_if = "Option::is_none")]
    pub daily_log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
}

impl Section for Paths {
    type Partial = PartialPaths;

    fn merge(&self, changes: &PartialPaths) -> Self {
        Self {
            daily_log: pick(&changes.daily_log, &self.daily_log),
            program: pick(&changes.program, &self.program),
        }
    }
}

/// Heating time accumulated for one day, stored as `H:MM:SS`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "ElapsedRepr", into = "String")]
pub struct ElapsedTime(u64);

impl ElapsedTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for ElapsedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        write!(f, "{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
    }
}

#[derive(Debug, Error)]
#[error("invalid elapsed time `{0}`, expected H:MM:SS")]
pub struct ParseElapsedError(String);

impl FromStr for ElapsedTime {
    type Err = ParseElapsedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseElapsedError(value.to_string());
        let trimmed = value.trim();

        // Older documents carry "1 day, 2:03:04" once a counter passes 24h.
        let (days, clock) = match trimmed.split_once(", ") {
            Some((days, clock)) => {
                let days = days
                    .split_whitespace()
                    .next()
                    .and_then(|count| count.parse::<u64>().ok())
                    .ok_or_else(invalid)?;
                (days, clock)
            }
            None => (0, trimmed),
        };

        let mut parts = clock.split(':');
        let (Some(hours), Some(minutes), Some(seconds), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let hours: u64 = hours.parse().map_err(|_| invalid())?;
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
        if minutes >= 60 || seconds >= 60 {
            return Err(invalid());
        }

        days.checked_mul(86_400)
            .and_then(|total| total.checked_add(hours.checked_mul(3_600)?))
            .and_then(|total| total.checked_add(minutes * 60 + seconds))
            .map(Self)
            .ok_or_else(invalid)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ElapsedRepr {
    Seconds(u64),
    Text(String),
}

impl TryFrom<ElapsedRepr> for ElapsedTime {
    type Error = ParseElapsedError;

    fn try_from(repr: ElapsedRepr) -> Result<Self, Self::Error> {
        match repr {
            ElapsedRepr::Seconds(secs) => Ok(Self(secs)),
            ElapsedRepr::Text(text) => text.parse(),
        }
    }
}

impl From<ElapsedTime> for String {
    fn from(value: ElapsedTime) -> Self {
        value.to_string()
    }
}
