use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::schedule::ProgramId;

pub type Result<T, E = HeaterError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HeaterError {
    #[error("settings document {path} is corrupt: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("failed to read settings document {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings document {path}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("program {0} does not exist")]
    ProgramNotFound(ProgramId),

    #[error("invalid schedule input: {0}")]
    InvalidScheduleInput(String),

    #[error("program document {path}: {reason}")]
    ProgramStore { path: PathBuf, reason: String },

    #[error("daily log {path}: {reason}")]
    DailyLog { path: PathBuf, reason: String },

    #[error("thermometer did not answer within {after:?}")]
    ThermometerTimeout { after: Duration },

    #[error("thermometer request failed: {0}")]
    Thermometer(String),

    #[error("relay on channel {channel} faulted: {reason}")]
    ActuatorFault { channel: u8, reason: String },
}

impl HeaterError {
    /// Errors after which the daemon must not keep driving the relay.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigCorrupt { .. } | Self::ConfigRead { .. } | Self::ActuatorFault { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ThermometerTimeout { .. })
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidScheduleInput(message.into())
    }
}
