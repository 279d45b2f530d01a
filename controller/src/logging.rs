use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Handle for changing the level named in `log.loglevel` at runtime.
pub struct LogLevel {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    pinned: bool,
    current: String,
}

/// Installs the global subscriber. `RUST_LOG`, when set, wins over `level`
/// for the life of the process.
pub fn init(level: &str) -> LogLevel {
    let pinned = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter = if pinned {
        EnvFilter::from_default_env()
    } else {
        filter_for(level)
    };
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    if !pinned && directive_for(level).is_none() {
        warn!("unknown log level `{level}`, using info");
    }

    LogLevel {
        handle: Some(handle),
        pinned,
        current: level.to_string(),
    }
}

impl LogLevel {
    /// A handle that only remembers the level, for loops run without a
    /// subscriber of their own.
    pub fn detached(level: &str) -> Self {
        Self {
            handle: None,
            pinned: false,
            current: level.to_string(),
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn apply(&mut self, level: &str) {
        if self.current == level {
            return;
        }
        self.current = level.to_string();
        if self.pinned {
            return;
        }
        let Some(handle) = &self.handle else {
            return;
        };
        if directive_for(level).is_none() {
            warn!("unknown log level `{level}`, using info");
        }
        match handle.reload(filter_for(level)) {
            Ok(()) => info!("log level set to {level}"),
            Err(err) => warn!("failed to change log level to {level}: {err}"),
        }
    }
}

/// Maps the level names stored in settings onto `tracing` levels.
pub fn directive_for(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" | "FATAL" => Some("error"),
        "OFF" => Some("off"),
        _ => None,
    }
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::new(directive_for(level).unwrap_or("info"))
}
