use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, Signal, SignalKind},
    sync::watch,
};
use tracing::{error, info, warn};

use heater_common::{settings::DEFAULT_LOG_LEVEL, ControllerStatus};

use crate::{
    api::{self, ApiState},
    control::{monotonic_ms, Collaborators, ControlLoop},
    gpio,
    logging,
    relay::RelayActuator,
    store::{DailyLog, ProgramStore, SettingsStore},
    thermometer::UdpThermometer,
};

const DEFAULT_SETTINGS_PATH: &str = "./settings/settings.json";

pub async fn run() -> anyhow::Result<()> {
    let mut log_level = logging::init(DEFAULT_LOG_LEVEL);

    let settings_path = settings_path();
    let store = SettingsStore::new(&settings_path);
    let settings = store
        .load()
        .await
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    log_level.apply(&settings.log.loglevel);
    info!("settings loaded from {}", settings_path.display());

    let base = settings_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let paths = settings.paths.resolve(&base);
    let programs = ProgramStore::new(paths.program);
    let daily_log = DailyLog::new(paths.daily_log);

    let pin = gpio::open(&settings.relay).context("failed to open relay pin")?;
    let relay = RelayActuator::new(pin, &settings.relay, store.clone())
        .await
        .context("failed to initialise relay")?;

    let initial = store
        .load()
        .await
        .context("failed to reload settings after relay start")?;
    let thermometer = UdpThermometer::from_settings(&initial);
    info!("thermometer at {}", thermometer.address());

    let mut control = ControlLoop::new(
        Collaborators {
            settings: store.clone(),
            programs: programs.clone(),
            daily_log,
            thermometer,
            relay,
            log_level,
        },
        initial,
        monotonic_ms(),
    );
    let status = control.subscribe();

    let mut shutdown = ShutdownSignals::install().context("failed to install signal handlers")?;
    spawn_status_dump(status.clone()).context("failed to install SIGUSR1 handler")?;
    spawn_api(ApiState {
        store,
        programs,
        status,
    })
    .await;

    let outcome = tokio::select! {
        result = control.run() => result,
        name = shutdown.recv() => {
            info!("received {name}, stopping");
            Ok(())
        }
    };
    if let Err(err) = &outcome {
        error!("control loop stopped: {err}");
    }

    let cleaned = control.shutdown().await;
    outcome.context("heater stopped on a fault")?;
    cleaned.context("failed to leave the relay off")?;
    Ok(())
}

/// First CLI argument, then `HEATER_SETTINGS`, then the default location.
fn settings_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HEATER_SETTINGS").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
    hangup: Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

fn spawn_status_dump(status: watch::Receiver<ControllerStatus>) -> std::io::Result<()> {
    let mut user1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while user1.recv().await.is_some() {
            let snapshot = status.borrow().clone();
            match serde_json::to_string(&snapshot) {
                Ok(json) => info!("status: {json}"),
                Err(err) => warn!("status serialization failed: {err}"),
            }
        }
    });
    Ok(())
}

// The bridge is optional; the heater keeps running without it.
async fn spawn_api(state: ApiState) {
    let port = std::env::var("HEATER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!("http bridge disabled, cannot bind {addr}: {err}");
            return;
        }
    };

    info!("http bridge listening on http://{addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, api::router(state)).await {
            error!("http bridge stopped: {err}");
        }
    });
}
