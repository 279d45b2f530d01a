use anyhow::Context;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use heater_common::{
    wire::{MAX_DATAGRAM, REQUEST},
    ThermometerReading,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bind = std::env::var("SENSOR_BIND").unwrap_or_else(|_| "0.0.0.0:2222".to_string());
    let base_celsius = std::env::var("SENSOR_BASE_CELSIUS")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(19.0);

    let socket = UdpSocket::bind(&bind)
        .await
        .with_context(|| format!("failed to bind thermometer responder at {bind}"))?;
    info!("thermometer responder listening on {bind}, base {base_celsius:.1} C");

    let mut tick: u64 = 0;
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!("receive failed: {err}");
                continue;
            }
        };
        if &buf[..len] != REQUEST {
            debug!("ignoring {len} byte datagram from {peer}");
            continue;
        }

        tick = tick.saturating_add(1);
        // Hardware integration point: replace with a real probe driver.
        let reading = simulated_reading(base_celsius, tick);
        let payload = reading.to_vec().context("failed to encode reading")?;

        if let Err(err) = socket.send_to(&payload, peer).await {
            warn!("reply to {peer} failed: {err}");
        }
    }
}

/// Slow sawtooth around `base` so the controller sees movement.
fn simulated_reading(base: f64, tick: u64) -> ThermometerReading {
    ThermometerReading {
        celsius: base + (tick % 8) as f64 * 0.2,
    }
}
