use std::{future::Future, time::Duration};

use tokio::net::UdpSocket;
use tracing::debug;

use heater_common::{
    wire::{MAX_DATAGRAM, REQUEST},
    HeaterError, Result, Settings, ThermometerReading,
};

/// Source of room temperature readings.
pub trait Thermometer: Send + Sync {
    fn read_celsius(&self) -> impl Future<Output = Result<f64>> + Send;

    /// Picks up changed `configs`/`intervals` values between ticks.
    fn reconfigure(&mut self, _settings: &Settings) {}
}

/// Remote thermometer answering `temps_req` datagrams.
#[derive(Debug, Clone, PartialEq)]
pub struct UdpThermometer {
    address: String,
    attempts: u8,
    timeout: Duration,
}

impl UdpThermometer {
    pub fn new(address: impl Into<String>, attempts: u8, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            attempts: attempts.max(1),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.configs.address(),
            settings.configs.attempts(),
            settings.intervals.thermometer_timeout(),
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    // A fresh socket per attempt so a late answer to an earlier attempt is
    // never taken for this one.
    async fn request_once(&self) -> Result<f64> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|err| HeaterError::Thermometer(format!("bind failed: {err}")))?;
        socket
            .send_to(REQUEST, self.address.as_str())
            .await
            .map_err(|err| HeaterError::Thermometer(format!("send to {} failed: {err}", self.address)))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| HeaterError::ThermometerTimeout {
                after: self.timeout,
            })?
            .map_err(|err| HeaterError::Thermometer(format!("receive failed: {err}")))?;

        ThermometerReading::from_slice(&buf[..len]).map(|reading| reading.celsius)
    }
}

impl Thermometer for UdpThermometer {
    async fn read_celsius(&self) -> Result<f64> {
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match self.request_once().await {
                Ok(celsius) => return Ok(celsius),
                Err(err) => {
                    debug!(attempt, "thermometer attempt failed: {err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(HeaterError::ThermometerTimeout {
            after: self.timeout,
        }))
    }

    fn reconfigure(&mut self, settings: &Settings) {
        let updated = Self::from_settings(settings);
        if updated != *self {
            debug!("thermometer now {} ({} attempts)", updated.address, updated.attempts);
            *self = updated;
        }
    }
}
