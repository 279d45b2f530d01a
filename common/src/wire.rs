//! Thermometer datagram contract.

use serde::{Deserialize, Serialize};

use crate::error::{HeaterError, Result};

/// Request datagram understood by the thermometer.
pub const REQUEST: &[u8] = b"temps_req";

/// Largest response we expect to receive.
pub const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermometerReading {
    pub celsius: f64,
}

impl ThermometerReading {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let reading: Self = serde_json::from_slice(payload)
            .map_err(|err| HeaterError::Thermometer(format!("malformed response: {err}")))?;
        if !reading.celsius.is_finite() {
            return Err(HeaterError::Thermometer(format!(
                "reading {} is not a finite number",
                reading.celsius
            )));
        }
        Ok(reading)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| HeaterError::Thermometer(format!("cannot encode reading: {err}")))
    }
}
