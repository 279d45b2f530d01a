use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use heater_common::{settings::RelaySettings, HeaterError, Result};

/// A single digital output.
pub trait OutputPin: Send {
    fn channel(&self) -> u8;

    fn set_level(&mut self, high: bool) -> Result<()>;

    /// Returns the pin to the system. Further writes fail.
    fn release(&mut self) -> Result<()>;
}

/// Pin level that puts the relay in the `on` state.
pub fn level_for(on: bool, active_low: bool) -> bool {
    on != active_low
}

#[cfg(feature = "rpi")]
pub type DefaultPin = RpiPin;
#[cfg(not(feature = "rpi"))]
pub type DefaultPin = SimulatedPin;

/// Opens the configured relay pin already driven to the OFF level.
pub fn open(relay: &RelaySettings) -> Result<DefaultPin> {
    let off_level = level_for(false, relay.active_low);

    #[cfg(feature = "rpi")]
    let pin = RpiPin::open(relay.channel, off_level)?;
    #[cfg(not(feature = "rpi"))]
    let pin = {
        info!("using simulated relay pin on channel {}", relay.channel);
        let (mut pin, _) = SimulatedPin::new(relay.channel);
        pin.set_level(off_level)?;
        pin
    };

    Ok(pin)
}

fn fault(channel: u8, reason: impl ToString) -> HeaterError {
    HeaterError::ActuatorFault {
        channel,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Default)]
struct PinTrace {
    level: Option<bool>,
    writes: Vec<bool>,
    released: bool,
    fail_writes: bool,
}

/// In-memory pin for development machines and tests.
#[derive(Debug)]
pub struct SimulatedPin {
    channel: u8,
    trace: Arc<Mutex<PinTrace>>,
}

/// Observer for a `SimulatedPin` that stays usable after the pin moves.
#[derive(Debug, Clone)]
pub struct PinProbe {
    trace: Arc<Mutex<PinTrace>>,
}

impl SimulatedPin {
    pub fn new(channel: u8) -> (Self, PinProbe) {
        let trace = Arc::new(Mutex::new(PinTrace::default()));
        (
            Self {
                channel,
                trace: trace.clone(),
            },
            PinProbe { trace },
        )
    }
}

impl OutputPin for SimulatedPin {
    fn channel(&self) -> u8 {
        self.channel
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if trace.released {
            return Err(fault(self.channel, "pin already released"));
        }
        if trace.fail_writes {
            return Err(fault(self.channel, "simulated write failure"));
        }
        trace.level = Some(high);
        trace.writes.push(high);
        debug!(channel = self.channel, high, "simulated pin write");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        trace.released = true;
        Ok(())
    }
}

impl PinProbe {
    pub fn level(&self) -> Option<bool> {
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).level
    }

    pub fn writes(&self) -> Vec<bool> {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .writes
            .clone()
    }

    pub fn released(&self) -> bool {
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).released
    }

    pub fn fail_writes(&self, fail: bool) {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_writes = fail;
    }

    pub fn clear_writes(&self) {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .writes
            .clear();
    }
}

/// Raspberry Pi output over `rppal`, BCM numbering.
#[cfg(feature = "rpi")]
pub struct RpiPin {
    channel: u8,
    pin: Option<rppal::gpio::OutputPin>,
}

#[cfg(feature = "rpi")]
impl RpiPin {
    pub fn open(channel: u8, initial_high: bool) -> Result<Self> {
        use rppal::gpio::Gpio;

        let gpio = Gpio::new().map_err(|err| fault(channel, err))?;
        let pin = gpio.get(channel).map_err(|err| fault(channel, err))?;
        let mut pin = if initial_high {
            pin.into_output_high()
        } else {
            pin.into_output_low()
        };
        // Dropping the pin, including during a panic, returns it to input.
        pin.set_reset_on_drop(true);
        info!("relay pin {channel} opened");

        Ok(Self {
            channel,
            pin: Some(pin),
        })
    }
}

#[cfg(feature = "rpi")]
impl OutputPin for RpiPin {
    fn channel(&self) -> u8 {
        self.channel
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        let pin = self
            .pin
            .as_mut()
            .ok_or_else(|| fault(self.channel, "pin already released"))?;
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.pin.take().is_some() {
            info!("relay pin {} released", self.channel);
        }
        Ok(())
    }
}
