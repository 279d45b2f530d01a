use tracing::{info, warn};

use heater_common::{settings::RelaySettings, PartialSettings, Result};

use crate::{
    gpio::{level_for, OutputPin},
    store::SettingsStore,
};

/// The heater relay. Mirrors its state into `relay.state`.
pub struct RelayActuator<P: OutputPin> {
    pin: P,
    active_low: bool,
    on: bool,
    store: SettingsStore,
}

impl<P: OutputPin> RelayActuator<P> {
    /// Drives the pin OFF and records that, whatever the document said
    /// before.
    pub async fn new(mut pin: P, relay: &RelaySettings, store: SettingsStore) -> Result<Self> {
        pin.set_level(level_for(false, relay.active_low))?;
        let actuator = Self {
            pin,
            active_low: relay.active_low,
            on: false,
            store,
        };
        actuator.persist(false).await;
        info!("relay on channel {} ready", actuator.channel());
        Ok(actuator)
    }

    pub fn channel(&self) -> u8 {
        self.pin.channel()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub async fn on(&mut self) -> Result<bool> {
        self.switch(true).await
    }

    pub async fn off(&mut self) -> Result<bool> {
        self.switch(false).await
    }

    /// Leaves the relay OFF, releases the pin and records `false`.
    pub async fn clean(mut self) -> Result<()> {
        let off = self.pin.set_level(level_for(false, self.active_low));
        let released = self.pin.release();
        self.on = false;
        self.persist(false).await;
        info!("relay on channel {} cleaned", self.channel());
        off.and(released)
    }

    async fn switch(&mut self, on: bool) -> Result<bool> {
        let persisted = match self.store.load().await {
            Ok(settings) => settings.relay.state,
            Err(err) => {
                warn!("cannot read persisted relay state, using cached: {err}");
                self.on
            }
        };

        if persisted == on {
            if self.on != on {
                // Document and cache disagree; assert the level without toggling.
                self.pin.set_level(level_for(on, self.active_low))?;
                self.on = on;
            }
            return Ok(on);
        }

        self.pin.set_level(level_for(on, self.active_low))?;
        self.on = on;
        self.persist(on).await;
        info!("relay {}", if on { "ON" } else { "OFF" });
        Ok(on)
    }

    async fn persist(&self, on: bool) {
        match self.store.apply(&PartialSettings::relay_state(on)).await {
            Ok(settings) if settings.relay.state != on => {
                warn!(
                    "relay state read back as {} after writing {on}",
                    settings.relay.state
                );
            }
            Ok(_) => {}
            Err(err) => warn!("failed to persist relay state {on}: {err}"),
        }
    }
}
