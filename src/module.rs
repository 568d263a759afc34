//! Apparatus modules.
//!
//! A [`Module`] is one controllable physical device together with the state
//! its board driver last verified. [`ModuleId`] names the six devices of the
//! apparatus and which board powers each of them.

use crate::config::ModuleSettings;
use crate::core::{PowerControllable, PowerState};
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Board-specific address of a module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// Isolated switch output on the switch board (`OUT <letter> <0|1>`).
    Switch(char),
    /// Rain monitor enable on the switch board (`RMON <0|1>`).
    RainMonitor,
    /// Numbered mains outlet on the outlet box.
    Outlet(u8),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Switch(letter) => write!(f, "switch {}", letter),
            Address::RainMonitor => f.write_str("rain monitor enable"),
            Address::Outlet(n) => write!(f, "outlet {}", n),
        }
    }
}

/// Which control board powers a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Board {
    /// Digital switch and sensor board.
    SwitchBoard,
    /// Relay outlet box.
    OutletBox,
}

/// The devices making up the apparatus, in power-on order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    /// Rain sensor.
    RainMonitor,
    /// Window heater.
    Heater,
    /// Mains inverter.
    Inverter,
    /// Laser energy radiometer.
    Radiometer,
    /// Optical shutter.
    Shutter,
    /// Laser.
    Laser,
}

impl ModuleId {
    /// Display name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            ModuleId::RainMonitor => "rain monitor",
            ModuleId::Heater => "window heater",
            ModuleId::Inverter => "power inverter",
            ModuleId::Radiometer => "radiometer",
            ModuleId::Shutter => "shutter",
            ModuleId::Laser => "laser",
        }
    }

    /// Board that switches this module.
    pub fn board(self) -> Board {
        match self {
            ModuleId::RainMonitor | ModuleId::Heater | ModuleId::Inverter => Board::SwitchBoard,
            ModuleId::Radiometer | ModuleId::Shutter | ModuleId::Laser => Board::OutletBox,
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One controllable device and its verified state.
#[derive(Clone, Debug)]
pub struct Module {
    name: String,
    address: Address,
    power_state: PowerState,
    stabilize_on_delay: Duration,
    stabilize_off_delay: Duration,
    last_raw_response: String,
}

impl Module {
    /// Creates a module in the `Unknown` power state.
    pub fn new(
        name: impl Into<String>,
        address: Address,
        stabilize_on_delay: Duration,
        stabilize_off_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            power_state: PowerState::Unknown,
            stabilize_on_delay,
            stabilize_off_delay,
            last_raw_response: String::new(),
        }
    }

    /// Builds the module for `id` from its configured address and delays.
    pub fn from_settings(id: ModuleId, settings: &ModuleSettings) -> AppResult<Self> {
        let (address, timing) = settings.address_of(id)?;
        Ok(Self::new(
            id.name(),
            address,
            timing.stabilize_on,
            timing.stabilize_off,
        ))
    }

    /// Last acknowledgement text received for this module.
    pub fn last_raw_response(&self) -> &str {
        &self.last_raw_response
    }
}

impl PowerControllable for Module {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn stabilize_on(&self) -> Duration {
        self.stabilize_on_delay
    }

    fn stabilize_off(&self) -> Duration {
        self.stabilize_off_delay
    }

    fn power_state(&self) -> PowerState {
        self.power_state
    }

    fn record_outcome(&mut self, state: PowerState, raw: String) {
        self.power_state = state;
        self.last_raw_response = raw;
    }
}
