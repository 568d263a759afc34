//! Core state types, sample records and the power capability.
//!
//! # Architecture Overview
//!
//! - [`PowerControllable`]: capability the board drivers operate on. They never
//!   see concrete device types, only an address, settle delays and a state slot.
//! - [`PowerState`], [`ConfigState`], [`RainState`], [`Phase`]: closed-set
//!   states, each owned by the entity it describes.
//! - [`EnvironmentSample`], [`EnergySample`]: immutable records handed to the
//!   sample sink.
//!
//! # Data Flow
//!
//! ```text
//! Orchestrator --set(module, On|Off)--> SwitchBoard / OutletBox --bytes--> Transport
//!      ^                                       |
//!      +------- module.power_state <-----------+  (only from a parsed response)
//! ```

use crate::module::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// States
// =============================================================================

/// Power state of a module as last verified by its board driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    /// Never verified, or the last response was ambiguous.
    #[default]
    Unknown,
    /// Verified on.
    On,
    /// Verified off.
    Off,
}

/// Direction of a power command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerRequest {
    /// Power the module on.
    On,
    /// Power the module off.
    Off,
}

impl PowerRequest {
    /// The state a successful transition produces.
    pub fn target(self) -> PowerState {
        match self {
            PowerRequest::On => PowerState::On,
            PowerRequest::Off => PowerState::Off,
        }
    }

    /// The opposite direction.
    pub fn inverse(self) -> PowerRequest {
        match self {
            PowerRequest::On => PowerRequest::Off,
            PowerRequest::Off => PowerRequest::On,
        }
    }

    /// Switch level used by the board protocols (`1` = on, `0` = off).
    pub fn level(self) -> u8 {
        match self {
            PowerRequest::On => 1,
            PowerRequest::Off => 0,
        }
    }
}

/// Configuration handshake state of a device.
///
/// `Error` is terminal: a device in this state is never retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigState {
    /// Handshake not attempted.
    #[default]
    Unknown,
    /// Handshake succeeded.
    Initialized,
    /// Device completed the final phase.
    Finalized,
    /// Handshake failed.
    Error,
}

/// Reading of the rain sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RainState {
    /// No rain.
    Dry,
    /// Rain on the sensor.
    Wet,
    /// Sensor disconnected or circuit open.
    Open,
}

impl RainState {
    /// Maps a board rain code (`D`, `W`, `X`). Anything else reads as `Open`.
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'D' => RainState::Dry,
            'W' => RainState::Wet,
            _ => RainState::Open,
        }
    }

    /// Wet and open both forbid laser operation.
    pub fn is_hazardous(self) -> bool {
        !matches!(self, RainState::Dry)
    }
}

/// Lifecycle phase of the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Bringing boards and support modules up.
    Init,
    /// Laser firing and telemetry collection.
    Run,
    /// Closing down after a complete run.
    Final,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Unknown => "unknown",
            PowerState::On => "on",
            PowerState::Off => "off",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigState::Unknown => "unknown",
            ConfigState::Initialized => "initialized",
            ConfigState::Finalized => "finalized",
            ConfigState::Error => "error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RainState::Dry => "dry",
            RainState::Wet => "wet",
            RainState::Open => "open circuit",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "Init",
            Phase::Run => "Run",
            Phase::Final => "Final",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Samples
// =============================================================================

/// One round of switch board telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSample {
    /// UTC time the last query of the round completed.
    pub timestamp: DateTime<Utc>,
    /// Pressure (kPa).
    pub pressure: f64,
    /// Temperature (K).
    pub temperature: f64,
    /// Relative humidity (%RH).
    pub humidity: f64,
    /// Board supply voltage (V).
    pub supply_voltage: f64,
}

/// Energy readings accumulated by the radiometer since dump mode began.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    /// UTC time the burst was read.
    pub timestamp: DateTime<Utc>,
    /// One value per laser shot; empty when nothing triggered.
    pub energies: Vec<f64>,
}

// =============================================================================
// Capability
// =============================================================================

/// A device whose mains or switch power a board driver can command.
///
/// Only board drivers call [`PowerControllable::record_outcome`], and only with
/// a state parsed from the device's response to the command they just issued.
pub trait PowerControllable {
    /// Human-readable module name.
    fn name(&self) -> &str;

    /// Board address of the module.
    fn address(&self) -> &Address;

    /// Settle time after a verified power-on.
    fn stabilize_on(&self) -> Duration;

    /// Settle time after a verified power-off.
    fn stabilize_off(&self) -> Duration;

    /// Last verified power state.
    fn power_state(&self) -> PowerState;

    /// Stores a verification outcome and the raw text it was derived from.
    fn record_outcome(&mut self, state: PowerState, raw: String);

    /// Settle time for a transition in the given direction.
    fn stabilize_for(&self, request: PowerRequest) -> Duration {
        match request {
            PowerRequest::On => self.stabilize_on(),
            PowerRequest::Off => self.stabilize_off(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rain_codes_fail_safe() {
        assert_eq!(RainState::from_code('D'), RainState::Dry);
        assert_eq!(RainState::from_code('w'), RainState::Wet);
        assert_eq!(RainState::from_code('X'), RainState::Open);
        assert_eq!(RainState::from_code('?'), RainState::Open);
        assert!(!RainState::Dry.is_hazardous());
        assert!(RainState::Wet.is_hazardous());
        assert!(RainState::Open.is_hazardous());
    }

    #[test]
    fn test_power_request_levels() {
        assert_eq!(PowerRequest::On.level(), 1);
        assert_eq!(PowerRequest::Off.level(), 0);
        assert_eq!(PowerRequest::On.inverse(), PowerRequest::Off);
        assert_eq!(PowerRequest::Off.target(), PowerState::Off);
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Init < Phase::Run);
        assert!(Phase::Run < Phase::Final);
    }
}
