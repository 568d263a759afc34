//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application,
//! plus the two device-level taxonomies the drivers return.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigError`**: a device did not complete its configuration handshake. The
//!   switch board or outlet box did not identify itself, or the radiometer reported a
//!   non-zero error status.
//! - **`PowerError`**: a power command was sent but the device's own response did not
//!   confirm the requested state, or a sensor response could not be parsed.
//! - **`DaqError`**: everything the orchestrator and host see. Device errors convert
//!   into it with `?`. When a phase aborts, the orchestrator wraps the original error
//!   in `DaqError::Aborted` together with the phase and step that failed.
//!
//! Transport timeouts and disconnects surface as `std::io::Error` and are treated
//! exactly like a failed verification: the module state becomes `Unknown`.

use crate::core::{ConfigState, Phase, RainState};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// A device failed its configuration handshake.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The device did not identify itself within the read timeout.
    #[error("{device} did not identify itself (response: {raw:?})")]
    NoHandshake {
        /// Device name.
        device: String,
        /// Raw text received, empty on timeout.
        raw: String,
    },

    /// The device answered its status query with an error code.
    #[error("{device} returned error status {raw:?}")]
    BadStatus {
        /// Device name.
        device: String,
        /// Raw status text.
        raw: String,
    },

    /// Transport failure while writing the handshake.
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// A power transition or sensor query could not be verified.
#[derive(Error, Debug)]
pub enum PowerError {
    /// The response to a power command did not confirm the requested state.
    #[error("{module} power transition unverified (response: {raw:?})")]
    Unverified {
        /// Module name.
        module: String,
        /// Raw acknowledgement text, empty on timeout.
        raw: String,
    },

    /// A sensor response did not carry a parseable numeric value.
    #[error("malformed telemetry response {raw:?}")]
    MalformedTelemetry {
        /// Raw response text.
        raw: String,
    },

    /// The module's address does not belong to the board it was sent to.
    #[error("{module} is not addressable on the {board}")]
    Unaddressable {
        /// Module name.
        module: String,
        /// Board name.
        board: &'static str,
    },

    /// Transport failure while writing a command.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Settings parsed but are inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Transport or file failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A device failed its handshake.
    #[error("Device configuration error: {0}")]
    Device(#[from] ConfigError),

    /// A power transition or sensor query failed verification.
    #[error("Power error: {0}")]
    Power(#[from] PowerError),

    /// The rain sensor reported wet or open circuit.
    #[error("Rain hazard detected: sensor reports {0}")]
    RainHazard(RainState),

    /// A device completed its handshake call without becoming initialised.
    #[error("{device} is not ready (configuration state {state})")]
    NotReady {
        /// Device name.
        device: String,
        /// Configuration state it was left in.
        state: ConfigState,
    },

    /// A phase entry point was called out of order.
    #[error("Cannot run {requested} phase while controller is in {current} phase")]
    OutOfSequence {
        /// Phase that was called.
        requested: Phase,
        /// Phase most recently entered.
        current: Phase,
    },

    /// The apparatus is already down.
    #[error("Apparatus has already been shut down")]
    ShutDown,

    /// A step failed and the apparatus was shut down.
    #[error("{phase} phase aborted at '{step}': {source}")]
    Aborted {
        /// Phase that was running.
        phase: Phase,
        /// Step that failed.
        step: String,
        /// The step's error.
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Returns the error that caused a phase abort, or `self` otherwise.
    pub fn root(&self) -> &DaqError {
        match self {
            DaqError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Power(PowerError::Unverified {
            module: "laser".to_string(),
            raw: "OFF 2".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Power error: laser power transition unverified (response: \"OFF 2\")"
        );
    }

    #[test]
    fn test_aborted_error_keeps_root_cause() {
        let err = DaqError::Aborted {
            phase: Phase::Run,
            step: "laser on".into(),
            source: Box::new(DaqError::RainHazard(RainState::Wet)),
        };
        assert!(err.to_string().contains("Run phase aborted at 'laser on'"));
        assert!(matches!(err.root(), DaqError::RainHazard(RainState::Wet)));
    }
}
