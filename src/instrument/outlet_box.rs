//! Relay outlet box driver
//!
//! Switches mains outlets feeding the radiometer, laser and shutter.
//!
//! ## Protocol
//!
//! - On power-up the box prints a banner identifying the vendor and firmware.
//! - `ON <n>` / `OFF <n>` select an outlet; the box asks for confirmation and
//!   commits only after the confirmation character (`Y`).
//! - After committing, the box prints its status table:
//!
//! ```text
//! Circuit Breaker: On
//!
//! 1)...Outlet 1  : Off
//! 2)...Outlet 2  : On
//! ```
//!
//! The status table reports the actual relay state, so a row contradicting
//! the request is recorded as such and the request fails.

use crate::adapters::{read_text, Transport};
use crate::config::OutletBoxSettings;
use crate::core::{ConfigState, PowerControllable, PowerRequest, PowerState};
use crate::error::{ConfigError, PowerError};
use crate::module::Address;
use log::{debug, error, info};
use regex::Regex;
use std::thread;

const DEVICE: &str = "outlet box";

/// Outlet box driver. Owns its transport exclusively.
pub struct OutletBox {
    transport: Box<dyn Transport>,
    settings: OutletBoxSettings,
    config_state: ConfigState,
}

impl OutletBox {
    /// Creates a driver over an already opened transport.
    pub fn new(transport: Box<dyn Transport>, settings: OutletBoxSettings) -> Self {
        Self {
            transport,
            settings,
            config_state: ConfigState::Unknown,
        }
    }

    /// Current handshake state.
    pub fn config_state(&self) -> ConfigState {
        self.config_state
    }

    /// Reads the banner and requires the vendor string in it.
    ///
    /// A box left in `ConfigState::Error` is not retried.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.config_state == ConfigState::Error {
            return Err(ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw: "previous handshake failed".to_string(),
            });
        }
        info!("Initializing {}", DEVICE);
        let raw = match read_text(self.transport.as_mut(), self.settings.timeout) {
            Ok(raw) => raw,
            Err(e) => format!("<{}>", e),
        };

        if raw.contains(&self.settings.vendor_banner) {
            self.config_state = ConfigState::Initialized;
            info!("{} identified", DEVICE);
            Ok(())
        } else {
            self.config_state = ConfigState::Error;
            error!(
                "{} banner lacks '{}': {:?}",
                DEVICE, self.settings.vendor_banner, raw
            );
            Err(ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw,
            })
        }
    }

    /// Switches the module's outlet and verifies it in the status table.
    ///
    /// Blocks for the settle delay only when the table confirms the requested
    /// direction.
    pub fn set(
        &mut self,
        module: &mut dyn PowerControllable,
        request: PowerRequest,
    ) -> Result<(), PowerError> {
        let outlet = match module.address() {
            Address::Outlet(n) => *n,
            _ => {
                return Err(PowerError::Unaddressable {
                    module: module.name().to_string(),
                    board: DEVICE,
                })
            }
        };
        let command = match request {
            PowerRequest::On => format!("ON {}", outlet),
            PowerRequest::Off => format!("OFF {}", outlet),
        };

        info!("{}: {} ({})", DEVICE, command, module.name());
        if let Err(e) = self.confirmed(&command) {
            module.record_outcome(PowerState::Unknown, String::new());
            return Err(e.into());
        }

        let raw = match read_text(self.transport.as_mut(), self.settings.timeout) {
            Ok(raw) => raw,
            Err(e) => {
                error!("{}: no status table after '{}': {}", DEVICE, command, e);
                module.record_outcome(PowerState::Unknown, String::new());
                return Err(PowerError::Unverified {
                    module: module.name().to_string(),
                    raw: String::new(),
                });
            }
        };

        let observed = outlet_state(&raw, outlet);
        debug!("{}: outlet {} reads {}", DEVICE, outlet, observed);
        module.record_outcome(observed, raw.clone());

        if observed == request.target() {
            thread::sleep(module.stabilize_for(request));
            Ok(())
        } else {
            error!(
                "{}: outlet {} is {} after '{}' for {}: {:?}",
                DEVICE,
                outlet,
                observed,
                command,
                module.name(),
                raw
            );
            Err(PowerError::Unverified {
                module: module.name().to_string(),
                raw,
            })
        }
    }

    fn confirmed(&mut self, command: &str) -> std::io::Result<()> {
        self.transport.discard_input()?;
        self.send(command)?;
        thread::sleep(self.settings.confirm_delay);
        let confirm = self.settings.confirm_char.clone();
        self.send(&confirm)
    }

    fn send(&mut self, command: &str) -> std::io::Result<()> {
        let line = format!("{}{}", command, self.settings.line_terminator);
        debug!("{}: sending {:?}", DEVICE, command);
        self.transport.write(line.as_bytes())
    }
}

/// State of `outlet` from the first status row naming it.
fn outlet_state(raw: &str, outlet: u8) -> PowerState {
    let pattern = format!(r"Outlet\s+{}\s*:\s*(On|Off)\b", outlet);
    let Ok(row) = Regex::new(&pattern) else {
        return PowerState::Unknown;
    };
    raw.lines()
        .find_map(|line| row.captures(line))
        .map(|caps| match &caps[1] {
            "On" => PowerState::On,
            _ => PowerState::Off,
        })
        .unwrap_or(PowerState::Unknown)
}
