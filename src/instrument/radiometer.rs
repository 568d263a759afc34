//! Laser energy radiometer
//!
//! Mains power comes from an outlet box outlet; configuration and readout use
//! the radiometer's own serial link.
//!
//! ## Configuration sequence
//!
//! ```text
//! TG <n>   trigger mode
//! SS <n>   single shot (0 disables)
//! RA <n>   range
//! BS <n>   internal battery save (0 disables)
//! ST       error status, 0 = no error
//! AD       free-running ASCII dump of energy readings
//! ```
//!
//! The device corrupts its state when commands arrive too fast, so every
//! configuration command is preceded by `command_delay`.
//!
//! ## Status policy
//!
//! With `strict_status` (the default) a non-zero or unreadable `ST` reply puts
//! the device in `ConfigState::Error` and initialisation fails. Without it
//! the reply is logged, the device is marked degraded and still enters dump
//! mode as `Initialized`.

use crate::adapters::{read_text, Transport};
use crate::config::RadiometerSettings;
use crate::core::{ConfigState, EnergySample, PowerControllable, PowerState};
use crate::error::ConfigError;
use crate::module::{Address, Module};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::io;
use std::thread;
use std::time::Duration;

/// Radiometer module with its configuration link.
pub struct RadiometerDevice {
    module: Module,
    transport: Box<dyn Transport>,
    settings: RadiometerSettings,
    config_state: ConfigState,
    degraded: bool,
}

impl RadiometerDevice {
    /// Wraps the powered module and its serial link.
    pub fn new(module: Module, transport: Box<dyn Transport>, settings: RadiometerSettings) -> Self {
        Self {
            module,
            transport,
            settings,
            config_state: ConfigState::Unknown,
            degraded: false,
        }
    }

    /// Current configuration state.
    pub fn config_state(&self) -> ConfigState {
        self.config_state
    }

    /// True when initialisation accepted a non-zero status.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Runs the configuration sequence and enters ASCII dump mode.
    ///
    /// A device left in `ConfigState::Error` is not retried.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        if self.config_state == ConfigState::Error {
            return Err(ConfigError::NoHandshake {
                device: self.module.name().to_string(),
                raw: "previous configuration failed".to_string(),
            });
        }
        info!("Initializing {}", self.module.name());
        let s = &self.settings;
        let sequence = [
            format!("TG {}", s.trigger_mode),
            format!("SS {}", s.single_shot),
            format!("RA {}", s.range),
            format!("BS {}", s.battery_save),
        ];
        for command in &sequence {
            thread::sleep(self.settings.command_delay);
            if let Err(e) = self.send(command) {
                self.config_state = ConfigState::Error;
                return Err(e.into());
            }
        }

        // drop whatever the configuration commands printed
        let _ = read_text(self.transport.as_mut(), self.settings.command_delay);
        thread::sleep(self.settings.command_delay);
        if let Err(e) = self.send("ST") {
            self.config_state = ConfigState::Error;
            return Err(e.into());
        }
        let raw = read_text(self.transport.as_mut(), self.settings.timeout)
            .unwrap_or_else(|e| format!("<{}>", e));

        if parse_status(&raw) != Some(0) {
            if self.settings.strict_status {
                self.config_state = ConfigState::Error;
                error!("{} error status {:?}", self.module.name(), raw);
                return Err(ConfigError::BadStatus {
                    device: self.module.name().to_string(),
                    raw,
                });
            }
            warn!(
                "{} error status {:?}, continuing in degraded mode",
                self.module.name(),
                raw
            );
            self.degraded = true;
        }

        thread::sleep(self.settings.command_delay);
        if let Err(e) = self.send("AD") {
            self.config_state = ConfigState::Error;
            return Err(e.into());
        }
        self.config_state = ConfigState::Initialized;
        info!("{} in ASCII dump mode", self.module.name());
        Ok(())
    }

    /// Reads every energy value accumulated since dump mode began.
    ///
    /// Non-numeric tokens are status characters and are skipped. No output at
    /// all means nothing triggered and yields an empty sample.
    pub fn read_energy_burst(&mut self) -> io::Result<EnergySample> {
        let text = match read_text(self.transport.as_mut(), self.settings.timeout) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => String::new(),
            Err(e) => return Err(e),
        };
        let energies = parse_energies(&text);
        debug!(
            "{}: {} energy readings in burst",
            self.module.name(),
            energies.len()
        );
        Ok(EnergySample {
            timestamp: Utc::now(),
            energies,
        })
    }

    /// Marks the device finalized after a completed run.
    pub fn finalize(&mut self) {
        if self.config_state == ConfigState::Initialized {
            self.config_state = ConfigState::Finalized;
        }
    }

    fn send(&mut self, command: &str) -> io::Result<()> {
        let line = format!("{}{}", command, self.settings.line_terminator);
        debug!("{}: sending {:?}", self.module.name(), command);
        self.transport.write(line.as_bytes())
    }
}

impl PowerControllable for RadiometerDevice {
    fn name(&self) -> &str {
        self.module.name()
    }

    fn address(&self) -> &Address {
        self.module.address()
    }

    fn stabilize_on(&self) -> Duration {
        self.module.stabilize_on()
    }

    fn stabilize_off(&self) -> Duration {
        self.module.stabilize_off()
    }

    fn power_state(&self) -> PowerState {
        self.module.power_state()
    }

    fn record_outcome(&mut self, state: PowerState, raw: String) {
        self.module.record_outcome(state, raw);
    }
}

fn parse_status(raw: &str) -> Option<i64> {
    raw.split_whitespace().last()?.parse().ok()
}

fn parse_energies(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|token| token.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .collect()
}
