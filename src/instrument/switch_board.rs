//! Digital switch/sensor board driver
//!
//! Switches isolated outputs and the rain monitor enable, and polls pressure,
//! temperature, humidity, supply voltage and the rain sensor.
//!
//! ## Configuration
//!
//! ```toml
//! [switch_board]
//! port = "/dev/tts/0"
//! baud_rate = 9600
//! timeout = "500ms"
//! ```
//!
//! ## Protocol
//!
//! Line oriented, CR/LF terminated:
//! - `ECHO 0` disable echo of typed characters, `VER` firmware version
//! - `OUT <A-E> <0|1>` isolated output, `RMON <0|1>` rain monitor enable
//! - `PRESS`, `TEMP`, `HUMID`, `SUPPLY` reply `<NAME> <value>`
//! - `RAIN` replies `RAIN <D|W|X>` (dry, wet, open)
//!
//! A power command is acknowledged by the board printing the command back.
//! The echo is the only confirmation the board gives, so a truncated or
//! reordered echo is a failed transition.

use crate::adapters::{read_text, Transport};
use crate::config::SwitchBoardSettings;
use crate::core::{
    ConfigState, EnvironmentSample, PowerControllable, PowerRequest, PowerState, RainState,
};
use crate::error::{ConfigError, PowerError};
use crate::module::Address;
use chrono::Utc;
use log::{debug, error, info, warn};
use regex::Regex;
use std::thread;

const DEVICE: &str = "switch board";

/// Switch board driver. Owns its transport exclusively.
pub struct SwitchBoard {
    transport: Box<dyn Transport>,
    settings: SwitchBoardSettings,
    config_state: ConfigState,
}

impl SwitchBoard {
    /// Creates a driver over an already opened transport.
    pub fn new(transport: Box<dyn Transport>, settings: SwitchBoardSettings) -> Self {
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

    /// Disables board echo and requires a recognisable `VER` reply.
    ///
    /// A board left in `ConfigState::Error` is not retried.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.config_state == ConfigState::Error {
            return Err(ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw: "previous handshake failed".to_string(),
            });
        }
        info!("Initializing {}", DEVICE);

        let raw = match self.handshake() {
            Ok(raw) => raw,
            Err(e) => {
                self.config_state = ConfigState::Error;
                return Err(e);
            }
        };

        let pattern = Regex::new(&self.settings.handshake_pattern).map_err(|e| {
            self.config_state = ConfigState::Error;
            ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw: format!("invalid handshake pattern: {}", e),
            }
        })?;

        if pattern.is_match(&raw) {
            self.config_state = ConfigState::Initialized;
            info!("{} identified: {}", DEVICE, raw.trim());
            Ok(())
        } else {
            self.config_state = ConfigState::Error;
            error!("{} did not identify itself: {:?}", DEVICE, raw);
            Err(ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw,
            })
        }
    }

    fn handshake(&mut self) -> Result<String, ConfigError> {
        self.send("ECHO 0")?;
        // whatever the board prints in reply to ECHO is irrelevant
        let _ = read_text(self.transport.as_mut(), self.settings.timeout);
        self.transport.discard_input()?;

        self.send("VER")?;
        match read_text(self.transport.as_mut(), self.settings.timeout) {
            Ok(raw) => Ok(raw),
            Err(e) => Err(ConfigError::NoHandshake {
                device: DEVICE.to_string(),
                raw: format!("<{}>", e),
            }),
        }
    }

    /// Switches `module` and verifies the board echoed exactly that command.
    ///
    /// On success blocks for the module's settle delay. On any other outcome
    /// the module is left `Unknown`.
    pub fn set(
        &mut self,
        module: &mut dyn PowerControllable,
        request: PowerRequest,
    ) -> Result<(), PowerError> {
        let command = command_for(module.address(), request).ok_or_else(|| {
            PowerError::Unaddressable {
                module: module.name().to_string(),
                board: DEVICE,
            }
        })?;
        let opposite = command_for(module.address(), request.inverse()).unwrap_or_default();

        info!("{}: {} ({})", DEVICE, command, module.name());
        if let Err(e) = self.send(&command) {
            module.record_outcome(PowerState::Unknown, String::new());
            return Err(e.into());
        }

        let raw = match read_text(self.transport.as_mut(), self.settings.timeout) {
            Ok(raw) => raw,
            Err(e) => {
                error!("{}: no acknowledgement for '{}': {}", DEVICE, command, e);
                module.record_outcome(PowerState::Unknown, String::new());
                return Err(PowerError::Unverified {
                    module: module.name().to_string(),
                    raw: String::new(),
                });
            }
        };

        if echoes(&raw, &command) && !echoes(&raw, &opposite) {
            module.record_outcome(request.target(), raw);
            thread::sleep(module.stabilize_for(request));
            Ok(())
        } else {
            error!(
                "{}: '{}' not acknowledged for {}: {:?}",
                DEVICE,
                command,
                module.name(),
                raw
            );
            module.record_outcome(PowerState::Unknown, raw.clone());
            Err(PowerError::Unverified {
                module: module.name().to_string(),
                raw,
            })
        }
    }

    /// Reads pressure, temperature, humidity and supply voltage.
    ///
    /// Any unparseable reply drops the whole sample.
    pub fn poll_environment(&mut self) -> Result<EnvironmentSample, PowerError> {
        self.transport.discard_input()?;
        let pressure = self.query_reading("PRESS")?;
        let temperature = self.query_reading("TEMP")?;
        let humidity = self.query_reading("HUMID")?;
        let supply_voltage = self.query_reading("SUPPLY")?;
        Ok(EnvironmentSample {
            timestamp: Utc::now(),
            pressure,
            temperature,
            humidity,
            supply_voltage,
        })
    }

    /// Reads the rain sensor. Unrecognised codes read as `Open`.
    pub fn poll_rain(&mut self) -> Result<RainState, PowerError> {
        let raw = self.query("RAIN")?;
        let state = match rain_code(&raw) {
            Some(code @ ('D' | 'W' | 'X')) => RainState::from_code(code),
            _ => {
                warn!("{}: unrecognised rain reply {:?}, treating as open", DEVICE, raw);
                RainState::Open
            }
        };
        debug!("{}: rain sensor {}", DEVICE, state);
        Ok(state)
    }

    fn query_reading(&mut self, name: &str) -> Result<f64, PowerError> {
        let raw = self.query(name)?;
        parse_reading(name, &raw)
    }

    /// A reply that never arrives is reported like one that cannot be parsed.
    fn query(&mut self, command: &str) -> Result<String, PowerError> {
        self.send(command)?;
        read_text(self.transport.as_mut(), self.settings.timeout).map_err(|e| {
            error!("{}: no reply to {}: {}", DEVICE, command, e);
            match e.kind() {
                std::io::ErrorKind::TimedOut => PowerError::MalformedTelemetry { raw: String::new() },
                _ => PowerError::Io(e),
            }
        })
    }

    fn send(&mut self, command: &str) -> std::io::Result<()> {
        let line = format!("{}{}", command, self.settings.line_terminator);
        debug!("{}: sending {:?}", DEVICE, command);
        self.transport.write(line.as_bytes())
    }
}

/// Board command switching `address` in the requested direction.
fn command_for(address: &Address, request: PowerRequest) -> Option<String> {
    match address {
        Address::Switch(letter) => Some(format!("OUT {} {}", letter, request.level())),
        Address::RainMonitor => Some(format!("RMON {}", request.level())),
        Address::Outlet(_) => None,
    }
}

/// True when some line of `raw` contains `command` as whole words.
fn echoes(raw: &str, command: &str) -> bool {
    if command.is_empty() {
        return false;
    }
    let pattern = format!(r"(?m)^.*\b{}\b.*$", regex::escape(command));
    Regex::new(&pattern)
        .map(|re| re.is_match(raw))
        .unwrap_or(false)
}

/// Parses the last token of the reply line starting with `name`.
fn parse_reading(name: &str, raw: &str) -> Result<f64, PowerError> {
    let malformed = || PowerError::MalformedTelemetry {
        raw: raw.to_string(),
    };
    let line = raw
        .lines()
        .find(|line| line.split_whitespace().next() == Some(name))
        .ok_or_else(malformed)?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(malformed());
    }
    tokens[tokens.len() - 1]
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(malformed)
}

/// Extracts the single-letter code from a `RAIN` reply.
fn rain_code(raw: &str) -> Option<char> {
    let code = raw
        .lines()
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("RAIN"), Some(code)) => Some(code),
                (Some(code), None) if code != "RAIN" => Some(code),
                _ => None,
            }
        })
        .unwrap_or("");
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}
