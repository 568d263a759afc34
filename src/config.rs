//! Application settings.
//!
//! Settings are layered, lowest precedence first:
//! 1. built-in defaults (the values of the deployed apparatus)
//! 2. a TOML file (`config/default.toml`, or an explicit path)
//! 3. environment variables prefixed with `LASER_DAQ__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LASER_DAQ__APPLICATION__LOG_LEVEL=debug
//! LASER_DAQ__RUN__DURATION=30s
//! LASER_DAQ__RADIOMETER__STRICT_STATUS=false
//! ```
//!
//! Durations are written in humantime notation (`"500ms"`, `"5m"`).
//!
//! # Example
//!
//! ```toml
//! [switch_board]
//! port = "/dev/ttyUSB0"
//! timeout = "500ms"
//!
//! [modules.heater]
//! switch = "B"
//! stabilize_on = "30s"
//! stabilize_off = "0s"
//! ```

use crate::error::{AppResult, DaqError};
use crate::module::{Address, ModuleId};
use config::{Config, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Digital switch/sensor board
    pub switch_board: SwitchBoardSettings,
    /// Relay outlet box
    pub outlet_box: OutletBoxSettings,
    /// Radiometer serial link and configuration sequence
    pub radiometer: RadiometerSettings,
    /// Module addresses and settle delays
    pub modules: ModuleSettings,
    /// Run phase timing
    pub run: RunSettings,
    /// Sample storage
    pub storage: StorageSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "laser_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Switch board link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchBoardSettings {
    /// Serial port (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Command terminator
    pub line_terminator: String,
    /// Regex the `VER` reply must match
    pub handshake_pattern: String,
}

impl Default for SwitchBoardSettings {
    fn default() -> Self {
        Self {
            port: "/dev/tts/0".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_millis(500),
            line_terminator: "\r\n".to_string(),
            handshake_pattern: r"(?m)^\s*VER\s+\S*\d+\.\d+".to_string(),
        }
    }
}

/// Outlet box link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletBoxSettings {
    /// Serial port
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Command terminator
    pub line_terminator: String,
    /// Wait between an ON/OFF command and its confirmation
    #[serde(with = "humantime_serde")]
    pub confirm_delay: Duration,
    /// Confirmation reply
    pub confirm_char: String,
    /// Substring the power-up banner must contain
    pub vendor_banner: String,
}

impl Default for OutletBoxSettings {
    fn default() -> Self {
        Self {
            port: "/dev/tts/1".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_secs(2),
            line_terminator: "\r\n".to_string(),
            confirm_delay: Duration::from_secs(1),
            confirm_char: "Y".to_string(),
            vendor_banner: "BayTech".to_string(),
        }
    }
}

/// Radiometer link and configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiometerSettings {
    /// Serial port
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout; long because the device may be mid-acquisition
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Command terminator
    pub line_terminator: String,
    /// Mandatory gap before each configuration command
    #[serde(with = "humantime_serde")]
    pub command_delay: Duration,
    /// Fail initialisation on a non-zero `ST` reply (`false` continues degraded)
    pub strict_status: bool,
    /// `TG` argument (1 internal, 3 external positive edge)
    pub trigger_mode: u8,
    /// `SS` argument
    pub single_shot: u8,
    /// `RA` argument
    pub range: u8,
    /// `BS` argument
    pub battery_save: u8,
}

impl Default for RadiometerSettings {
    fn default() -> Self {
        Self {
            port: "/dev/tts/2".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_secs(5),
            line_terminator: "\r".to_string(),
            command_delay: Duration::from_millis(500),
            strict_status: true,
            trigger_mode: 1,
            single_shot: 0,
            range: 2,
            battery_save: 0,
        }
    }
}

/// Settle delays of a module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizeTiming {
    /// Hold after a verified power-on
    #[serde(with = "humantime_serde")]
    pub stabilize_on: Duration,
    /// Hold after a verified power-off
    #[serde(with = "humantime_serde")]
    pub stabilize_off: Duration,
}

impl StabilizeTiming {
    fn secs(on: u64, off: u64) -> Self {
        Self {
            stabilize_on: Duration::from_secs(on),
            stabilize_off: Duration::from_secs(off),
        }
    }
}

/// A module on a switch board output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchModuleSettings {
    /// Output letter (A-E)
    pub switch: String,
    /// Hold after a verified power-on
    #[serde(with = "humantime_serde")]
    pub stabilize_on: Duration,
    /// Hold after a verified power-off
    #[serde(with = "humantime_serde")]
    pub stabilize_off: Duration,
}

/// A module on an outlet box outlet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletModuleSettings {
    /// Outlet number (1-8)
    pub outlet: u8,
    /// Hold after a verified power-on
    #[serde(with = "humantime_serde")]
    pub stabilize_on: Duration,
    /// Hold after a verified power-off
    #[serde(with = "humantime_serde")]
    pub stabilize_off: Duration,
}

impl SwitchModuleSettings {
    fn new(switch: &str, timing: StabilizeTiming) -> Self {
        Self {
            switch: switch.to_string(),
            stabilize_on: timing.stabilize_on,
            stabilize_off: timing.stabilize_off,
        }
    }

    /// Settle delays of this module.
    pub fn timing(&self) -> StabilizeTiming {
        StabilizeTiming {
            stabilize_on: self.stabilize_on,
            stabilize_off: self.stabilize_off,
        }
    }
}

impl OutletModuleSettings {
    fn new(outlet: u8, timing: StabilizeTiming) -> Self {
        Self {
            outlet,
            stabilize_on: timing.stabilize_on,
            stabilize_off: timing.stabilize_off,
        }
    }

    /// Settle delays of this module.
    pub fn timing(&self) -> StabilizeTiming {
        StabilizeTiming {
            stabilize_on: self.stabilize_on,
            stabilize_off: self.stabilize_off,
        }
    }
}

/// Addresses and delays of every module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Rain monitor (always on the `RMON` enable)
    pub rain_monitor: StabilizeTiming,
    /// Window heater
    pub heater: SwitchModuleSettings,
    /// Mains inverter
    pub inverter: SwitchModuleSettings,
    /// Radiometer
    pub radiometer: OutletModuleSettings,
    /// Laser
    pub laser: OutletModuleSettings,
    /// Optical shutter
    pub shutter: OutletModuleSettings,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            rain_monitor: StabilizeTiming::secs(5, 0),
            heater: SwitchModuleSettings::new("B", StabilizeTiming::secs(30, 0)),
            inverter: SwitchModuleSettings::new("A", StabilizeTiming::secs(10, 0)),
            radiometer: OutletModuleSettings::new(1, StabilizeTiming::secs(0, 0)),
            laser: OutletModuleSettings::new(2, StabilizeTiming::secs(2, 0)),
            shutter: OutletModuleSettings::new(3, StabilizeTiming::secs(10, 10)),
        }
    }
}

impl ModuleSettings {
    /// Resolves the board address and settle delays of a module.
    pub fn address_of(&self, id: ModuleId) -> AppResult<(Address, StabilizeTiming)> {
        let outlet = |s: &OutletModuleSettings| (Address::Outlet(s.outlet), s.timing());
        let switch = |s: &SwitchModuleSettings| -> AppResult<(Address, StabilizeTiming)> {
            Ok((Address::Switch(parse_switch(id, &s.switch)?), s.timing()))
        };
        match id {
            ModuleId::RainMonitor => Ok((Address::RainMonitor, self.rain_monitor)),
            ModuleId::Heater => switch(&self.heater),
            ModuleId::Inverter => switch(&self.inverter),
            ModuleId::Radiometer => Ok(outlet(&self.radiometer)),
            ModuleId::Laser => Ok(outlet(&self.laser)),
            ModuleId::Shutter => Ok(outlet(&self.shutter)),
        }
    }

    /// Sets every settle delay to zero.
    pub fn without_delays(mut self) -> Self {
        self.rain_monitor = StabilizeTiming::secs(0, 0);
        for switch in [&mut self.heater, &mut self.inverter] {
            switch.stabilize_on = Duration::ZERO;
            switch.stabilize_off = Duration::ZERO;
        }
        for outlet in [&mut self.radiometer, &mut self.laser, &mut self.shutter] {
            outlet.stabilize_on = Duration::ZERO;
            outlet.stabilize_off = Duration::ZERO;
        }
        self
    }
}

fn parse_switch(id: ModuleId, switch: &str) -> AppResult<char> {
    let mut chars = switch.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if ('A'..='E').contains(&letter.to_ascii_uppercase()) => {
            Ok(letter.to_ascii_uppercase())
        }
        _ => Err(DaqError::Configuration(format!(
            "{}: switch '{}' is not one of A-E",
            id, switch
        ))),
    }
}

/// Run phase timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// How long the laser fires
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Environment telemetry cadence
    #[serde(with = "humantime_serde")]
    pub telemetry_interval: Duration,
    /// Rain interlock cadence
    #[serde(with = "humantime_serde")]
    pub rain_interval: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5 * 60),
            telemetry_interval: Duration::from_secs(5),
            rain_interval: Duration::from_secs(30),
        }
    }
}

/// Sample storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Output directory for run files
    pub output_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

impl Settings {
    /// Loads and validates settings.
    ///
    /// With `path` the file must exist; without it `config/default.toml` is
    /// read when present.
    pub fn new(path: Option<&Path>) -> AppResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("config/default").required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("LASER_DAQ").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks semantic constraints that parsing cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let run = &self.run;
        if run.duration.is_zero() || run.telemetry_interval.is_zero() || run.rain_interval.is_zero() {
            return Err(DaqError::Configuration(
                "run duration and polling intervals must be non-zero".to_string(),
            ));
        }

        Regex::new(&self.switch_board.handshake_pattern).map_err(|e| {
            DaqError::Configuration(format!("switch_board.handshake_pattern: {}", e))
        })?;

        if self.outlet_box.confirm_char.is_empty() {
            return Err(DaqError::Configuration(
                "outlet_box.confirm_char must not be empty".to_string(),
            ));
        }

        let mut switches = HashSet::new();
        let mut outlets = HashSet::new();
        for id in [
            ModuleId::RainMonitor,
            ModuleId::Heater,
            ModuleId::Inverter,
            ModuleId::Radiometer,
            ModuleId::Shutter,
            ModuleId::Laser,
        ] {
            match self.modules.address_of(id)?.0 {
                Address::Switch(letter) => {
                    if !switches.insert(letter) {
                        return Err(DaqError::Configuration(format!(
                            "switch {} assigned to more than one module",
                            letter
                        )));
                    }
                }
                Address::Outlet(n) => {
                    if !(1..=8).contains(&n) {
                        return Err(DaqError::Configuration(format!(
                            "{}: outlet {} is not one of 1-8",
                            id, n
                        )));
                    }
                    if !outlets.insert(n) {
                        return Err(DaqError::Configuration(format!(
                            "outlet {} assigned to more than one module",
                            n
                        )));
                    }
                }
                Address::RainMonitor => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.radiometer.strict_status);
        assert_eq!(settings.run.duration, Duration::from_secs(300));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[run]
duration = "30s"
telemetry_interval = "1s"
rain_interval = "10s"

[radiometer]
strict_status = false

[modules.laser]
outlet = 4
stabilize_on = "3s"
stabilize_off = "0s"
"#
        )
        .unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.run.duration, Duration::from_secs(30));
        assert!(!settings.radiometer.strict_status);
        assert_eq!(settings.modules.laser.outlet, 4);
        assert_eq!(settings.modules.laser.stabilize_on, Duration::from_secs(3));
        // untouched sections keep their defaults
        assert_eq!(settings.outlet_box.vendor_banner, "BayTech");
        assert_eq!(settings.modules.heater.switch, "B");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Settings::new(Some(Path::new("/nonexistent/laser_daq.toml")));
        assert!(matches!(result, Err(DaqError::Settings(_))));
    }

    #[test]
    fn test_duplicate_outlet_rejected() {
        let mut settings = Settings::default();
        settings.modules.shutter.outlet = settings.modules.laser.outlet;
        assert!(matches!(settings.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_bad_switch_letter_rejected() {
        let mut settings = Settings::default();
        settings.modules.heater.switch = "Q".to_string();
        assert!(matches!(settings.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut settings = Settings::default();
        settings.run.rain_interval = Duration::ZERO;
        assert!(settings.validate().is_err());
    }
}
