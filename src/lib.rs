//! Core library for the laser_daq apparatus controller.
//!
//! This library contains the state model, the board drivers and the phased
//! orchestrator that powers a remote laser calibration apparatus up, collects
//! a run of telemetry and energy readings, and powers it down again. It is
//! used by the `laser_daq` binary and by the integration tests, which drive it
//! against the simulators in [`hardware::mock`].

pub mod adapters;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod module;
pub mod orchestrator;

pub use config::Settings;
pub use error::{AppResult, DaqError};
pub use module::ModuleId;
pub use orchestrator::{Orchestrator, ShutdownReport, ShutdownStep};
