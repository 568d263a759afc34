//! Simulated apparatus hardware.

pub mod mock;

pub use mock::{SimOutletBox, SimRadiometer, SimSwitchBoard};
