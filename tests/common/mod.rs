//! Shared helpers for the integration tests.
#![allow(dead_code)]

use laser_daq::adapters::Journal;
use laser_daq::data::storage::{MemorySink, SampleSink};
use laser_daq::hardware::mock::{SimOutletBox, SimRadiometer, SimSwitchBoard};
use laser_daq::{Orchestrator, Settings};
use std::time::Duration;

/// Radiometer output used by the simulated runs.
pub const DUMP: &str = "0.013 X 0.027 ERR 0.000\r\n";

/// Default settings with every settle delay removed and a short run.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.modules = settings.modules.without_delays();
    settings.outlet_box.confirm_delay = Duration::ZERO;
    settings.radiometer.command_delay = Duration::ZERO;
    settings.run.duration = Duration::from_millis(40);
    settings.run.telemetry_interval = Duration::from_millis(10);
    settings.run.rain_interval = Duration::from_millis(10);
    settings
}

/// A simulated apparatus and the journal of every command it received.
pub struct Rig<S: SampleSink> {
    pub orchestrator: Orchestrator<S>,
    pub journal: Journal,
}

/// Builds a rig from simulators and a sink.
pub fn rig_with<S: SampleSink>(
    settings: &Settings,
    switch: SimSwitchBoard,
    outlet: SimOutletBox,
    radiometer: SimRadiometer,
    sink: S,
) -> Rig<S> {
    let journal = Journal::new();
    let orchestrator = Orchestrator::new(
        settings,
        Box::new(switch.into_transport(&journal)),
        Box::new(outlet.into_transport(&journal)),
        Box::new(radiometer.into_transport(&journal)),
        sink,
    )
    .expect("Failed to build orchestrator");
    Rig {
        orchestrator,
        journal,
    }
}

/// Builds a rig with fast settings and an in-memory sink.
pub fn rig(switch: SimSwitchBoard, outlet: SimOutletBox) -> Rig<MemorySink> {
    rig_with(
        &fast_settings(),
        switch,
        outlet,
        SimRadiometer::new(DUMP),
        MemorySink::new(),
    )
}

/// Power-off commands in the order they were written, across both boards.
pub fn off_commands(journal: &Journal) -> Vec<String> {
    journal
        .entries()
        .into_iter()
        .map(|entry| entry.line)
        .filter(|line| {
            let switch_off =
                line.ends_with(" 0") && (line.starts_with("OUT ") || line.starts_with("RMON "));
            line.starts_with("OFF ") || switch_off
        })
        .collect()
}
