//! Complete apparatus runs against simulated hardware.

mod common;

use common::{fast_settings, rig, rig_with, DUMP};
use laser_daq::core::{ConfigState, Phase, PowerState};
use laser_daq::data::storage::{CsvSink, MemorySink};
use laser_daq::error::ConfigError;
use laser_daq::hardware::mock::{SimOutletBox, SimRadiometer, SimSwitchBoard};
use laser_daq::{DaqError, ModuleId};

const ALL: [ModuleId; 6] = [
    ModuleId::RainMonitor,
    ModuleId::Heater,
    ModuleId::Inverter,
    ModuleId::Radiometer,
    ModuleId::Shutter,
    ModuleId::Laser,
];

#[test]
fn test_clean_run_leaves_everything_off() {
    let mut rig = rig(SimSwitchBoard::new(), SimOutletBox::new());

    rig.orchestrator.run_init().unwrap();
    rig.orchestrator.run_data_collection().unwrap();
    rig.orchestrator.run_finalize().unwrap();

    for id in ALL {
        assert_eq!(rig.orchestrator.power_state(id), PowerState::Off, "{}", id);
    }
    assert_eq!(rig.orchestrator.phase(), Phase::Final);
    assert_eq!(
        rig.orchestrator.radiometer().config_state(),
        ConfigState::Finalized
    );

    let report = rig.orchestrator.shutdown_report().unwrap();
    assert!(report.is_clean());
    assert!(report.steps.is_empty());

    let sink = rig.orchestrator.sink();
    assert_eq!(sink.flush_count, 1);
    assert!(!sink.environment.is_empty());
    assert_eq!(sink.environment[0].pressure, 867.3);
    assert_eq!(sink.energy.len(), 1);
    assert_eq!(sink.energy[0].energies, vec![0.013, 0.027, 0.000]);
    let (start, stop) = sink.run_bounds.unwrap();
    assert!(start <= stop);
}

#[test]
fn test_power_on_sequence_across_boards() {
    let mut rig = rig(SimSwitchBoard::new(), SimOutletBox::new());
    rig.orchestrator.run_init().unwrap();
    rig.orchestrator.run_data_collection().unwrap();

    let ons: Vec<String> = rig
        .journal
        .entries()
        .into_iter()
        .map(|entry| entry.line)
        .filter(|line| line.starts_with("ON ") || (line.ends_with(" 1") && !line.starts_with("TG")))
        .collect();
    assert_eq!(ons, vec!["RMON 1", "OUT B 1", "OUT A 1", "ON 1", "ON 3", "ON 2"]);
    assert_eq!(
        rig.journal.lines_for("radiometer"),
        vec!["TG 1", "SS 0", "RA 2", "BS 0", "ST", "AD"]
    );
}

#[test]
fn test_strict_radiometer_status_aborts_init() {
    let mut rig = rig_with(
        &fast_settings(),
        SimSwitchBoard::new(),
        SimOutletBox::new(),
        SimRadiometer::new(DUMP).with_status("4"),
        MemorySink::new(),
    );

    let err = rig.orchestrator.run_init().unwrap_err();
    assert!(matches!(
        err.root(),
        DaqError::Device(ConfigError::BadStatus { .. })
    ));
    assert_eq!(rig.orchestrator.radiometer().config_state(), ConfigState::Error);
    assert_eq!(
        rig.orchestrator.shutdown_report().unwrap().order(),
        vec![
            ModuleId::Radiometer,
            ModuleId::Inverter,
            ModuleId::Heater,
            ModuleId::RainMonitor,
        ]
    );
}

#[test]
fn test_lenient_radiometer_status_runs_degraded() {
    let mut settings = fast_settings();
    settings.radiometer.strict_status = false;
    let mut rig = rig_with(
        &settings,
        SimSwitchBoard::new(),
        SimOutletBox::new(),
        SimRadiometer::new(DUMP).with_status("4"),
        MemorySink::new(),
    );

    rig.orchestrator.run_init().unwrap();
    assert!(rig.orchestrator.radiometer().is_degraded());
    rig.orchestrator.run_data_collection().unwrap();
    rig.orchestrator.run_finalize().unwrap();
    assert!(rig.orchestrator.shutdown_report().unwrap().is_clean());
}

#[test]
fn test_bad_outlet_banner_aborts_after_switch_modules() {
    let journal = laser_daq::adapters::Journal::new();
    let outlet = laser_daq::adapters::MockTransport::new("outlet", |_: &str| None::<String>)
        .with_journal(journal.clone())
        .with_pending("garbage\r\n");
    let mut orchestrator = laser_daq::Orchestrator::new(
        &fast_settings(),
        Box::new(SimSwitchBoard::new().into_transport(&journal)),
        Box::new(outlet),
        Box::new(SimRadiometer::new(DUMP).into_transport(&journal)),
        MemorySink::new(),
    )
    .unwrap();

    let err = orchestrator.run_init().unwrap_err();
    assert!(matches!(err, DaqError::Aborted { ref step, .. } if step == "outlet box handshake"));
    assert_eq!(
        orchestrator.shutdown_report().unwrap().order(),
        vec![ModuleId::Inverter, ModuleId::Heater, ModuleId::RainMonitor]
    );
}

#[test]
fn test_clean_run_writes_csv_files() {
    let dir = tempfile::tempdir().unwrap();
    let sink = CsvSink::new(dir.path()).unwrap();
    let mut rig = rig_with(
        &fast_settings(),
        SimSwitchBoard::new(),
        SimOutletBox::new(),
        SimRadiometer::new(DUMP),
        sink,
    );

    rig.orchestrator.run_init().unwrap();
    rig.orchestrator.run_data_collection().unwrap();
    rig.orchestrator.run_finalize().unwrap();

    let sink = rig.orchestrator.into_sink();
    let environment = std::fs::read_to_string(sink.environment_path()).unwrap();
    assert!(environment.starts_with("timestamp,pressure,temperature,humidity,supply_voltage"));
    let energy = std::fs::read_to_string(sink.energy_path()).unwrap();
    assert!(energy.contains("# start: "));
    assert_eq!(energy.lines().filter(|line| line.ends_with(",0.027")).count(), 1);
}
