//! Emergency shutdown ordering and idempotence.

mod common;

use common::{off_commands, rig};
use laser_daq::core::{Phase, PowerState};
use laser_daq::error::PowerError;
use laser_daq::hardware::mock::{SimOutletBox, SimSwitchBoard};
use laser_daq::{DaqError, ModuleId};

#[test]
fn test_laser_failure_unwinds_support_modules_in_reverse() {
    let mut rig = rig(SimSwitchBoard::new(), SimOutletBox::new().with_stuck_outlet(2));

    rig.orchestrator.run_init().unwrap();
    let err = rig.orchestrator.run_data_collection().unwrap_err();

    match &err {
        DaqError::Aborted { phase, step, source } => {
            assert_eq!(*phase, Phase::Run);
            assert_eq!(step, "laser on");
            assert!(matches!(
                source.as_ref(),
                DaqError::Power(PowerError::Unverified { raw, .. }) if raw.contains("Outlet 2  : Off")
            ));
        }
        other => panic!("expected abort, got {:?}", other),
    }

    let report = rig.orchestrator.shutdown_report().unwrap();
    assert_eq!(
        report.order(),
        vec![
            ModuleId::Shutter,
            ModuleId::Radiometer,
            ModuleId::Inverter,
            ModuleId::Heater,
            ModuleId::RainMonitor,
        ]
    );
    assert!(report.steps.iter().all(|step| step.outcome == PowerState::Off));
    assert_eq!(
        off_commands(&rig.journal),
        vec!["OFF 3", "OFF 1", "OUT A 0", "OUT B 0", "RMON 0"]
    );
    assert_eq!(rig.orchestrator.sink().flush_count, 1);
    assert_eq!(rig.orchestrator.power_state(ModuleId::Laser), PowerState::Off);
}

#[test]
fn test_shutdown_twice_is_a_no_op() {
    let mut rig = rig(SimSwitchBoard::new(), SimOutletBox::new().with_stuck_outlet(2));
    rig.orchestrator.run_init().unwrap();
    assert!(rig.orchestrator.run_data_collection().is_err());

    let commands = rig.journal.entries().len();
    let report = rig.orchestrator.shutdown_report().cloned();

    rig.orchestrator.emergency_shutdown(Phase::Run, "operator abort");

    assert_eq!(rig.journal.entries().len(), commands);
    assert_eq!(rig.orchestrator.shutdown_report().cloned(), report);
    assert_eq!(rig.orchestrator.sink().flush_count, 1);
}

#[test]
fn test_unverified_switch_is_excluded_from_unwind() {
    let switch = SimSwitchBoard::new().with_reply("OUT B 1", "OUT B\r\n");
    let mut rig = rig(switch, SimOutletBox::new());

    let err = rig.orchestrator.run_init().unwrap_err();
    assert!(matches!(err, DaqError::Aborted { ref step, .. } if step == "heater on"));
    assert_eq!(rig.orchestrator.power_state(ModuleId::Heater), PowerState::Unknown);

    let report = rig.orchestrator.shutdown_report().unwrap();
    assert_eq!(report.order(), vec![ModuleId::RainMonitor]);
    assert_eq!(off_commands(&rig.journal), vec!["RMON 0"]);
    assert!(rig.journal.lines_for("outlet").is_empty());
}

#[test]
fn test_failed_power_off_does_not_stop_unwind() {
    let switch = SimSwitchBoard::new()
        .with_reply("OUT A 0", "\r\n")
        .with_reply("PRESS", "PRESS \r\n");
    let mut rig = rig(switch, SimOutletBox::new());

    rig.orchestrator.run_init().unwrap();
    let err = rig.orchestrator.run_data_collection().unwrap_err();
    assert!(matches!(
        err.root(),
        DaqError::Power(PowerError::MalformedTelemetry { .. })
    ));

    let report = rig.orchestrator.shutdown_report().unwrap();
    assert_eq!(
        report.order(),
        vec![
            ModuleId::Laser,
            ModuleId::Shutter,
            ModuleId::Radiometer,
            ModuleId::Inverter,
            ModuleId::Heater,
            ModuleId::RainMonitor,
        ]
    );
    let inverter = &report.steps[3];
    assert_eq!(inverter.outcome, PowerState::Unknown);
    assert!(inverter.error.is_some());
    assert_eq!(rig.orchestrator.power_state(ModuleId::Heater), PowerState::Off);
    assert_eq!(rig.orchestrator.power_state(ModuleId::RainMonitor), PowerState::Off);

    let sink = rig.orchestrator.sink();
    assert!(sink.environment.is_empty());
    assert_eq!(sink.flush_count, 1);
}

#[test]
fn test_telemetry_abort_keeps_run_bounds() {
    let switch = SimSwitchBoard::new().with_reply("HUMID", "HUMID\r\n");
    let mut rig = rig(switch, SimOutletBox::new());

    rig.orchestrator.run_init().unwrap();
    let err = rig.orchestrator.run_data_collection().unwrap_err();
    assert!(matches!(err, DaqError::Aborted { ref step, .. } if step == "environment telemetry"));

    let sink = rig.orchestrator.sink();
    assert!(sink.environment.is_empty());
    let (start, stop) = sink.run_bounds.expect("run bounds recorded on abort");
    assert!(start <= stop);
}

#[test]
fn test_abort_before_laser_records_no_run_bounds() {
    let mut rig = rig(SimSwitchBoard::new().with_rain("W"), SimOutletBox::new());
    assert!(rig.orchestrator.run_init().is_err());
    assert!(rig.orchestrator.sink().run_bounds.is_none());
}

#[test]
fn test_phases_rejected_after_shutdown() {
    let mut rig = rig(SimSwitchBoard::new(), SimOutletBox::new().with_stuck_outlet(2));
    rig.orchestrator.run_init().unwrap();
    assert!(rig.orchestrator.run_data_collection().is_err());
    assert!(matches!(rig.orchestrator.run_finalize(), Err(DaqError::ShutDown)));
    assert!(rig.orchestrator.is_shut_down());
}
