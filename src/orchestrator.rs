//! Phased lifecycle controller for the apparatus.
//!
//! The [`Orchestrator`] owns both board drivers, the radiometer and every
//! module, and is the only thing that changes the phase or asks a driver to
//! switch power. Its three entry points run strictly in order:
//!
//! ```text
//! run_init            switch board, rain monitor, heater, inverter, rain check,
//!                     outlet box, radiometer (power + configure), shutter
//! run_data_collection rain check, laser on, telemetry / rain loop, laser off
//! run_finalize        shutter off, energy readout, radiometer, inverter,
//!                     heater and rain monitor off, flush
//! ```
//!
//! After every step the resulting state is checked. Any failure runs
//! [`Orchestrator::emergency_shutdown`], which powers off every module that is
//! verified on, most recently powered first, and the entry point returns
//! [`DaqError::Aborted`]. A wet or open rain sensor during the run powers the
//! laser off before anything else is touched.

use crate::adapters::Transport;
use crate::config::{RunSettings, Settings};
use crate::core::{ConfigState, Phase, PowerControllable, PowerRequest, PowerState};
use crate::data::storage::SampleSink;
use crate::error::{AppResult, DaqError, PowerError};
use crate::instrument::{OutletBox, RadiometerDevice, SwitchBoard};
use crate::module::{Board, Module, ModuleId};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of powering one module off during a shutdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShutdownStep {
    /// Module that was switched.
    pub module: ModuleId,
    /// Power state verified afterwards.
    pub outcome: PowerState,
    /// Failure text when the module could not be verified off.
    pub error: Option<String>,
}

/// What happened when the apparatus was brought down.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Phase that was running.
    pub phase: Phase,
    /// Why the apparatus was shut down; `None` after a completed run.
    pub reason: Option<String>,
    /// Emergency power-off steps, in the order they ran.
    pub steps: Vec<ShutdownStep>,
    /// Error from the final sink flush, if any.
    pub flush_error: Option<String>,
}

impl ShutdownReport {
    /// True when the run completed without an emergency shutdown.
    pub fn is_clean(&self) -> bool {
        self.reason.is_none()
    }

    /// Modules in the order the shutdown visited them.
    pub fn order(&self) -> Vec<ModuleId> {
        self.steps.iter().map(|step| step.module).collect()
    }
}

/// Apparatus controller. Generic over where collected samples go.
pub struct Orchestrator<S: SampleSink> {
    run_settings: RunSettings,
    switch_board: SwitchBoard,
    outlet_box: OutletBox,
    radiometer: RadiometerDevice,
    modules: BTreeMap<ModuleId, Module>,
    powered: Vec<ModuleId>,
    phase: Phase,
    next: Option<Phase>,
    run_start: Option<DateTime<Utc>>,
    run_stop: Option<DateTime<Utc>>,
    report: Option<ShutdownReport>,
    sink: S,
}

impl<S: SampleSink> Orchestrator<S> {
    /// Builds the controller over three opened links.
    ///
    /// Fails only when a module address in `settings` cannot be resolved.
    pub fn new(
        settings: &Settings,
        switch_link: Box<dyn Transport>,
        outlet_link: Box<dyn Transport>,
        radiometer_link: Box<dyn Transport>,
        sink: S,
    ) -> AppResult<Self> {
        let mut modules = BTreeMap::new();
        for id in [
            ModuleId::RainMonitor,
            ModuleId::Heater,
            ModuleId::Inverter,
            ModuleId::Shutter,
            ModuleId::Laser,
        ] {
            modules.insert(id, Module::from_settings(id, &settings.modules)?);
        }
        let radiometer = RadiometerDevice::new(
            Module::from_settings(ModuleId::Radiometer, &settings.modules)?,
            radiometer_link,
            settings.radiometer.clone(),
        );

        Ok(Self {
            run_settings: settings.run.clone(),
            switch_board: SwitchBoard::new(switch_link, settings.switch_board.clone()),
            outlet_box: OutletBox::new(outlet_link, settings.outlet_box.clone()),
            radiometer,
            modules,
            powered: Vec::new(),
            phase: Phase::Init,
            next: Some(Phase::Init),
            run_start: None,
            run_stop: None,
            report: None,
            sink,
        })
    }

    /// Phase most recently entered.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last verified power state of a module.
    pub fn power_state(&self, id: ModuleId) -> PowerState {
        match id {
            ModuleId::Radiometer => self.radiometer.power_state(),
            other => self
                .modules
                .get(&other)
                .map(|module| module.power_state())
                .unwrap_or_default(),
        }
    }

    /// True once the apparatus has been brought down, cleanly or not.
    pub fn is_shut_down(&self) -> bool {
        self.report.is_some()
    }

    /// Report of the shutdown, once there has been one.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.report.as_ref()
    }

    /// The radiometer device.
    pub fn radiometer(&self) -> &RadiometerDevice {
        &self.radiometer
    }

    /// The sample sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consumes the controller, returning its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Brings up both boards and every support module.
    pub fn run_init(&mut self) -> AppResult<()> {
        self.enter(Phase::Init)?;

        self.guarded("switch board handshake", |o| {
            o.switch_board.initialize()?;
            ready("switch board", o.switch_board.config_state())
        })?;
        self.guarded("rain monitor on", |o| o.drive(ModuleId::RainMonitor, PowerRequest::On))?;
        self.guarded("heater on", |o| o.drive(ModuleId::Heater, PowerRequest::On))?;
        self.guarded("inverter on", |o| o.drive(ModuleId::Inverter, PowerRequest::On))?;
        self.guarded("rain check", |o| o.check_rain())?;
        self.guarded("outlet box handshake", |o| {
            o.outlet_box.initialize()?;
            ready("outlet box", o.outlet_box.config_state())
        })?;
        self.guarded("radiometer on", |o| o.drive(ModuleId::Radiometer, PowerRequest::On))?;
        self.guarded("radiometer configuration", |o| {
            o.radiometer.init()?;
            ready(o.radiometer.name(), o.radiometer.config_state())
        })?;
        self.guarded("shutter on", |o| o.drive(ModuleId::Shutter, PowerRequest::On))?;

        info!("Init phase complete");
        self.next = Some(Phase::Run);
        Ok(())
    }

    /// Fires the laser for the configured duration while collecting telemetry.
    pub fn run_data_collection(&mut self) -> AppResult<()> {
        self.enter(Phase::Run)?;

        let telemetry_interval = self.run_settings.telemetry_interval;
        let rain_interval = self.run_settings.rain_interval;
        let duration = self.run_settings.duration;
        let longest = telemetry_interval.max(rain_interval);
        self.guarded("run schedule", |_| run_deadline(Instant::now(), duration, longest))?;

        self.guarded("rain check", |o| o.check_rain())?;
        self.guarded("laser on", |o| o.drive(ModuleId::Laser, PowerRequest::On))?;
        self.run_start = Some(Utc::now());

        let started = Instant::now();
        let deadline = self.guarded("run schedule", |_| run_deadline(started, duration, longest))?;
        let mut next_telemetry = started;
        let mut next_rain = started.checked_add(rain_interval).unwrap_or(deadline);

        while Instant::now() < deadline {
            let now = Instant::now();
            if now >= next_rain {
                self.guarded("rain check", |o| o.check_rain())?;
                next_rain = next_rain.checked_add(rain_interval).unwrap_or(deadline);
            }
            if now >= next_telemetry {
                self.guarded("environment telemetry", |o| {
                    let sample = o.switch_board.poll_environment()?;
                    o.sink.record_environment(sample);
                    Ok(())
                })?;
                next_telemetry = next_telemetry.checked_add(telemetry_interval).unwrap_or(deadline);
            }
            let wake = next_rain.min(next_telemetry).min(deadline);
            thread::sleep(wake.saturating_duration_since(Instant::now()));
        }

        self.guarded("laser off", |o| o.drive(ModuleId::Laser, PowerRequest::Off))?;
        self.run_stop = Some(Utc::now());

        info!("Run phase complete");
        self.next = Some(Phase::Final);
        Ok(())
    }

    /// Reads out the run and powers everything down in reverse order.
    pub fn run_finalize(&mut self) -> AppResult<()> {
        self.enter(Phase::Final)?;

        self.guarded("shutter off", |o| o.drive(ModuleId::Shutter, PowerRequest::Off))?;
        self.guarded("energy readout", |o| {
            let burst = o.radiometer.read_energy_burst()?;
            info!("Read {} energy values", burst.energies.len());
            o.sink.record_energy(burst);
            o.record_run_bounds();
            Ok(())
        })?;
        self.guarded("radiometer off", |o| o.drive(ModuleId::Radiometer, PowerRequest::Off))?;
        self.guarded("inverter off", |o| o.drive(ModuleId::Inverter, PowerRequest::Off))?;
        self.guarded("heater off", |o| o.drive(ModuleId::Heater, PowerRequest::Off))?;
        self.guarded("rain monitor off", |o| o.drive(ModuleId::RainMonitor, PowerRequest::Off))?;
        self.radiometer.finalize();

        let flush = self.sink.flush();
        self.next = None;
        self.report = Some(ShutdownReport {
            phase: Phase::Final,
            reason: None,
            steps: Vec::new(),
            flush_error: flush.as_ref().err().map(ToString::to_string),
        });
        flush?;

        info!("Final phase complete, apparatus is off");
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Powers off every module verified on, most recently powered first, then
    /// flushes the sink once.
    ///
    /// A failing step is logged and the unwind continues. Calling this again
    /// after the apparatus is down does nothing.
    pub fn emergency_shutdown(&mut self, phase: Phase, reason: &str) {
        if self.report.is_some() {
            info!("Shutdown requested again ({}), apparatus already down", reason);
            return;
        }
        warn!("EMERGENCY SHUTDOWN during {} phase: {}", phase, reason);

        let order: Vec<ModuleId> = self.powered.iter().rev().copied().collect();
        let mut steps = Vec::new();
        for id in order {
            if self.power_state(id) != PowerState::On {
                continue;
            }
            let error = match self.drive(id, PowerRequest::Off) {
                Ok(()) => None,
                Err(e) => {
                    error!("Shutdown: failed to power off {}: {}", id, e);
                    Some(e.to_string())
                }
            };
            steps.push(ShutdownStep {
                module: id,
                outcome: self.power_state(id),
                error,
            });
        }

        if self.run_start.is_some() {
            if self.run_stop.is_none() {
                self.run_stop = Some(Utc::now());
            }
            self.record_run_bounds();
        }

        let flush_error = self.sink.flush().err().map(|e| {
            error!("Shutdown: failed to flush samples: {}", e);
            e.to_string()
        });

        self.next = None;
        self.report = Some(ShutdownReport {
            phase,
            reason: Some(reason.to_string()),
            steps,
            flush_error,
        });
        info!("Shutdown complete");
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn enter(&mut self, requested: Phase) -> AppResult<()> {
        if self.report.is_some() {
            return Err(DaqError::ShutDown);
        }
        if self.next != Some(requested) {
            return Err(DaqError::OutOfSequence {
                requested,
                current: self.phase,
            });
        }
        self.phase = requested;
        info!("Entering {} phase", requested);
        Ok(())
    }

    /// Runs one step; on failure shuts the apparatus down and wraps the error.
    fn guarded<T>(
        &mut self,
        step: &str,
        action: impl FnOnce(&mut Self) -> AppResult<T>,
    ) -> AppResult<T> {
        info!("{} phase: {}", self.phase, step);
        action(&mut *self).map_err(|e| {
            error!("{} phase: '{}' failed: {}", self.phase, step, e);
            let phase = self.phase;
            self.emergency_shutdown(phase, &format!("{}: {}", step, e));
            DaqError::Aborted {
                phase,
                step: step.to_string(),
                source: Box::new(e),
            }
        })
    }

    /// Switches one module through its board and checks the verified state.
    fn drive(&mut self, id: ModuleId, request: PowerRequest) -> AppResult<()> {
        let module: &mut dyn PowerControllable = match id {
            ModuleId::Radiometer => &mut self.radiometer,
            other => self
                .modules
                .get_mut(&other)
                .ok_or_else(|| DaqError::Configuration(format!("{} is not configured", other)))?,
        };
        match id.board() {
            Board::SwitchBoard => self.switch_board.set(module, request)?,
            Board::OutletBox => self.outlet_box.set(module, request)?,
        }

        let state = module.power_state();
        if state != request.target() {
            return Err(PowerError::Unverified {
                module: id.name().to_string(),
                raw: format!("state {} after verified {:?}", state, request),
            }
            .into());
        }

        self.powered.retain(|powered| *powered != id);
        if request == PowerRequest::On {
            self.powered.push(id);
        }
        Ok(())
    }

    /// Polls the rain sensor. A hazard during the run powers the laser off
    /// before the error propagates.
    fn check_rain(&mut self) -> AppResult<()> {
        let state = self.switch_board.poll_rain()?;
        if !state.is_hazardous() {
            return Ok(());
        }
        warn!("Rain sensor reports {}", state);
        if self.power_state(ModuleId::Laser) == PowerState::On {
            match self.drive(ModuleId::Laser, PowerRequest::Off) {
                Ok(()) => info!("Laser off after rain hazard"),
                Err(e) => error!("Failed to power off laser after rain hazard: {}", e),
            }
            self.run_stop = Some(Utc::now());
            self.record_run_bounds();
        }
        Err(DaqError::RainHazard(state))
    }

    fn record_run_bounds(&mut self) {
        if let (Some(start), Some(stop)) = (self.run_start, self.run_stop) {
            self.sink.set_run_bounds(start, stop);
        }
    }
}

/// End of a run starting at `start`, provided every poll deadline up to one
/// interval past it is representable.
fn run_deadline(start: Instant, duration: Duration, longest_interval: Duration) -> AppResult<Instant> {
    start
        .checked_add(duration)
        .filter(|deadline| deadline.checked_add(longest_interval).is_some())
        .ok_or_else(|| {
            DaqError::Configuration(format!(
                "run duration {:?} is too long to schedule",
                duration
            ))
        })
}

fn ready(device: &str, state: ConfigState) -> AppResult<()> {
    if state == ConfigState::Initialized {
        Ok(())
    } else {
        Err(DaqError::NotReady {
            device: device.to_string(),
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Journal, MockTransport};
    use crate::data::storage::MemorySink;
    use crate::hardware::mock::{SimOutletBox, SimRadiometer, SimSwitchBoard};

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.modules = settings.modules.without_delays();
        settings.outlet_box.confirm_delay = Duration::ZERO;
        settings.radiometer.command_delay = Duration::ZERO;
        settings.run.duration = Duration::from_millis(30);
        settings.run.telemetry_interval = Duration::from_millis(10);
        settings.run.rain_interval = Duration::from_millis(10);
        settings
    }

    fn rig(switch: SimSwitchBoard) -> (Orchestrator<MemorySink>, Journal) {
        let journal = Journal::new();
        let orchestrator = Orchestrator::new(
            &fast_settings(),
            Box::new(switch.into_transport(&journal)),
            Box::new(SimOutletBox::new().into_transport(&journal)),
            Box::new(SimRadiometer::new("0.1 0.2\r\n").into_transport(&journal)),
            MemorySink::new(),
        )
        .unwrap();
        (orchestrator, journal)
    }

    #[test]
    fn test_phases_must_run_in_order() {
        let (mut orchestrator, _) = rig(SimSwitchBoard::new());
        assert!(matches!(
            orchestrator.run_data_collection(),
            Err(DaqError::OutOfSequence {
                requested: Phase::Run,
                current: Phase::Init
            })
        ));
        assert!(!orchestrator.is_shut_down());
    }

    #[test]
    fn test_init_powers_support_modules() {
        let (mut orchestrator, _) = rig(SimSwitchBoard::new());
        orchestrator.run_init().unwrap();
        for id in [
            ModuleId::RainMonitor,
            ModuleId::Heater,
            ModuleId::Inverter,
            ModuleId::Radiometer,
            ModuleId::Shutter,
        ] {
            assert_eq!(orchestrator.power_state(id), PowerState::On, "{}", id);
        }
        assert_eq!(orchestrator.power_state(ModuleId::Laser), PowerState::Unknown);
        assert_eq!(orchestrator.radiometer().config_state(), ConfigState::Initialized);
    }

    #[test]
    fn test_failed_handshake_shuts_down_with_nothing_on() {
        let switch = SimSwitchBoard::new().with_reply("VER", "?\r\n");
        let (mut orchestrator, journal) = rig(switch);
        let err = orchestrator.run_init().unwrap_err();
        assert!(matches!(err, DaqError::Aborted { phase: Phase::Init, .. }));
        let report = orchestrator.shutdown_report().unwrap();
        assert!(report.steps.is_empty());
        assert_eq!(orchestrator.sink().flush_count, 1);
        assert!(journal.lines_for("outlet").is_empty());
    }

    #[test]
    fn test_shutdown_after_shutdown_is_rejected() {
        let switch = SimSwitchBoard::new().with_rain("W");
        let (mut orchestrator, _) = rig(switch);
        assert!(orchestrator.run_init().is_err());
        assert!(matches!(orchestrator.run_init(), Err(DaqError::ShutDown)));
        assert!(matches!(orchestrator.run_finalize(), Err(DaqError::ShutDown)));
    }

    #[test]
    fn test_unschedulable_run_never_fires_laser() {
        let mut settings = fast_settings();
        settings.run.duration = Duration::MAX;
        let journal = Journal::new();
        let mut orchestrator = Orchestrator::new(
            &settings,
            Box::new(SimSwitchBoard::new().into_transport(&journal)),
            Box::new(SimOutletBox::new().into_transport(&journal)),
            Box::new(SimRadiometer::new("").into_transport(&journal)),
            MemorySink::new(),
        )
        .unwrap();

        orchestrator.run_init().unwrap();
        let err = orchestrator.run_data_collection().unwrap_err();
        assert!(matches!(err, DaqError::Aborted { ref step, .. } if step == "run schedule"));
        assert!(matches!(err.root(), DaqError::Configuration(_)));
        assert!(!journal.lines_for("outlet").contains(&"ON 2".to_string()));
        assert_eq!(orchestrator.power_state(ModuleId::Shutter), PowerState::Off);
    }

    #[test]
    fn test_report_order() {
        let report = ShutdownReport {
            phase: Phase::Run,
            reason: Some("laser on".into()),
            steps: vec![
                ShutdownStep {
                    module: ModuleId::Shutter,
                    outcome: PowerState::Off,
                    error: None,
                },
                ShutdownStep {
                    module: ModuleId::Heater,
                    outcome: PowerState::Unknown,
                    error: Some("unverified".into()),
                },
            ],
            flush_error: None,
        };
        assert!(!report.is_clean());
        assert_eq!(report.order(), vec![ModuleId::Shutter, ModuleId::Heater]);
    }

    #[test]
    fn test_unconfigured_link_errors_are_step_errors() {
        let journal = Journal::new();
        let dead = MockTransport::new("switch", |_: &str| None::<String>).with_journal(journal.clone());
        let mut orchestrator = Orchestrator::new(
            &fast_settings(),
            Box::new(dead),
            Box::new(SimOutletBox::new().into_transport(&journal)),
            Box::new(SimRadiometer::new("").into_transport(&journal)),
            MemorySink::new(),
        )
        .unwrap();
        let err = orchestrator.run_init().unwrap_err();
        assert!(matches!(err.root(), DaqError::Device(_)));
        assert_eq!(orchestrator.shutdown_report().unwrap().phase, Phase::Init);
    }
}
