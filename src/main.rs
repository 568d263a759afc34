//! laser_daq - apparatus run controller
//!
//! Opens the three serial links, runs the init, data collection and final
//! phases, and writes the run's samples as CSV under `storage.output_dir`.

use anyhow::{Context, Result};
use clap::Parser;
use laser_daq::adapters::SerialTransport;
use laser_daq::data::storage::CsvSink;
use laser_daq::{Orchestrator, Settings};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "laser_daq", version, about = "Laser apparatus run controller")]
struct Args {
    /// Settings file (defaults to config/default.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("laser_daq: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run completed without an emergency shutdown.
fn run() -> Result<bool> {
    let args = Args::parse();
    let settings = Settings::new(args.config.as_deref()).context("Failed to load settings")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.application.log_level.as_str()),
    )
    .init();
    info!("Starting {}", settings.application.name);

    let open = |port: &str, baud_rate: u32| {
        SerialTransport::open(port, baud_rate)
            .with_context(|| format!("Failed to open serial port '{}'", port))
    };
    let switch = open(&settings.switch_board.port, settings.switch_board.baud_rate)?;
    let outlet = open(&settings.outlet_box.port, settings.outlet_box.baud_rate)?;
    let radiometer = open(&settings.radiometer.port, settings.radiometer.baud_rate)?;
    let sink = CsvSink::new(&settings.storage.output_dir).with_context(|| {
        format!(
            "Failed to prepare output directory '{}'",
            settings.storage.output_dir.display()
        )
    })?;

    let mut orchestrator = Orchestrator::new(
        &settings,
        Box::new(switch),
        Box::new(outlet),
        Box::new(radiometer),
        sink,
    )?;

    let outcome = orchestrator
        .run_init()
        .and_then(|()| orchestrator.run_data_collection())
        .and_then(|()| orchestrator.run_finalize());

    if let Some(report) = orchestrator.shutdown_report() {
        let report = serde_json::to_string_pretty(report).context("Failed to encode report")?;
        info!("Shutdown report:\n{}", report);
    }
    let sink = orchestrator.sink();
    info!(
        "Samples written to '{}' and '{}'",
        sink.environment_path().display(),
        sink.energy_path().display()
    );

    match outcome {
        Ok(()) => {
            info!("Run complete");
            Ok(true)
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            Ok(false)
        }
    }
}
