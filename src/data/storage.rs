//! Sample sinks with clean feature flag handling.
use crate::core::{EnergySample, EnvironmentSample};
use chrono::{DateTime, Utc};
use std::io;

/// Destination for the samples of one apparatus run.
///
/// The orchestrator hands samples over by value; a sink may buffer them until
/// [`SampleSink::flush`].
pub trait SampleSink {
    /// Stores one round of environment telemetry.
    fn record_environment(&mut self, sample: EnvironmentSample);

    /// Stores one radiometer burst.
    fn record_energy(&mut self, sample: EnergySample);

    /// Stores the laser-on and laser-off times of the run.
    fn set_run_bounds(&mut self, start: DateTime<Utc>, stop: DateTime<Utc>);

    /// Persists everything recorded so far.
    fn flush(&mut self) -> io::Result<()>;
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Environment samples, in arrival order
    pub environment: Vec<EnvironmentSample>,
    /// Energy bursts, in arrival order
    pub energy: Vec<EnergySample>,
    /// Laser-on and laser-off times
    pub run_bounds: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Number of `flush` calls
    pub flush_count: usize,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSink for MemorySink {
    fn record_environment(&mut self, sample: EnvironmentSample) {
        self.environment.push(sample);
    }

    fn record_energy(&mut self, sample: EnergySample) {
        self.energy.push(sample);
    }

    fn set_run_bounds(&mut self, start: DateTime<Utc>, stop: DateTime<Utc>) {
        self.run_bounds = Some((start, stop));
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_count += 1;
        Ok(())
    }
}

// ============================================================================
// CSV sink
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    /// Writes a run's samples as CSV files in one directory.
    ///
    /// Each run gets `run_<stamp>_environment.csv` and `run_<stamp>_energy.csv`.
    /// The energy file starts with `#` comment lines holding the run bounds.
    pub struct CsvSink {
        environment_path: PathBuf,
        energy_path: PathBuf,
        environment: Vec<EnvironmentSample>,
        energy: Vec<EnergySample>,
        run_bounds: Option<(DateTime<Utc>, DateTime<Utc>)>,
        environment_writer: Option<csv::Writer<File>>,
        energy_writer: Option<csv::Writer<File>>,
    }

    impl CsvSink {
        /// Prepares a sink writing under `dir`, creating it if needed.
        pub fn new(dir: &Path) -> io::Result<Self> {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let sink = Self {
                environment_path: dir.join(format!("run_{}_environment.csv", stamp)),
                energy_path: dir.join(format!("run_{}_energy.csv", stamp)),
                environment: Vec::new(),
                energy: Vec::new(),
                run_bounds: None,
                environment_writer: None,
                energy_writer: None,
            };
            log::info!("CSV sink initialized at '{}'.", dir.display());
            Ok(sink)
        }

        /// Path of the environment file.
        pub fn environment_path(&self) -> &Path {
            &self.environment_path
        }

        /// Path of the energy file.
        pub fn energy_path(&self) -> &Path {
            &self.energy_path
        }

        fn open(path: &Path) -> io::Result<File> {
            OpenOptions::new().create(true).append(true).open(path)
        }

        fn flush_environment(&mut self) -> io::Result<()> {
            if self.environment.is_empty() {
                return Ok(());
            }
            if self.environment_writer.is_none() {
                let file = Self::open(&self.environment_path)?;
                self.environment_writer = Some(csv::Writer::from_writer(file));
            }
            if let Some(writer) = self.environment_writer.as_mut() {
                for sample in self.environment.drain(..) {
                    writer.serialize(&sample)?;
                }
                writer.flush()?;
            }
            Ok(())
        }

        fn flush_energy(&mut self) -> io::Result<()> {
            if self.energy.is_empty() && self.run_bounds.is_none() {
                return Ok(());
            }
            if self.energy_writer.is_none() {
                let mut file = Self::open(&self.energy_path)?;
                if let Some((start, stop)) = self.run_bounds {
                    writeln!(file, "# start: {}", start.to_rfc3339())?;
                    writeln!(file, "# stop: {}", stop.to_rfc3339())?;
                }
                let mut writer = csv::Writer::from_writer(file);
                writer.write_record(["timestamp", "shot", "energy"])?;
                self.energy_writer = Some(writer);
            }
            if let Some(writer) = self.energy_writer.as_mut() {
                for burst in self.energy.drain(..) {
                    let timestamp = burst.timestamp.to_rfc3339();
                    for (shot, energy) in burst.energies.iter().enumerate() {
                        writer.write_record(&[
                            timestamp.clone(),
                            shot.to_string(),
                            energy.to_string(),
                        ])?;
                    }
                }
                writer.flush()?;
            }
            Ok(())
        }
    }

    impl SampleSink for CsvSink {
        fn record_environment(&mut self, sample: EnvironmentSample) {
            self.environment.push(sample);
        }

        fn record_energy(&mut self, sample: EnergySample) {
            self.energy.push(sample);
        }

        fn set_run_bounds(&mut self, start: DateTime<Utc>, stop: DateTime<Utc>) {
            self.run_bounds = Some((start, stop));
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flush_environment()?;
            self.flush_energy()?;
            log::info!("CSV sink flushed.");
            Ok(())
        }
    }

}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvSink;
