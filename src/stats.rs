//! Statistics collection and export for a design flow.
//!
//! A [`FlowReport`] holds one row per pipeline stage and exports it as JSON,
//! CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::engine::SimulationStats;
use crate::schedule::{Schedule, Stage};
use crate::types::SimTime;

/// Summary of one stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: Stage,
    pub makespan: SimTime,
    pub completion_time: f64,
    pub dma_transfers: usize,
    pub mem_transfers: usize,
    pub spm_tensors: usize,
    pub batch_delays: usize,
    /// Simulator statistics, for simulated stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationStats>,
    /// Wall-clock time spent producing the stage
    pub wall_time_ms: f64,
}

impl StageStats {
    /// Summarizes `schedule`.
    pub fn from_schedule(schedule: &Schedule, wall_time_ms: f64) -> Self {
        Self {
            stage: schedule.stage,
            makespan: schedule.makespan(),
            completion_time: schedule.completion_time(),
            dma_transfers: schedule.dma.len(),
            mem_transfers: schedule.mem.len(),
            spm_tensors: schedule.mapping.spm_count(),
            batch_delays: schedule.batch_delays.len(),
            simulation: None,
            wall_time_ms,
        }
    }

    /// Attaches simulator statistics.
    pub fn with_simulation(mut self, simulation: SimulationStats) -> Self {
        self.simulation = Some(simulation);
        self
    }
}

/// Per-stage statistics of a flow run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowReport {
    /// Model name
    pub name: String,
    pub stages: Vec<StageStats>,
    pub total_wall_time_ms: f64,
}

impl FlowReport {
    /// Creates an empty report.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Statistics of `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Exports the report to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports the report to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports per-stage statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("stage,makespan,completion_time,dma_transfers,mem_transfers,spm_tensors,batch_delays,wall_time_ms\n");
        for s in &self.stages {
            csv.push_str(&format!(
                "{},{},{:.2},{},{},{},{},{:.2}\n",
                s.stage,
                s.makespan,
                s.completion_time,
                s.dma_transfers,
                s.mem_transfers,
                s.spm_tensors,
                s.batch_delays,
                s.wall_time_ms,
            ));
        }
        csv
    }

    /// Exports per-stage statistics to a CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Design Flow ===")?;
        if !self.name.is_empty() {
            writeln!(w, "Model: {}", self.name)?;
        }
        writeln!(w)?;

        for s in &self.stages {
            writeln!(w, "--- {} ---", s.stage)?;
            writeln!(w, "Completion time: {:.2}", s.completion_time)?;
            writeln!(w, "Makespan: {}", s.makespan)?;
            writeln!(w, "Transfers: {} dma, {} mem", s.dma_transfers, s.mem_transfers)?;
            writeln!(w, "SPM tensors: {}", s.spm_tensors)?;
            if s.batch_delays > 0 {
                writeln!(w, "Batch delays: {}", s.batch_delays)?;
            }
            if let Some(ref sim) = s.simulation {
                writeln!(w, "Ticks evaluated: {}, rounds: {}", sim.ticks_evaluated, sim.rounds)?;
            }
        }
        writeln!(w)?;
        writeln!(w, "Wall time: {:.2} ms", self.total_wall_time_ms)?;
        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
