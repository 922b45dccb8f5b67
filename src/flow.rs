//! End-to-end design flow.
//!
//! Runs every stage in order and hands each produced schedule to a
//! [`ResultSink`]:
//!
//! | Stage | Produced by |
//! |-------|-------------|
//! | `steuni` | simulation of the heuristic mapping |
//! | `opmap` | simulation after tile balancing |
//! | `actmap` | simulation after scratchpad placement |
//! | `stepar` | copy of `actmap` |
//! | `ipcschd` | critical-path rescheduling of `stepar` |
//! | `parschd` | batch-delay analysis of `ipcschd` |
//!
//! The flow stops at the first error; stages that already reached the sink
//! stay there.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::actmap::{actmap, ActMapResult};
use crate::config::AcceleratorConfig;
use crate::engine::Simulator;
use crate::error::SchedResult;
use crate::graph::TaskGraph;
use crate::ipc::ipcschd;
use crate::mapping::{heuristic_map, TaskMapping};
use crate::opmap::{npu_candidates, opmap, TileAssignment};
use crate::order::steuni;
use crate::pipelining::parschd;
use crate::schedule::{Schedule, Stage};
use crate::solver::{GoodLpSolver, MilpSolver};
use crate::stats::{FlowReport, StageStats, Timer};
use crate::types::TaskId;

/// Consumer of the schedules a flow produces.
pub trait ResultSink {
    /// Receives one stage's schedule.
    fn accept(&mut self, schedule: &Schedule) -> SchedResult<()>;

    /// Called once after the last stage.
    fn finish(&mut self) -> SchedResult<()> {
        Ok(())
    }
}

/// Keeps every schedule in memory, keyed by stage.
#[derive(Debug, Default)]
pub struct MemorySink {
    schedules: BTreeMap<Stage, Schedule>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule of `stage`, if received.
    pub fn get(&self, stage: Stage) -> Option<&Schedule> {
        self.schedules.get(&stage)
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Consumes the sink.
    pub fn into_schedules(self) -> BTreeMap<Stage, Schedule> {
        self.schedules
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, schedule: &Schedule) -> SchedResult<()> {
        self.schedules.insert(schedule.stage, schedule.clone());
        Ok(())
    }
}

/// Writes all schedules to one pretty-printed JSON document keyed by stage name.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    schedules: BTreeMap<&'static str, Schedule>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schedules: BTreeMap::new(),
        }
    }
}

impl ResultSink for JsonFileSink {
    fn accept(&mut self, schedule: &Schedule) -> SchedResult<()> {
        self.schedules.insert(schedule.stage.name(), schedule.clone());
        Ok(())
    }

    fn finish(&mut self) -> SchedResult<()> {
        let json = serde_json::to_string_pretty(&self.schedules)?;
        std::fs::write(&self.path, json)?;
        tracing::info!(path = %self.path.display(), stages = self.schedules.len(), "schedules written");
        Ok(())
    }
}

/// Everything a flow run decided, besides the schedules themselves.
#[derive(Clone, Debug)]
pub struct FlowOutcome {
    pub order: Vec<TaskId>,
    pub tiles: BTreeMap<TaskId, TileAssignment>,
    pub placement: ActMapResult,
    /// Mapping used by the final stages
    pub mapping: Arc<TaskMapping>,
    pub report: FlowReport,
}

/// The full scheduling pipeline.
pub struct DesignFlow {
    name: String,
    config: AcceleratorConfig,
    solver: Box<dyn MilpSolver>,
}

impl DesignFlow {
    /// Creates a flow using the bundled solver.
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            name: String::new(),
            config,
            solver: Box::new(GoodLpSolver::new()),
        }
    }

    /// Sets the model name used in logs and reports.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the solver.
    pub fn with_solver(mut self, solver: impl MilpSolver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Runs every stage on `graph`.
    pub fn run(&self, graph: &TaskGraph, sink: &mut dyn ResultSink) -> SchedResult<FlowOutcome> {
        let total = Timer::start();
        self.config.validate()?;
        let solver = self.solver.as_ref();
        let sim = Simulator::new(self.config.clone());
        let mut report = FlowReport::new(self.name.clone());

        tracing::info!(
            model = %self.name,
            tasks = graph.task_count(),
            edges = graph.edge_count(),
            "design flow started"
        );

        // steuni
        let timer = Timer::start();
        let order = steuni(graph)?;
        let base = Arc::new(heuristic_map(graph, &self.config)?);
        let (steuni_schd, stats) = sim.simulate(graph, &order, base.clone(), Stage::Steuni)?;
        sink.accept(&steuni_schd)?;
        report
            .stages
            .push(StageStats::from_schedule(&steuni_schd, timer.elapsed_ms()).with_simulation(stats));

        // opmap
        let timer = Timer::start();
        let candidates = npu_candidates(graph, &order, &self.config)?;
        let tiles = opmap(graph, &candidates, &self.config, solver)?;
        let opmap_map = Arc::new(base.with_tiles(&tiles)?);
        let (opmap_schd, stats) = sim.simulate(graph, &order, opmap_map.clone(), Stage::Opmap)?;
        sink.accept(&opmap_schd)?;
        report
            .stages
            .push(StageStats::from_schedule(&opmap_schd, timer.elapsed_ms()).with_simulation(stats));

        // actmap
        let timer = Timer::start();
        let placement = actmap(graph, &opmap_map, &self.config, solver)?;
        let actmap_map = Arc::new(opmap_map.with_spm(&placement.spm_tasks())?);
        tracing::info!(spm = actmap_map.spm_count(), total = actmap_map.len(), "tensors placed in scratchpad");
        let (actmap_schd, stats) = sim.simulate(graph, &order, actmap_map.clone(), Stage::Actmap)?;
        sink.accept(&actmap_schd)?;
        report
            .stages
            .push(StageStats::from_schedule(&actmap_schd, timer.elapsed_ms()).with_simulation(stats));

        // stepar
        let stepar_schd = actmap_schd.relabel(Stage::Stepar);
        sink.accept(&stepar_schd)?;
        report.stages.push(StageStats::from_schedule(&stepar_schd, 0.0));

        // ipcschd
        let timer = Timer::start();
        let ipc_schd = ipcschd(graph, &stepar_schd, solver)?;
        sink.accept(&ipc_schd)?;
        report
            .stages
            .push(StageStats::from_schedule(&ipc_schd, timer.elapsed_ms()));

        // parschd
        let timer = Timer::start();
        let par_schd = parschd(graph, &ipc_schd);
        sink.accept(&par_schd)?;
        report
            .stages
            .push(StageStats::from_schedule(&par_schd, timer.elapsed_ms()));

        sink.finish()?;
        report.total_wall_time_ms = total.elapsed_ms();

        tracing::info!(
            model = %self.name,
            steuni = steuni_schd.completion_time(),
            opmap = opmap_schd.completion_time(),
            actmap = actmap_schd.completion_time(),
            stepar = stepar_schd.completion_time(),
            ipcschd = ipc_schd.completion_time(),
            parschd = par_schd.completion_time(),
            elapsed_ms = report.total_wall_time_ms,
            "design flow done"
        );

        Ok(FlowOutcome {
            order,
            tiles,
            placement,
            mapping: actmap_map,
            report,
        })
    }
}
