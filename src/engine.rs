//! Discrete-event execution simulator.
//!
//! The [`Simulator`] advances a shared virtual clock tick by tick. At every
//! evaluated tick it runs rounds:
//!
//! 1. every lane steps against the current completion board (in parallel with
//!    the `parallel` feature);
//! 2. in lane order, completions are published and transfer requests are
//!    granted on the exclusive channels;
//!
//! until no lane makes progress. The clock then jumps to the first tick
//! boundary at or after the earliest lane wake-up time, which yields the same
//! timings as evaluating every tick. If lanes still hold tasks but none can
//! ever wake, the run fails with [`SchedError::Deadlock`].

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::channel::{TimeAlignment, TransferChannel};
use crate::config::AcceleratorConfig;
use crate::error::{SchedError, SchedResult};
use crate::executor::{plan_lanes, LaneExecutor, LaneStep, TaskLane};
use crate::graph::TaskGraph;
use crate::mapping::TaskMapping;
use crate::schedule::{Schedule, Stage, TransferRecord};
use crate::shared::SharedState;
use crate::stats::Timer;
use crate::types::{SimTime, TaskId};

/// Statistics collected by one simulator run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Virtual time at which the last task completed
    pub final_time: SimTime,
    /// Distinct clock values evaluated
    pub ticks_evaluated: u64,
    /// Lane-step rounds across all ticks
    pub rounds: u64,
    /// Tasks per lane
    pub lanes: BTreeMap<String, usize>,
    pub channels: Vec<TransferChannel>,
    pub wall_time_ms: f64,
}

impl SimulationStats {
    /// Export statistics.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "final_time": self.final_time,
            "ticks_evaluated": self.ticks_evaluated,
            "rounds": self.rounds,
            "lanes": self.lanes,
            "channels": self.channels.iter().map(TransferChannel::export_stats).collect::<Vec<_>>(),
            "wall_time_ms": self.wall_time_ms,
        })
    }
}

/// Simulates a mapped schedule on the configured accelerator.
#[derive(Clone, Debug)]
pub struct Simulator {
    config: AcceleratorConfig,
}

impl Simulator {
    /// Creates a simulator.
    pub fn new(config: AcceleratorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Runs `order` under `mapping` and returns the observed schedule.
    pub fn run(
        &self,
        graph: &TaskGraph,
        order: &[TaskId],
        mapping: Arc<TaskMapping>,
        stage: Stage,
    ) -> SchedResult<Schedule> {
        self.simulate(graph, order, mapping, stage).map(|(s, _)| s)
    }

    /// Like [`Simulator::run`], also returning run statistics.
    pub fn simulate(
        &self,
        graph: &TaskGraph,
        order: &[TaskId],
        mapping: Arc<TaskMapping>,
        stage: Stage,
    ) -> SchedResult<(Schedule, SimulationStats)> {
        let timer = Timer::start();

        if order.len() != graph.task_count() {
            tracing::error!(
                expected = graph.task_count(),
                produced = order.len(),
                "order does not cover the graph"
            );
            return Err(SchedError::OrderMismatch {
                expected: graph.task_count(),
                produced: order.len(),
            });
        }

        let plans = plan_lanes(graph, order, &mapping, &self.config)?;
        let mut stats = SimulationStats::default();
        let mut lanes: Vec<Box<dyn LaneExecutor>> = Vec::with_capacity(plans.len());
        for (key, tasks) in plans {
            stats.lanes.insert(key.to_string(), tasks.len());
            lanes.push(Box::new(TaskLane::new(key, tasks)));
        }

        let shared = SharedState::new(order.iter().copied());
        let mut schedule = Schedule::new(stage, mapping);
        let tick = self.config.tick;

        loop {
            stats.ticks_evaluated += 1;
            let now = shared.clock.now();

            loop {
                stats.rounds += 1;
                let steps = step_all(&mut lanes, &shared);

                let mut progressed = false;
                for (lane, step) in lanes.iter_mut().zip(steps) {
                    progressed |= step.progressed;
                    for task in step.completed {
                        shared.board.publish(task, now);
                        tracing::trace!(task, time = now, "task complete");
                    }
                    for plan in step.requests {
                        let (start, end) = shared.reserve(plan.channel, plan.duration);
                        lane.grant(start, end);
                        tracing::debug!(
                            src = plan.src,
                            dst = ?plan.dst,
                            channel = %plan.channel,
                            start,
                            end,
                            "transfer granted"
                        );
                        schedule.record_transfer(TransferRecord {
                            src: plan.src,
                            dst: plan.dst,
                            channel: plan.channel,
                            start,
                            end,
                        });
                        progressed = true;
                    }
                }
                if !progressed {
                    break;
                }
            }

            if lanes.iter().all(|l| l.is_finished()) {
                stats.final_time = now;
                break;
            }

            match lanes.iter().filter_map(|l| l.next_wake()).min() {
                Some(wake) => {
                    let next = TimeAlignment::ceil_to_tick(wake.max(now + 1), tick);
                    shared.clock.advance_to(next);
                }
                None => {
                    let pending: usize = lanes.iter().map(|l| l.remaining()).sum();
                    tracing::error!(time = now, pending, "simulation deadlocked");
                    return Err(SchedError::Deadlock { time: now, pending });
                }
            }
        }

        for lane in &lanes {
            for e in lane.executions() {
                schedule.record_task(e.task, e.start, e.end);
            }
        }
        stats.channels = shared.channels().to_vec();
        stats.wall_time_ms = timer.elapsed_ms();

        tracing::info!(
            stage = %stage,
            makespan = schedule.makespan(),
            ticks = stats.ticks_evaluated,
            dma = schedule.dma.len(),
            mem = schedule.mem.len(),
            elapsed_ms = stats.wall_time_ms,
            "simulation done"
        );
        Ok((schedule, stats))
    }
}

#[cfg(feature = "parallel")]
fn step_all(lanes: &mut [Box<dyn LaneExecutor>], shared: &SharedState) -> Vec<LaneStep> {
    lanes.par_iter_mut().map(|lane| lane.step(shared)).collect()
}

#[cfg(not(feature = "parallel"))]
fn step_all(lanes: &mut [Box<dyn LaneExecutor>], shared: &SharedState) -> Vec<LaneStep> {
    lanes.iter_mut().map(|lane| lane.step(shared)).collect()
}
