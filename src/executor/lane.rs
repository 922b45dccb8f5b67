//! Sequential task lane.
//!
//! The lane owns the head-of-line task and moves it through its phases. A
//! task only leaves `Ready` once every dependency is published on the
//! completion board; the next task of the lane is not looked at until the
//! current one is complete, output write-back included.

use crate::executor::{Execution, LaneExecutor, LaneKey, LaneStep, LaneTask};
use crate::shared::SharedState;
use crate::types::SimTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Waiting for dependencies
    Ready,
    /// Input requests emitted, `outstanding` grants still to arrive
    AwaitingInputs { outstanding: usize, until: SimTime },
    TransferringIn { until: SimTime },
    Executing { start: SimTime, end: SimTime },
    /// Output request emitted
    AwaitingOutput,
    TransferringOut { until: SimTime },
}

/// Statistics collected by a lane.
#[derive(Clone, Debug, Default)]
pub struct LaneStats {
    pub tasks_completed: u64,
    /// Time spent executing
    pub busy_time: SimTime,
    /// Time spent waiting for input transfers
    pub input_wait: SimTime,
    pub transfers_requested: u64,
}

/// A lane running its tasks in the given order.
pub struct TaskLane {
    key: LaneKey,
    tasks: Vec<LaneTask>,
    cursor: usize,
    phase: Phase,
    /// When the current task's inputs were requested
    requested_at: SimTime,
    executions: Vec<Execution>,
    stats: LaneStats,
}

impl TaskLane {
    /// Creates a lane over `tasks`, which run in the given order.
    pub fn new(key: LaneKey, tasks: Vec<LaneTask>) -> Self {
        Self {
            key,
            tasks,
            cursor: 0,
            phase: Phase::Ready,
            requested_at: 0,
            executions: Vec::new(),
            stats: LaneStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &LaneStats {
        &self.stats
    }

    /// Number of tasks on the lane.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl LaneExecutor for TaskLane {
    fn key(&self) -> &LaneKey {
        &self.key
    }

    fn step(&mut self, shared: &SharedState) -> LaneStep {
        let now = shared.clock.now();
        let mut out = LaneStep::default();

        while let Some(task) = self.tasks.get(self.cursor) {
            match self.phase {
                Phase::Ready => {
                    if !task.deps.iter().all(|&d| shared.board.is_complete(d)) {
                        break;
                    }
                    out.progressed = true;
                    if task.inputs.is_empty() {
                        tracing::trace!(lane = %self.key, task = task.id, time = now, "task started");
                        self.phase = Phase::Executing {
                            start: now,
                            end: now + task.extime,
                        };
                        continue;
                    }
                    self.requested_at = now;
                    self.stats.transfers_requested += task.inputs.len() as u64;
                    out.requests.extend(task.inputs.iter().cloned());
                    self.phase = Phase::AwaitingInputs {
                        outstanding: task.inputs.len(),
                        until: now,
                    };
                    break;
                }
                Phase::AwaitingInputs { .. } | Phase::AwaitingOutput => break,
                Phase::TransferringIn { until } => {
                    if now < until {
                        break;
                    }
                    out.progressed = true;
                    self.stats.input_wait += now - self.requested_at;
                    tracing::trace!(lane = %self.key, task = task.id, time = now, "task started");
                    self.phase = Phase::Executing {
                        start: now,
                        end: now + task.extime,
                    };
                }
                Phase::Executing { start, end } => {
                    if now < end {
                        break;
                    }
                    out.progressed = true;
                    self.executions.push(Execution {
                        task: task.id,
                        start,
                        end,
                    });
                    self.stats.busy_time += task.extime;
                    tracing::debug!(lane = %self.key, task = task.id, start, end, "task executed");

                    match &task.output {
                        Some(plan) => {
                            self.stats.transfers_requested += 1;
                            out.requests.push(plan.clone());
                            self.phase = Phase::AwaitingOutput;
                            break;
                        }
                        None => {
                            out.completed.push(task.id);
                            self.stats.tasks_completed += 1;
                            self.cursor += 1;
                            self.phase = Phase::Ready;
                        }
                    }
                }
                Phase::TransferringOut { until } => {
                    if now < until {
                        break;
                    }
                    out.progressed = true;
                    out.completed.push(task.id);
                    self.stats.tasks_completed += 1;
                    self.cursor += 1;
                    self.phase = Phase::Ready;
                }
            }
        }

        out
    }

    fn grant(&mut self, _start: SimTime, end: SimTime) {
        self.phase = match self.phase {
            Phase::AwaitingInputs { outstanding, until } => {
                let until = until.max(end);
                if outstanding <= 1 {
                    Phase::TransferringIn { until }
                } else {
                    Phase::AwaitingInputs {
                        outstanding: outstanding - 1,
                        until,
                    }
                }
            }
            Phase::AwaitingOutput => Phase::TransferringOut { until: end },
            other => {
                tracing::warn!(lane = %self.key, "grant delivered with no outstanding request");
                other
            }
        };
    }

    fn next_wake(&self) -> Option<SimTime> {
        if self.is_finished() {
            return None;
        }
        match self.phase {
            Phase::TransferringIn { until } | Phase::TransferringOut { until } => Some(until),
            Phase::Executing { end, .. } => Some(end),
            Phase::Ready | Phase::AwaitingInputs { .. } | Phase::AwaitingOutput => None,
        }
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.tasks.len()
    }

    fn remaining(&self) -> usize {
        self.tasks.len() - self.cursor
    }

    fn executions(&self) -> &[Execution] {
        &self.executions
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "lane": self.key.to_string(),
            "tasks": self.tasks.len(),
            "tasks_completed": self.stats.tasks_completed,
            "busy_time": self.stats.busy_time,
            "input_wait": self.stats.input_wait,
            "transfers_requested": self.stats.transfers_requested,
        })
    }
}
