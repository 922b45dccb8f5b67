//! Execution lanes of the simulator.
//!
//! Every distinct resource grouping runs as one lane: all CPU tasks share a
//! single lane, and NPU tasks are grouped by `(tile, op class)`. A lane runs
//! its tasks strictly in topological-order sequence, one at a time, walking
//! each through
//!
//! `pending -> ready -> transferring-in -> executing -> transferring-out -> complete`
//!
//! Lanes never touch shared channels directly. They emit transfer requests and
//! the engine grants them between rounds, in lane order, so runs are
//! reproducible regardless of thread scheduling.

pub mod lane;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::channel::{transfer_duration, ChannelKind};
use crate::config::AcceleratorConfig;
use crate::error::{SchedError, SchedResult};
use crate::graph::TaskGraph;
use crate::mapping::{BufferLocation, MappingEntry, Resource, TaskMapping};
use crate::shared::SharedState;
use crate::types::{SimTime, TaskId, TileId};

pub use lane::TaskLane;

/// Identity of an execution lane. Lanes are processed in this order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LaneKey {
    Cpu,
    Npu { tile: TileId, op: String },
}

impl LaneKey {
    /// Lane a mapped task runs on.
    pub fn of(entry: &MappingEntry) -> Self {
        match entry.resource {
            Resource::Cpu => LaneKey::Cpu,
            Resource::Npu => LaneKey::Npu {
                tile: entry.tile,
                op: entry.op.clone(),
            },
        }
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::Cpu => write!(f, "cpu"),
            LaneKey::Npu { tile, op } => write!(f, "npu_{}_{}", tile, op),
        }
    }
}

/// One transfer a task needs before or after it executes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    /// Producer of the tensor
    pub src: TaskId,
    /// Consumer, or `None` for an output write-back
    pub dst: Option<TaskId>,
    pub channel: ChannelKind,
    pub duration: SimTime,
}

/// A task prepared for a lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneTask {
    pub id: TaskId,
    pub extime: SimTime,
    pub deps: Vec<TaskId>,
    pub inputs: Vec<TransferPlan>,
    pub output: Option<TransferPlan>,
}

/// Observable result of a single lane step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaneStep {
    /// The lane changed state
    pub progressed: bool,
    /// Transfers to grant, in request order
    pub requests: Vec<TransferPlan>,
    /// Tasks that became complete during this step
    pub completed: Vec<TaskId>,
}

/// Execution record of one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub task: TaskId,
    pub start: SimTime,
    pub end: SimTime,
}

/// A simulated execution lane.
///
/// `step` may run concurrently with other lanes and must only read the
/// shared state; grants are delivered afterwards, one per emitted request.
pub trait LaneExecutor: Send {
    /// Identity of the lane.
    fn key(&self) -> &LaneKey;

    /// Advances as far as possible at the current clock time.
    fn step(&mut self, shared: &SharedState) -> LaneStep;

    /// Delivers the channel reservation of the oldest ungranted request.
    fn grant(&mut self, start: SimTime, end: SimTime);

    /// Earliest time at which the lane can progress without outside help.
    fn next_wake(&self) -> Option<SimTime>;

    /// Returns true once every task of the lane is complete.
    fn is_finished(&self) -> bool;

    /// Number of tasks not yet complete.
    fn remaining(&self) -> usize;

    /// Execution records collected so far.
    fn executions(&self) -> &[Execution];

    /// Export statistics collected during simulation.
    fn export_stats(&self) -> serde_json::Value;
}

/// Channel carrying the output of `dep` into `consumer`, if any.
pub fn input_channel(dep: &MappingEntry, consumer: &MappingEntry) -> Option<ChannelKind> {
    match (dep.buffer, consumer.resource) {
        (BufferLocation::Mem, Resource::Cpu) => Some(ChannelKind::Mem),
        (BufferLocation::Mem, Resource::Npu) => Some(ChannelKind::Dma),
        (BufferLocation::Spm, Resource::Cpu) => Some(ChannelKind::Dma),
        (BufferLocation::Spm, Resource::Npu) => {
            if dep.resource == Resource::Npu && dep.tile == consumer.tile {
                None
            } else {
                Some(ChannelKind::Dma)
            }
        }
    }
}

/// Channel carrying the output of `task` to its buffer, if any.
pub fn output_channel(task: &MappingEntry) -> Option<ChannelKind> {
    match (task.buffer, task.resource) {
        (BufferLocation::Mem, Resource::Cpu) => Some(ChannelKind::Mem),
        (BufferLocation::Mem, Resource::Npu) => Some(ChannelKind::Dma),
        (BufferLocation::Spm, Resource::Cpu) => Some(ChannelKind::Dma),
        (BufferLocation::Spm, Resource::Npu) => None,
    }
}

/// Groups `order` into lanes and resolves every task's durations and transfers.
///
/// Fails if a task is unmapped or lacks the execution time or tensor size the
/// run needs.
pub fn plan_lanes(
    graph: &TaskGraph,
    order: &[TaskId],
    mapping: &TaskMapping,
    config: &AcceleratorConfig,
) -> SchedResult<BTreeMap<LaneKey, Vec<LaneTask>>> {
    let duration = |size: u64, channel: ChannelKind| {
        let params = match channel {
            ChannelKind::Dma => &config.dma,
            ChannelKind::Mem => &config.mem,
        };
        transfer_duration(size, config.bit_precision, params)
    };

    let mut lanes: BTreeMap<LaneKey, Vec<LaneTask>> = BTreeMap::new();
    for &id in order {
        if !graph.contains(id) {
            return Err(SchedError::UnknownTask(id));
        }
        let entry = mapping.entry(id)?;
        let extime = graph.extime(id, entry.resource)?;

        let deps = graph.dependencies(id).to_vec();
        let mut inputs = Vec::new();
        for &d in &deps {
            let dep_entry = mapping.entry(d)?;
            if let Some(channel) = input_channel(dep_entry, entry) {
                inputs.push(TransferPlan {
                    src: d,
                    dst: Some(id),
                    channel,
                    duration: duration(graph.tensor(d)?, channel),
                });
            }
        }

        let output = match output_channel(entry) {
            Some(channel) => Some(TransferPlan {
                src: id,
                dst: None,
                channel,
                duration: duration(graph.tensor(id)?, channel),
            }),
            None => None,
        };

        lanes.entry(LaneKey::of(entry)).or_default().push(LaneTask {
            id,
            extime,
            deps,
            inputs,
            output,
        });
    }
    Ok(lanes)
}
