//! Timing schedules produced by the pipeline stages.
//!
//! A [`Schedule`] is never edited once produced. Later stages derive new
//! schedules, and each one keeps a shared handle to the mapping it ran with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::channel::ChannelKind;
use crate::mapping::TaskMapping;
use crate::types::{SimTime, TaskId};

/// Pipeline stage a schedule belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Steuni,
    Opmap,
    Actmap,
    Stepar,
    Ipcschd,
    Parschd,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Steuni,
        Stage::Opmap,
        Stage::Actmap,
        Stage::Stepar,
        Stage::Ipcschd,
        Stage::Parschd,
    ];

    /// Stage name as used in results.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Steuni => "steuni",
            Stage::Opmap => "opmap",
            Stage::Actmap => "actmap",
            Stage::Stepar => "stepar",
            Stage::Ipcschd => "ipcschd",
            Stage::Parschd => "parschd",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// One observed transfer on a shared channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub src: TaskId,
    /// Consumer, or `None` for an output write-back
    pub dst: Option<TaskId>,
    pub channel: ChannelKind,
    pub start: SimTime,
    pub end: SimTime,
}

impl TransferRecord {
    pub fn duration(&self) -> SimTime {
        self.end - self.start
    }

    /// Returns true if the two intervals share any instant.
    pub fn overlaps(&self, other: &TransferRecord) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Synthetic node standing for a transfer in the rescheduled graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommActor {
    pub src: TaskId,
    pub dst: TaskId,
    pub channel: ChannelKind,
}

/// Start/end times of every task plus the transfers observed along the way.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub stage: Stage,
    pub start: BTreeMap<TaskId, SimTime>,
    pub end: BTreeMap<TaskId, SimTime>,
    pub dma: Vec<TransferRecord>,
    pub mem: Vec<TransferRecord>,
    /// Accepted batch-launch offsets
    #[serde(default)]
    pub batch_delays: Vec<SimTime>,
    /// Communication actors, keyed by their node id
    #[serde(default)]
    pub comm_actors: BTreeMap<TaskId, CommActor>,
    pub mapping: Arc<TaskMapping>,
}

impl Schedule {
    /// Creates an empty schedule for `stage`.
    pub fn new(stage: Stage, mapping: Arc<TaskMapping>) -> Self {
        Self {
            stage,
            start: BTreeMap::new(),
            end: BTreeMap::new(),
            dma: Vec::new(),
            mem: Vec::new(),
            batch_delays: Vec::new(),
            comm_actors: BTreeMap::new(),
            mapping,
        }
    }

    /// The same schedule under another stage name.
    pub fn relabel(&self, stage: Stage) -> Self {
        let mut copy = self.clone();
        copy.stage = stage;
        copy
    }

    /// Records the execution interval of `task`.
    pub fn record_task(&mut self, task: TaskId, start: SimTime, end: SimTime) {
        self.start.insert(task, start);
        self.end.insert(task, end);
    }

    /// Appends a transfer to the list of its channel.
    pub fn record_transfer(&mut self, record: TransferRecord) {
        match record.channel {
            ChannelKind::Dma => self.dma.push(record),
            ChannelKind::Mem => self.mem.push(record),
        }
    }

    /// Transfers observed on `channel`.
    pub fn transfers(&self, channel: ChannelKind) -> &[TransferRecord] {
        match channel {
            ChannelKind::Dma => &self.dma,
            ChannelKind::Mem => &self.mem,
        }
    }

    /// Latest end time.
    pub fn makespan(&self) -> SimTime {
        self.end.values().copied().max().unwrap_or(0)
    }

    /// Latency of one inference, or the steady-state time per batch when
    /// batch delays are present: `(makespan + max delay) / (delays + 1)`.
    pub fn completion_time(&self) -> f64 {
        let makespan = self.makespan() as f64;
        match self.batch_delays.iter().max() {
            None => makespan,
            Some(&max_delay) => {
                (makespan + max_delay as f64) / (self.batch_delays.len() + 1) as f64
            }
        }
    }

    /// Export statistics.
    pub fn export_stats(&self) -> serde_json::Value {
        let busy = |records: &[TransferRecord]| -> SimTime {
            records.iter().map(TransferRecord::duration).sum()
        };
        serde_json::json!({
            "stage": self.stage.name(),
            "tasks": self.start.len(),
            "makespan": self.makespan(),
            "completion_time": self.completion_time(),
            "dma_transfers": self.dma.len(),
            "dma_busy": busy(&self.dma),
            "mem_transfers": self.mem.len(),
            "mem_busy": busy(&self.mem),
            "comm_actors": self.comm_actors.len(),
            "batch_delays": self.batch_delays,
            "spm_tensors": self.mapping.spm_count(),
        })
    }
}
