//! State shared by every lane of one simulator run.
//!
//! A [`SharedState`] is created fresh for each run and dropped at its end, so
//! independent runs never observe each other's clock, completions or channel
//! reservations. The clock and the completion flags are atomics; the two
//! channels sit behind mutexes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::{ChannelKind, TransferChannel};
use crate::types::{SimTime, TaskId};

/// Global virtual clock of one run.
#[derive(Debug, Default)]
pub struct SimClock {
    now: AtomicU64,
}

impl SimClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.now.load(Ordering::Acquire)
    }

    /// Moves the clock forward to `time`. The clock never goes backwards.
    pub fn advance_to(&self, time: SimTime) -> SimTime {
        self.now.fetch_max(time, Ordering::AcqRel).max(time)
    }
}

const PENDING: u64 = u64::MAX;

/// Per-task completion flags.
///
/// Each flag is written by exactly one lane (the lane owning the task) and
/// read by any lane with a dependent task.
#[derive(Debug, Default)]
pub struct CompletionBoard {
    slots: BTreeMap<TaskId, AtomicU64>,
}

impl CompletionBoard {
    /// Creates a board with every task pending.
    pub fn new(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            slots: tasks
                .into_iter()
                .map(|t| (t, AtomicU64::new(PENDING)))
                .collect(),
        }
    }

    /// Marks `task` complete at `time`. Returns false if the task is unknown
    /// or was already complete.
    pub fn publish(&self, task: TaskId, time: SimTime) -> bool {
        match self.slots.get(&task) {
            Some(slot) => slot
                .compare_exchange(PENDING, time, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            None => false,
        }
    }

    /// Completion time of `task`, if complete.
    pub fn completed_at(&self, task: TaskId) -> Option<SimTime> {
        self.slots
            .get(&task)
            .map(|s| s.load(Ordering::Acquire))
            .filter(|&t| t != PENDING)
    }

    /// Returns true if `task` is complete.
    pub fn is_complete(&self, task: TaskId) -> bool {
        self.completed_at(task).is_some()
    }

    /// Number of tasks not yet complete.
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.load(Ordering::Acquire) == PENDING)
            .count()
    }
}

/// Clock, completion flags and channel arbiters of one run.
#[derive(Debug)]
pub struct SharedState {
    pub clock: SimClock,
    pub board: CompletionBoard,
    dma: Mutex<TransferChannel>,
    mem: Mutex<TransferChannel>,
}

impl SharedState {
    /// Fresh state for a run over `tasks`.
    pub fn new(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            clock: SimClock::new(),
            board: CompletionBoard::new(tasks),
            dma: Mutex::new(TransferChannel::new(ChannelKind::Dma)),
            mem: Mutex::new(TransferChannel::new(ChannelKind::Mem)),
        }
    }

    /// The arbiter of `kind`.
    pub fn channel(&self, kind: ChannelKind) -> &Mutex<TransferChannel> {
        match kind {
            ChannelKind::Dma => &self.dma,
            ChannelKind::Mem => &self.mem,
        }
    }

    /// Reserves `kind` for `duration` at the current clock time.
    pub fn reserve(&self, kind: ChannelKind, duration: SimTime) -> (SimTime, SimTime) {
        let now = self.clock.now();
        self.channel(kind).lock().reserve(now, duration)
    }

    /// Snapshot of both channels.
    pub fn channels(&self) -> [TransferChannel; 2] {
        [self.dma.lock().clone(), self.mem.lock().clone()]
    }
}
