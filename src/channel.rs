//! Shared transfer channels and the transfer-duration model.
//!
//! The DMA channel and the memory channel are each exclusive: one transfer
//! occupies a channel at a time and concurrent requests serialize. A request
//! is granted as a reservation `[max(now, busy_until), +duration)`, so
//! queuing order is the order in which requests are granted.
//!
//! # Time Alignment
//!
//! Transfers and executions end at arbitrary times while the virtual clock
//! only advances in ticks. Waiters observe an end time at the first tick
//! boundary at or after it:
//!
//! ```
//! use tilemap_dse::channel::TimeAlignment;
//!
//! // 103 with a 10-unit tick is observed at 110
//! assert_eq!(TimeAlignment::ceil_to_tick(103, 10), 110);
//! assert_eq!(TimeAlignment::ceil_to_tick(100, 10), 100);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ChannelParams;
use crate::types::SimTime;

/// Tick-boundary arithmetic for the virtual clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TimeAlignment;

impl TimeAlignment {
    /// Aligns time using ceiling division.
    ///
    /// Formula: `⌈t / Δt⌉ × Δt`
    #[inline]
    pub fn ceil_to_tick(time: SimTime, tick_period: SimTime) -> SimTime {
        if tick_period == 0 || time == 0 {
            return time;
        }
        time.div_ceil(tick_period) * tick_period
    }

    /// Checks if a time is exactly on a tick boundary.
    #[inline]
    pub fn is_on_boundary(time: SimTime, tick_period: SimTime) -> bool {
        tick_period == 0 || time % tick_period == 0
    }
}

/// Which shared channel carries a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dma,
    Mem,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Dma => write!(f, "dma"),
            ChannelKind::Mem => write!(f, "mem"),
        }
    }
}

/// Time needed to move `size` tensor elements over a channel.
///
/// `ceil(size * bit_precision / granularity_bits) * clock_period`
///
/// Sizes count elements while the channel granularity counts bits, so the
/// element count is scaled by `bit_precision` before it is split into beats.
/// A plain `size / granularity * period` would undercount by the element
/// width.
pub fn transfer_duration(size: u64, bit_precision: u32, params: &ChannelParams) -> SimTime {
    let bits = size.saturating_mul(bit_precision as u64);
    let beats = if params.granularity_bits == 0 {
        0
    } else {
        bits.div_ceil(params.granularity_bits)
    };
    beats.saturating_mul(params.clock_period)
}

/// Exclusive channel arbiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferChannel {
    pub kind: ChannelKind,
    /// The channel is reserved up to (not including) this time
    pub busy_until: SimTime,
    /// Total reserved time
    pub busy_time: SimTime,
    /// Number of granted transfers
    pub transfers: u64,
}

impl TransferChannel {
    /// Creates an idle channel.
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            busy_until: 0,
            busy_time: 0,
            transfers: 0,
        }
    }

    /// Reserves the channel for `duration` starting no earlier than `now`.
    ///
    /// Returns the granted `(start, end)` interval.
    pub fn reserve(&mut self, now: SimTime, duration: SimTime) -> (SimTime, SimTime) {
        let start = now.max(self.busy_until);
        let end = start + duration;
        self.busy_until = end;
        self.busy_time += duration;
        self.transfers += 1;
        (start, end)
    }

    /// Returns true if no reservation extends past `now`.
    pub fn is_idle_at(&self, now: SimTime) -> bool {
        self.busy_until <= now
    }

    /// Export statistics.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "channel": self.kind.to_string(),
            "busy_until": self.busy_until,
            "busy_time": self.busy_time,
            "transfers": self.transfers,
        })
    }
}
