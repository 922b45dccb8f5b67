//! Pipelining analyzer (ParSchd).
//!
//! Looks at DMA occupancy by communication actors and searches for batch
//! launch offsets that never put two transfers on the channel at once.

use crate::channel::ChannelKind;
use crate::graph::TaskGraph;
use crate::schedule::{Schedule, Stage};
use crate::stats::Timer;
use crate::types::SimTime;

/// Accepted batch offsets for a set of `[start, end)` busy intervals.
///
/// The occupancy timeline spans `2 * (max end + 1)` slots. Candidate shifts
/// are multiples of the longest interval below `max end + 1`; a shift is
/// accepted if the shifted timeline never lands on a slot that is already
/// occupied by the original or a previously accepted shift.
pub fn batch_delays(intervals: &[(SimTime, SimTime)]) -> Vec<SimTime> {
    let stride = intervals
        .iter()
        .map(|&(s, e)| e.saturating_sub(s))
        .max()
        .unwrap_or(0);
    if stride == 0 {
        return Vec::new();
    }

    let horizon = intervals.iter().map(|&(_, e)| e).max().unwrap_or(0) as usize + 1;
    let mut base = vec![0u8; 2 * horizon];
    for &(s, e) in intervals {
        for slot in &mut base[s as usize..e as usize] {
            *slot = 1;
        }
    }

    let mut occupancy = base.clone();
    let mut delays = Vec::new();
    let mut shift = stride as usize;
    while shift < horizon {
        let collides = base[..base.len() - shift]
            .iter()
            .enumerate()
            .any(|(i, &b)| b == 1 && occupancy[i + shift] == 1);
        if !collides {
            for (i, &b) in base[..base.len() - shift].iter().enumerate() {
                occupancy[i + shift] += b;
            }
            delays.push(shift as SimTime);
        }
        shift += stride as usize;
    }
    delays
}

/// Derives batch delays from the DMA communication actors of `schedule`.
///
/// Only actors with ids above the graph's largest task id are considered.
pub fn parschd(graph: &TaskGraph, schedule: &Schedule) -> Schedule {
    let timer = Timer::start();
    let last_task = graph.max_node_id();

    let intervals: Vec<(SimTime, SimTime)> = schedule
        .comm_actors
        .iter()
        .filter(|&(&id, actor)| {
            actor.channel == ChannelKind::Dma && last_task.map_or(true, |m| id > m)
        })
        .filter_map(|(id, _)| Some((*schedule.start.get(id)?, *schedule.end.get(id)?)))
        .collect();

    let mut out = schedule.relabel(Stage::Parschd);
    out.batch_delays = batch_delays(&intervals);

    tracing::info!(
        actors = intervals.len(),
        delays = out.batch_delays.len(),
        completion = out.completion_time(),
        elapsed_ms = timer.elapsed_ms(),
        "ParSchd done"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::TaskMapping;
    use crate::schedule::CommActor;
    use std::sync::Arc;

    #[test]
    fn test_single_transfer() {
        // Busy [0,2), horizon 3: shift 2 lands on [2,4), free.
        assert_eq!(batch_delays(&[(0, 2)]), vec![2]);
    }

    #[test]
    fn test_collision_rejected() {
        // Busy [0,2) and [4,6); stride 2, horizon 7.
        // shift 2 -> [2,4),[6,8): free, accepted
        // shift 4 -> [4,6) collides with the original
        // shift 6 -> [6,8) collides with shift 2
        assert_eq!(batch_delays(&[(0, 2), (4, 6)]), vec![2]);
    }

    #[test]
    fn test_empty_and_zero_length() {
        assert!(batch_delays(&[]).is_empty());
        assert!(batch_delays(&[(3, 3)]).is_empty());
    }

    #[test]
    fn test_parschd_ignores_computation_and_mem_actors() {
        let mut g = TaskGraph::new();
        g.add_task(0);
        g.add_task(1);

        let mut s = Schedule::new(Stage::Ipcschd, Arc::new(TaskMapping::new()));
        s.record_task(0, 0, 10);
        s.record_task(1, 14, 20);
        s.record_task(2, 10, 14);
        s.record_task(3, 0, 8);
        s.comm_actors.insert(2, CommActor { src: 0, dst: 1, channel: ChannelKind::Dma });
        s.comm_actors.insert(3, CommActor { src: 0, dst: 1, channel: ChannelKind::Mem });

        let out = parschd(&g, &s);
        assert_eq!(out.stage, Stage::Parschd);
        // DMA actor busy [10,14): stride 4, horizon 15 -> shifts 4, 8, 12
        // shift 4 -> [14,18) free; shift 8 -> [18,22) free; shift 12 -> [22,26) free
        assert_eq!(out.batch_delays, vec![4, 8, 12]);
        assert!((out.completion_time() - (20.0 + 12.0) / 4.0).abs() < 1e-9);
        assert!(s.batch_delays.is_empty());
    }
}
