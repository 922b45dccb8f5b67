//! Communication-aware rescheduler (IPCSchd).
//!
//! Rebuilds a copy of the graph from a simulated schedule:
//!
//! - tasks sharing a lane are chained in the order they ran;
//! - every transfer into a consumer becomes a communication actor spliced
//!   between producer and consumer, carrying the observed transfer time;
//! - output write-backs are folded into the producer's duration.
//!
//! A critical-path program then re-derives the tightest start times that
//! respect this structure: `start + duration <= T` for every node,
//! `start(v) >= start(u) + duration(u)` for every edge, minimize `T`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{SchedError, SchedResult};
use crate::executor::LaneKey;
use crate::graph::TaskGraph;
use crate::schedule::{CommActor, Schedule, Stage};
use crate::solver::{Cmp, Domain, IntProgram, LinearExpr, MilpSolver, VarId};
use crate::stats::Timer;
use crate::types::{SimTime, TaskId};

/// Graph rebuilt with lane chains and communication actors.
#[derive(Clone, Debug)]
pub struct AugmentedGraph {
    pub graph: TaskGraph,
    /// Duration of every node, computation and communication alike
    pub durations: BTreeMap<TaskId, SimTime>,
    pub actors: BTreeMap<TaskId, CommActor>,
}

/// Builds the augmented graph of `schedule`. The input graph is not modified.
pub fn augment(graph: &TaskGraph, schedule: &Schedule) -> SchedResult<AugmentedGraph> {
    let mut g = graph.clone();

    let mut lanes: BTreeMap<LaneKey, Vec<(SimTime, TaskId)>> = BTreeMap::new();
    for (&task, &start) in &schedule.start {
        let entry = schedule.mapping.entry(task)?;
        lanes.entry(LaneKey::of(entry)).or_default().push((start, task));
    }
    for tasks in lanes.values_mut() {
        tasks.sort_unstable();
        for pair in tasks.windows(2) {
            let (u, v) = (pair[0].1, pair[1].1);
            if !g.has_edge(u, v) {
                g.add_edge(u, v)?;
            }
        }
    }

    let mut durations = BTreeMap::new();
    for task in graph.tasks() {
        let start = schedule.start.get(&task).ok_or(SchedError::UnknownTask(task))?;
        let end = schedule.end.get(&task).ok_or(SchedError::UnknownTask(task))?;
        durations.insert(task, end - start);
    }

    let mut next_id = g.max_node_id().map_or(0, |m| m + 1);
    let mut actors = BTreeMap::new();
    for record in schedule.dma.iter().chain(schedule.mem.iter()) {
        match record.dst {
            Some(dst) => {
                if !g.has_edge(record.src, dst) {
                    tracing::error!(
                        src = record.src,
                        dst,
                        successors = ?g.successors(record.src),
                        "transfer without a matching edge"
                    );
                    return Err(SchedError::MissingEdge {
                        src: record.src,
                        dst,
                    });
                }
                let actor = next_id;
                next_id += 1;
                g.add_task(actor);
                g.add_edge(record.src, actor)?;
                g.add_edge(actor, dst)?;
                g.remove_edge(record.src, dst);
                durations.insert(actor, record.duration());
                actors.insert(
                    actor,
                    CommActor {
                        src: record.src,
                        dst,
                        channel: record.channel,
                    },
                );
            }
            None => {
                *durations
                    .get_mut(&record.src)
                    .ok_or(SchedError::UnknownTask(record.src))? += record.duration();
            }
        }
    }

    Ok(AugmentedGraph {
        graph: g,
        durations,
        actors,
    })
}

/// Builds the critical-path program. Returns it with the start variable of
/// each node and the makespan variable.
pub fn formulate(augmented: &AugmentedGraph) -> (IntProgram, BTreeMap<TaskId, VarId>, VarId) {
    let mut program = IntProgram::minimize("ipcschd");
    let starts: BTreeMap<TaskId, VarId> = augmented
        .graph
        .tasks()
        .map(|t| (t, program.add_var(format!("s_{}", t), Domain::non_negative())))
        .collect();
    let makespan = program.add_var("t", Domain::non_negative());

    for (&task, &var) in &starts {
        let d = augmented.durations.get(&task).copied().unwrap_or(0) as f64;
        program.constrain(
            format!("makespan_{}", task),
            LinearExpr::new().term(var, 1.0).term(makespan, -1.0),
            Cmp::Le,
            -d,
        );
    }
    for (u, v) in augmented.graph.edges() {
        let d = augmented.durations.get(&u).copied().unwrap_or(0) as f64;
        program.constrain(
            format!("precedence_{}_{}", u, v),
            LinearExpr::new().term(starts[&v], 1.0).term(starts[&u], -1.0),
            Cmp::Ge,
            d,
        );
    }
    program.set_objective(LinearExpr::new().term(makespan, 1.0));
    (program, starts, makespan)
}

/// Reschedules `schedule` by critical-path optimization.
///
/// The result carries start and end times for every computation task and
/// every communication actor.
pub fn ipcschd(
    graph: &TaskGraph,
    schedule: &Schedule,
    solver: &dyn MilpSolver,
) -> SchedResult<Schedule> {
    let timer = Timer::start();
    let augmented = augment(graph, schedule)?;
    let (program, starts, makespan) = formulate(&augmented);

    let solution = solver.solve(&program).map_err(|e| {
        tracing::error!(error = %e, "IPCSchd solve failed");
        SchedError::from(e)
    })?;

    let mut out = Schedule::new(Stage::Ipcschd, Arc::clone(&schedule.mapping));
    out.dma = schedule.dma.clone();
    out.mem = schedule.mem.clone();
    out.comm_actors = augmented.actors.clone();
    for (&task, &var) in &starts {
        let start = solution.value(var).round().max(0.0) as SimTime;
        let d = augmented.durations.get(&task).copied().unwrap_or(0);
        out.record_task(task, start, start + d);
    }

    tracing::info!(
        actors = augmented.actors.len(),
        makespan = solution.value(makespan),
        elapsed_ms = timer.elapsed_ms(),
        "IPCSchd done"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::mapping::{BufferLocation, MappingEntry, Resource, TaskMapping};
    use crate::schedule::TransferRecord;
    use crate::solver::GoodLpSolver;

    fn mapping(entries: &[(TaskId, Resource, usize)]) -> Arc<TaskMapping> {
        let mut m = TaskMapping::new();
        for &(task, resource, tile) in entries {
            m.insert(MappingEntry {
                task,
                layer: "Conv2D".to_string(),
                op: "conv".to_string(),
                resource,
                tile,
                buffer: BufferLocation::Mem,
            });
        }
        Arc::new(m)
    }

    fn transfer(src: TaskId, dst: Option<TaskId>, start: SimTime, end: SimTime) -> TransferRecord {
        TransferRecord {
            src,
            dst,
            channel: ChannelKind::Dma,
            start,
            end,
        }
    }

    #[test]
    fn test_lane_chain_edges() {
        // Independent tasks on one lane are serialized by a chain edge.
        let mut g = TaskGraph::new();
        g.add_task(0);
        g.add_task(1);
        let mut s = Schedule::new(Stage::Actmap, mapping(&[(0, Resource::Npu, 0), (1, Resource::Npu, 0)]));
        s.record_task(0, 0, 4);
        s.record_task(1, 4, 9);

        let aug = augment(&g, &s).unwrap();
        assert!(aug.graph.has_edge(0, 1));
        assert!(!g.has_edge(0, 1));

        let out = ipcschd(&g, &s, &GoodLpSolver::new()).unwrap();
        assert_eq!(out.start[&1], 4);
        assert_eq!(out.makespan(), 9);
    }

    #[test]
    fn test_actor_spliced_between_tasks() {
        let mut g = TaskGraph::new();
        g.add_task(0);
        g.add_task(1);
        g.add_edge(0, 1).unwrap();
        let mut s = Schedule::new(Stage::Actmap, mapping(&[(0, Resource::Npu, 0), (1, Resource::Npu, 1)]));
        s.record_task(0, 0, 5);
        s.record_task(1, 20, 30);
        s.record_transfer(transfer(0, Some(1), 8, 14));
        s.record_transfer(transfer(1, None, 30, 33));

        let aug = augment(&g, &s).unwrap();
        assert_eq!(aug.actors.len(), 1);
        let actor = aug.actors[&2];
        assert_eq!((actor.src, actor.dst), (0, 1));
        assert!(aug.graph.has_edge(0, 2));
        assert!(aug.graph.has_edge(2, 1));
        assert!(!aug.graph.has_edge(0, 1));
        assert_eq!(aug.durations[&2], 6);
        // Write-back folded into the producer
        assert_eq!(aug.durations[&1], 13);

        let out = ipcschd(&g, &s, &GoodLpSolver::new()).unwrap();
        assert_eq!(out.start[&0], 0);
        assert_eq!(out.start[&2], 5);
        assert_eq!(out.start[&1], 11);
        assert_eq!(out.makespan(), 24);
        assert_eq!(out.stage, Stage::Ipcschd);
        assert_eq!(out.comm_actors.len(), 1);
    }

    #[test]
    fn test_transfer_without_edge_is_fatal() {
        let mut g = TaskGraph::new();
        g.add_task(0);
        g.add_task(1);
        let mut s = Schedule::new(Stage::Actmap, mapping(&[(0, Resource::Npu, 0), (1, Resource::Cpu, 0)]));
        s.record_task(0, 0, 5);
        s.record_task(1, 10, 20);
        s.record_transfer(transfer(0, Some(1), 5, 10));

        let result = augment(&g, &s);
        assert!(matches!(result, Err(SchedError::MissingEdge { src: 0, dst: 1 })));
    }
}
