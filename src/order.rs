//! Single-threaded topological order builder (STEUni).

use std::collections::BTreeSet;

use crate::error::{SchedError, SchedResult};
use crate::graph::TaskGraph;
use crate::stats::Timer;
use crate::types::TaskId;

/// Builds one linear task order that respects every dependency.
///
/// The remaining tasks are scanned repeatedly in ascending id order; a task is
/// appended as soon as all of its dependencies are already placed, so ties are
/// broken by id rather than by any latency heuristic. The result is
/// deterministic.
///
/// The graph must be acyclic. If a full scan places nothing, the tasks left
/// over can never become ready; this is logged and returned as
/// [`SchedError::OrderMismatch`].
pub fn steuni(graph: &TaskGraph) -> SchedResult<Vec<TaskId>> {
    let timer = Timer::start();
    let expected = graph.task_count();

    let mut remaining: Vec<TaskId> = graph.tasks().collect();
    let mut placed: BTreeSet<TaskId> = BTreeSet::new();
    let mut order = Vec::with_capacity(expected);

    while !remaining.is_empty() {
        let before = order.len();
        remaining.retain(|&t| {
            let ready = graph.dependencies(t).iter().all(|d| placed.contains(d));
            if ready {
                placed.insert(t);
                order.push(t);
            }
            !ready
        });
        if order.len() == before {
            break;
        }
    }

    if order.len() != expected {
        tracing::error!(
            expected,
            produced = order.len(),
            "topological order does not cover the graph"
        );
        return Err(SchedError::OrderMismatch {
            expected,
            produced: order.len(),
        });
    }

    tracing::info!(tasks = expected, elapsed_ms = timer.elapsed_ms(), "STEUni done");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: TaskId, edges: &[(TaskId, TaskId)]) -> TaskGraph {
        let mut g = TaskGraph::new();
        for id in 0..n {
            g.add_task(id);
        }
        for &(u, v) in edges {
            g.add_edge(u, v).unwrap();
        }
        g
    }

    fn respects_edges(g: &TaskGraph, order: &[TaskId]) -> bool {
        let pos = |t: TaskId| order.iter().position(|&x| x == t).unwrap();
        g.edges().all(|(u, v)| pos(u) < pos(v))
    }

    #[test]
    fn test_linear_chain() {
        let g = graph(3, &[(0, 1), (1, 2)]);
        assert_eq!(steuni(&g).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reverse_ids() {
        // 3 -> 2 -> 1 -> 0 needs several scans.
        let g = graph(4, &[(3, 2), (2, 1), (1, 0)]);
        assert_eq!(steuni(&g).unwrap(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let g = graph(5, &[(4, 0), (4, 1), (2, 3)]);
        let order = steuni(&g).unwrap();
        assert_eq!(order, vec![2, 3, 4, 0, 1]);
        assert!(respects_edges(&g, &order));
    }

    #[test]
    fn test_diamond_is_permutation() {
        let g = graph(6, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 5), (4, 5)]);
        let order = steuni(&g).unwrap();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<_>>());
        assert!(respects_edges(&g, &order));
    }

    #[test]
    fn test_cycle_is_reported() {
        let g = graph(3, &[(0, 1), (1, 2), (2, 1)]);
        let result = steuni(&g);
        assert!(matches!(
            result,
            Err(SchedError::OrderMismatch {
                expected: 3,
                produced: 1
            })
        ));
    }
}
