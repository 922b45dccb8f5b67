//! Tile-mapping optimizer (OpMap).
//!
//! Balances tensor-size load across NPU tiles. One binary variable `y[i][j]`
//! is declared per (task, slot) pair, where slots are the `n_tiles` physical
//! tiles followed by one reserved CPU slot:
//!
//! - every task takes exactly one slot: `sum_j y[i][j] = 1`
//! - every slot's load is bounded by `t`: `sum_i y[i][j] * tensor[i] - t <= 0`
//! - the CPU slot is never used: `sum_i y[i][cpu] = 0`
//!
//! and `t` is minimized. CPU-bound tasks are expected to be filtered out of
//! the candidate list by the caller (see [`npu_candidates`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::AcceleratorConfig;
use crate::error::{SchedError, SchedResult};
use crate::graph::TaskGraph;
use crate::mapping::Resource;
use crate::solver::{Cmp, Domain, IntProgram, LinearExpr, MilpSolver, VarId};
use crate::stats::Timer;
use crate::types::{TaskId, TileId};

/// Decoded placement of one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileAssignment {
    pub resource: Resource,
    pub tile: TileId,
}

/// Tasks of `order` whose layer type the NPU supports, in order.
pub fn npu_candidates(
    graph: &TaskGraph,
    order: &[TaskId],
    config: &AcceleratorConfig,
) -> SchedResult<Vec<TaskId>> {
    let mut out = Vec::new();
    for &task in order {
        if config.supports(graph.layer_type(task)?) {
            out.push(task);
        }
    }
    Ok(out)
}

/// Formulated OpMap problem together with the variable layout needed to decode it.
pub struct OpMapProblem {
    pub program: IntProgram,
    pub tasks: Vec<TaskId>,
    /// `slots[i][j]` is the variable of task `tasks[i]` on slot `j`
    pub slots: Vec<Vec<VarId>>,
    pub load: VarId,
}

/// Builds the load-balancing program for `tasks` over `n_tiles` tiles.
pub fn formulate(graph: &TaskGraph, tasks: &[TaskId], n_tiles: usize) -> SchedResult<OpMapProblem> {
    let slot_count = n_tiles + 1;
    let cpu_slot = n_tiles;
    let mut program = IntProgram::minimize("opmap");

    let mut slots = Vec::with_capacity(tasks.len());
    for &task in tasks {
        let row: Vec<VarId> = (0..slot_count)
            .map(|j| program.add_var(format!("y_{}_{}", task, j), Domain::Binary))
            .collect();
        slots.push(row);
    }
    let load = program.add_var("t", Domain::non_negative());

    for (i, &task) in tasks.iter().enumerate() {
        program.constrain(
            format!("mapping_{}", task),
            LinearExpr::sum(slots[i].iter().copied()),
            Cmp::Eq,
            1.0,
        );
    }

    for j in 0..slot_count {
        let mut expr = LinearExpr::new().term(load, -1.0);
        for (i, &task) in tasks.iter().enumerate() {
            expr.add_term(slots[i][j], graph.tensor(task)? as f64);
        }
        program.constrain(format!("size_{}", j), expr, Cmp::Le, 0.0);
    }

    program.constrain(
        "cpu_slot_unused",
        LinearExpr::sum(slots.iter().map(|row| row[cpu_slot])),
        Cmp::Eq,
        0.0,
    );

    program.set_objective(LinearExpr::new().term(load, 1.0));

    Ok(OpMapProblem {
        program,
        tasks: tasks.to_vec(),
        slots,
        load,
    })
}

/// Assigns every candidate task to one NPU tile, minimizing the maximum tile load.
pub fn opmap(
    graph: &TaskGraph,
    tasks: &[TaskId],
    config: &AcceleratorConfig,
    solver: &dyn MilpSolver,
) -> SchedResult<BTreeMap<TaskId, TileAssignment>> {
    let timer = Timer::start();
    if tasks.is_empty() {
        return Ok(BTreeMap::new());
    }

    let problem = formulate(graph, tasks, config.n_tiles)?;
    let solution = solver.solve(&problem.program).map_err(|e| {
        tracing::error!(error = %e, "OpMap solve failed");
        SchedError::from(e)
    })?;

    let cpu_slot = config.n_tiles;
    let mut result = BTreeMap::new();
    for (i, &task) in problem.tasks.iter().enumerate() {
        let chosen: Vec<usize> = problem.slots[i]
            .iter()
            .enumerate()
            .filter(|(_, &v)| solution.is_set(v))
            .map(|(j, _)| j)
            .collect();

        if chosen.len() != 1 {
            tracing::error!(task, assigned = chosen.len(), "task mapped to no slot or several slots");
            return Err(SchedError::InvalidAssignment {
                task,
                assigned: chosen.len(),
            });
        }

        let slot = chosen[0];
        let assignment = if slot == cpu_slot {
            TileAssignment {
                resource: Resource::Cpu,
                tile: slot,
            }
        } else {
            TileAssignment {
                resource: Resource::Npu,
                tile: slot,
            }
        };
        result.insert(task, assignment);
    }

    tracing::info!(
        tasks = tasks.len(),
        max_load = solution.value(problem.load),
        elapsed_ms = timer.elapsed_ms(),
        "OpMap done"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::graph::TaskAttrs;
    use crate::solver::{GoodLpSolver, Solution, SolveError};

    fn graph_with_tensors(sizes: &[u64]) -> TaskGraph {
        let mut g = TaskGraph::new();
        for (id, &size) in sizes.iter().enumerate() {
            g.insert_task(id as TaskId, TaskAttrs::new().with_tensor(size).with_layer("Conv2D"));
        }
        g
    }

    #[test]
    fn test_formulation_shape() {
        let g = graph_with_tensors(&[4, 4, 4]);
        let p = formulate(&g, &[0, 1, 2], 2).unwrap();
        // 3 tasks x (2 tiles + cpu) + load variable
        assert_eq!(p.program.var_count(), 10);
        // 3 mapping + 3 size + 1 cpu constraints
        assert_eq!(p.program.constraints.len(), 7);
    }

    #[test]
    fn test_balances_load() {
        let g = graph_with_tensors(&[10, 10, 10, 10]);
        let config = ConfigBuilder::new().n_tiles(2).build().unwrap();

        let result = opmap(&g, &[0, 1, 2, 3], &config, &GoodLpSolver::new()).unwrap();
        assert_eq!(result.len(), 4);

        let mut load = [0u64; 2];
        for (task, a) in &result {
            assert_eq!(a.resource, Resource::Npu);
            assert!(a.tile < 2);
            load[a.tile] += g.tensor(*task).unwrap();
        }
        assert_eq!(load, [20, 20]);
    }

    #[test]
    fn test_single_tile() {
        let g = graph_with_tensors(&[10, 10, 10]);
        let config = ConfigBuilder::new().n_tiles(1).build().unwrap();

        let result = opmap(&g, &[0, 1, 2], &config, &GoodLpSolver::new()).unwrap();
        assert!(result
            .values()
            .all(|a| *a == TileAssignment { resource: Resource::Npu, tile: 0 }));
    }

    #[test]
    fn test_empty_candidates() {
        let g = TaskGraph::new();
        let result = opmap(&g, &[], &AcceleratorConfig::default(), &GoodLpSolver::new()).unwrap();
        assert!(result.is_empty());
    }

    /// Returns a fixed assignment regardless of the program.
    struct FixedSolver(Vec<f64>);

    impl MilpSolver for FixedSolver {
        fn solve(&self, _program: &IntProgram) -> Result<Solution, SolveError> {
            Ok(Solution { values: self.0.clone() })
        }
    }

    #[test]
    fn test_row_sum_violation_is_fatal() {
        let g = graph_with_tensors(&[1]);
        let config = ConfigBuilder::new().n_tiles(1).build().unwrap();
        // Task 0 on both tile 0 and the CPU slot.
        let solver = FixedSolver(vec![1.0, 1.0, 1.0]);

        let result = opmap(&g, &[0], &config, &solver);
        assert!(matches!(
            result,
            Err(SchedError::InvalidAssignment { task: 0, assigned: 2 })
        ));
    }

    #[test]
    fn test_npu_candidates() {
        let mut g = graph_with_tensors(&[1, 1, 1]);
        g.set_layer_type(1, "Softmax").unwrap();

        let config = AcceleratorConfig::default();
        assert_eq!(npu_candidates(&g, &[2, 1, 0], &config).unwrap(), vec![2, 0]);
    }
}
