//! Buffer-placement optimizer (ActMap).
//!
//! Runs once per tile. The output of each NPU task on the tile is classified:
//!
//! - **global** if any consumer runs on the CPU or on a different tile;
//! - **local** if every consumer sits on the same tile and every simple path
//!   to each consumer is a direct edge;
//! - **global** otherwise (same tile, indirect reuse).
//!
//! Local outputs are always pinned to scratchpad. Global outputs are placement
//! candidates for a 0/1 knapsack: `keep[i] = 1` leaves the output in shared
//! memory, `keep[i] = 0` pins it. The KB pinned must fit the tile scratchpad
//! and the reuse-weighted KB left in shared memory is minimized.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::AcceleratorConfig;
use crate::error::{SchedError, SchedResult};
use crate::graph::TaskGraph;
use crate::mapping::{Resource, TaskMapping};
use crate::solver::{Cmp, Domain, IntProgram, LinearExpr, MilpSolver};
use crate::stats::Timer;
use crate::types::{TaskId, TileId};

/// Placement decision for one tile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TilePlacement {
    pub tile: TileId,
    /// Outputs pinned unconditionally
    pub local: Vec<TaskId>,
    /// Outputs that were placement candidates
    pub global: Vec<TaskId>,
    /// Candidates the knapsack pinned to scratchpad
    pub pinned: Vec<TaskId>,
    /// Same-tile NPU consumers per task
    pub reuse: BTreeMap<TaskId, usize>,
    /// KB of scratchpad taken by `pinned`
    pub pinned_kb: f64,
    /// Tasks whose path search hit the exploration cap
    pub truncated: Vec<TaskId>,
}

impl TilePlacement {
    /// Every output of this tile that lives in scratchpad.
    pub fn spm_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.local.iter().chain(self.pinned.iter()).copied()
    }
}

/// Placement decisions for every tile that hosts NPU tasks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActMapResult {
    pub tiles: Vec<TilePlacement>,
}

impl ActMapResult {
    /// Union across tiles of the outputs pinned to scratchpad.
    pub fn spm_tasks(&self) -> BTreeSet<TaskId> {
        self.tiles.iter().flat_map(TilePlacement::spm_tasks).collect()
    }

    /// Placement of `tile`, if it hosts NPU tasks.
    pub fn tile(&self, tile: TileId) -> Option<&TilePlacement> {
        self.tiles.iter().find(|p| p.tile == tile)
    }
}

/// Output classification of one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    Local,
    Global,
}

/// Classifies the outputs of `tasks` (all on `tile`) and computes reuse factors.
fn classify(
    graph: &TaskGraph,
    mapping: &TaskMapping,
    tile: TileId,
    tasks: &[TaskId],
    path_cap: usize,
    placement: &mut TilePlacement,
) -> SchedResult<()> {
    for &task in tasks {
        let consumers = graph.successors(task);
        let mut reuse = 0;
        let mut crosses = false;
        for &c in consumers {
            let entry = mapping.entry(c)?;
            match entry.resource {
                Resource::Cpu => crosses = true,
                Resource::Npu if entry.tile != tile => crosses = true,
                Resource::Npu => reuse += 1,
            }
        }
        placement.reuse.insert(task, reuse);

        let class = if crosses {
            Class::Global
        } else {
            let mut direct_only = true;
            for &c in consumers {
                let search = graph.all_simple_paths(task, c, path_cap);
                if search.truncated {
                    tracing::warn!(
                        task,
                        consumer = c,
                        cap = path_cap,
                        "path enumeration truncated; output treated as a placement candidate"
                    );
                    placement.truncated.push(task);
                    direct_only = false;
                }
                if search.longest() > 2 {
                    direct_only = false;
                }
                if !direct_only {
                    break;
                }
            }
            if direct_only {
                Class::Local
            } else {
                Class::Global
            }
        };

        match class {
            Class::Local => placement.local.push(task),
            Class::Global => placement.global.push(task),
        }
    }
    Ok(())
}

/// Builds the knapsack over the global candidates of one tile.
///
/// Returns the program and the `keep` variable of each candidate.
pub fn formulate_tile(
    graph: &TaskGraph,
    candidates: &[TaskId],
    reuse: &BTreeMap<TaskId, usize>,
    tile: TileId,
    config: &AcceleratorConfig,
) -> SchedResult<(IntProgram, Vec<crate::solver::VarId>)> {
    let mut program = IntProgram::minimize(format!("actmap_{}", tile));
    let keep: Vec<_> = candidates
        .iter()
        .map(|t| program.add_var(format!("keep_{}", t), Domain::Binary))
        .collect();

    // sum (1 - keep) * kb <= cap   <=>   -sum keep * kb <= cap - sum kb
    let mut pinned = LinearExpr::new();
    let mut total_kb = 0.0;
    let mut traffic = LinearExpr::new();
    for (i, &task) in candidates.iter().enumerate() {
        let kb = config.tensor_kb(graph.tensor(task)?);
        total_kb += kb;
        pinned.add_term(keep[i], -kb);
        let weight = reuse.get(&task).copied().unwrap_or(0) as f64;
        traffic.add_term(keep[i], kb * weight);
    }
    program.constrain(
        "spm_capacity",
        pinned,
        Cmp::Le,
        config.spm_kb_per_tile - total_kb,
    );
    program.set_objective(traffic);

    Ok((program, keep))
}

/// Decides which task outputs are pinned to scratchpad, tile by tile.
pub fn actmap(
    graph: &TaskGraph,
    mapping: &TaskMapping,
    config: &AcceleratorConfig,
    solver: &dyn MilpSolver,
) -> SchedResult<ActMapResult> {
    let timer = Timer::start();

    let mut per_tile: BTreeMap<TileId, Vec<TaskId>> = BTreeMap::new();
    for entry in mapping.iter().filter(|e| e.resource == Resource::Npu) {
        per_tile.entry(entry.tile).or_default().push(entry.task);
    }

    let mut result = ActMapResult::default();
    for (tile, tasks) in per_tile {
        let mut placement = TilePlacement {
            tile,
            ..TilePlacement::default()
        };
        classify(graph, mapping, tile, &tasks, config.path_cap, &mut placement)?;

        if !placement.global.is_empty() {
            let (program, keep) =
                formulate_tile(graph, &placement.global, &placement.reuse, tile, config)?;
            let solution = solver.solve(&program).map_err(|e| {
                tracing::error!(tile, error = %e, "ActMap solve failed");
                SchedError::from(e)
            })?;

            for (i, &task) in placement.global.iter().enumerate() {
                if !solution.is_set(keep[i]) {
                    placement.pinned.push(task);
                    placement.pinned_kb += config.tensor_kb(graph.tensor(task)?);
                }
            }
        }

        tracing::debug!(
            tile,
            local = placement.local.len(),
            global = placement.global.len(),
            pinned = placement.pinned.len(),
            pinned_kb = placement.pinned_kb,
            "tile placement"
        );
        result.tiles.push(placement);
    }

    tracing::info!(
        spm = result.spm_tasks().len(),
        elapsed_ms = timer.elapsed_ms(),
        "ActMap done"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::graph::TaskAttrs;
    use crate::mapping::{BufferLocation, MappingEntry};
    use crate::solver::GoodLpSolver;

    fn add(g: &mut TaskGraph, m: &mut TaskMapping, id: TaskId, tensor: u64, resource: Resource, tile: TileId) {
        g.insert_task(id, TaskAttrs::new().with_tensor(tensor).with_layer("Conv2D"));
        m.insert(MappingEntry {
            task: id,
            layer: "Conv2D".to_string(),
            op: "conv".to_string(),
            resource,
            tile,
            buffer: BufferLocation::Mem,
        });
    }

    #[test]
    fn test_direct_chain_is_local() {
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        for id in 0..3 {
            add(&mut g, &mut m, id, 10, Resource::Npu, 0);
        }
        g.add_edge(0, 1).unwrap();
        g.add_edge(1, 2).unwrap();

        let config = ConfigBuilder::new().n_tiles(1).build().unwrap();
        let result = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();

        let tile = result.tile(0).unwrap();
        assert_eq!(tile.local, vec![0, 1, 2]);
        assert!(tile.global.is_empty());
        assert_eq!(result.spm_tasks(), BTreeSet::from([0, 1, 2]));
        assert_eq!(tile.reuse[&0], 1);
        assert_eq!(tile.reuse[&2], 0);
    }

    #[test]
    fn test_indirect_reuse_is_global() {
        // 0 -> 1 -> 2 and 0 -> 2: the output of 0 is reused after 1 runs.
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        for id in 0..3 {
            add(&mut g, &mut m, id, 1024, Resource::Npu, 0);
        }
        g.add_edge(0, 1).unwrap();
        g.add_edge(1, 2).unwrap();
        g.add_edge(0, 2).unwrap();

        let config = ConfigBuilder::new().n_tiles(1).build().unwrap();
        let result = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();
        let tile = result.tile(0).unwrap();
        assert_eq!(tile.global, vec![0]);
        assert_eq!(tile.local, vec![1, 2]);
        assert_eq!(tile.reuse[&0], 2);
        // 1 KB fits in 32 KB, so the candidate is pinned.
        assert_eq!(tile.pinned, vec![0]);
    }

    #[test]
    fn test_cross_tile_and_cpu_consumers_are_global() {
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        add(&mut g, &mut m, 0, 8, Resource::Npu, 0);
        add(&mut g, &mut m, 1, 8, Resource::Npu, 1);
        add(&mut g, &mut m, 2, 8, Resource::Cpu, 0);
        add(&mut g, &mut m, 3, 8, Resource::Npu, 0);
        g.add_edge(0, 3).unwrap();
        g.add_edge(0, 1).unwrap();
        g.add_edge(3, 2).unwrap();

        let result = actmap(&g, &m, &AcceleratorConfig::default(), &GoodLpSolver::new()).unwrap();
        let tile0 = result.tile(0).unwrap();
        assert_eq!(tile0.global, vec![0, 3]);
        assert_eq!(tile0.reuse[&0], 1);
        assert_eq!(tile0.reuse[&3], 0);
        assert!(result.tile(1).unwrap().local.contains(&1));
        // CPU tasks are never placed.
        assert!(!result.spm_tasks().contains(&2));
    }

    #[test]
    fn test_capacity_respected() {
        // Three 16 KB candidates with distinct reuse; 32 KB fits two.
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        for id in 0..3 {
            add(&mut g, &mut m, id, 16 * 1024, Resource::Npu, 0);
        }
        add(&mut g, &mut m, 10, 1, Resource::Cpu, 0);
        for id in 20..26 {
            add(&mut g, &mut m, id, 1, Resource::Npu, 0);
        }
        for id in 0..3 {
            g.add_edge(id, 10).unwrap();
        }
        // Reuse: task 0 -> 3 consumers, task 1 -> 2, task 2 -> 1.
        g.add_edge(0, 20).unwrap();
        g.add_edge(0, 21).unwrap();
        g.add_edge(0, 22).unwrap();
        g.add_edge(1, 23).unwrap();
        g.add_edge(1, 24).unwrap();
        g.add_edge(2, 25).unwrap();

        let config = ConfigBuilder::new().spm_kb_per_tile(32.0).build().unwrap();
        let result = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();
        let tile = result.tile(0).unwrap();

        assert_eq!(tile.global, vec![0, 1, 2]);
        assert!(tile.pinned_kb <= config.spm_kb_per_tile + 1e-9);
        assert_eq!(tile.pinned, vec![0, 1]);
    }

    #[test]
    fn test_zero_capacity_pins_nothing() {
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        add(&mut g, &mut m, 0, 64, Resource::Npu, 0);
        add(&mut g, &mut m, 1, 64, Resource::Cpu, 0);
        g.add_edge(0, 1).unwrap();

        let config = ConfigBuilder::new().spm_kb_per_tile(0.0).build().unwrap();
        let result = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();
        assert!(result.tile(0).unwrap().pinned.is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let mut g = TaskGraph::new();
        let mut m = TaskMapping::new();
        for id in 0..5 {
            add(&mut g, &mut m, id, 100, Resource::Npu, (id % 2) as TileId);
        }
        for (u, v) in [(0, 2), (2, 4), (0, 4), (1, 3), (3, 4)] {
            g.add_edge(u, v).unwrap();
        }

        let config = AcceleratorConfig::default();
        let first = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();
        let second = actmap(&g, &m, &config, &GoodLpSolver::new()).unwrap();
        for (a, b) in first.tiles.iter().zip(&second.tiles) {
            assert_eq!(a.local, b.local);
            assert_eq!(a.global, b.global);
        }
    }
}
