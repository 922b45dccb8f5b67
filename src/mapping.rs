//! Task-to-resource mapping.
//!
//! A [`TaskMapping`] holds exactly one [`MappingEntry`] per graph task. The
//! heuristic mapper creates the initial entries; the tile optimizer and the
//! buffer optimizer each derive a new mapping from the previous one instead of
//! editing it, so earlier schedules keep pointing at the mapping they ran with.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::AcceleratorConfig;
use crate::error::{SchedError, SchedResult};
use crate::graph::TaskGraph;
use crate::opmap::TileAssignment;
use crate::types::{TaskId, TileId};

/// Kind of processing resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Npu,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Npu => write!(f, "npu"),
        }
    }
}

/// Where a task's output tensor lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferLocation {
    /// Shared memory
    Mem,
    /// Scratchpad of the producing tile
    Spm,
}

/// Mapping record of one task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub task: TaskId,
    /// Layer type as declared by the graph
    pub layer: String,
    /// Hardware-specialized operation name
    pub op: String,
    pub resource: Resource,
    pub tile: TileId,
    pub buffer: BufferLocation,
}

/// Hardware operation class for a layer type running on the NPU.
///
/// Matching is a case-insensitive substring test.
pub fn npu_op_class(layer: &str) -> &'static str {
    let lower = layer.to_lowercase();
    if lower.contains("conv") {
        "conv"
    } else if lower.contains("pool") {
        "pool"
    } else if lower.contains("dense") {
        "dense"
    } else {
        "sfu"
    }
}

/// One mapping entry per task, keyed by task id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMapping {
    entries: BTreeMap<TaskId, MappingEntry>,
}

impl TaskMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry of `entry.task`.
    pub fn insert(&mut self, entry: MappingEntry) {
        self.entries.insert(entry.task, entry);
    }

    /// Entry of `task`, if mapped.
    pub fn get(&self, task: TaskId) -> Option<&MappingEntry> {
        self.entries.get(&task)
    }

    /// Entry of `task`, or an error if the task is unmapped.
    pub fn entry(&self, task: TaskId) -> SchedResult<&MappingEntry> {
        self.entries.get(&task).ok_or(SchedError::UnknownTask(task))
    }

    /// Entries in ascending task order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    /// Number of mapped tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of outputs placed in scratchpad.
    pub fn spm_count(&self) -> usize {
        self.iter().filter(|e| e.buffer == BufferLocation::Spm).count()
    }

    /// Returns true if every graph task has exactly one entry and nothing else is mapped.
    pub fn covers(&self, graph: &TaskGraph) -> bool {
        self.len() == graph.task_count() && graph.tasks().all(|t| self.entries.contains_key(&t))
    }

    /// Derives a mapping with resource and tile replaced for the assigned tasks.
    pub fn with_tiles(&self, assignments: &BTreeMap<TaskId, TileAssignment>) -> SchedResult<Self> {
        let mut next = self.clone();
        for (&task, assignment) in assignments {
            let entry = next
                .entries
                .get_mut(&task)
                .ok_or(SchedError::UnknownTask(task))?;
            entry.resource = assignment.resource;
            entry.tile = assignment.tile;
            entry.op = match assignment.resource {
                Resource::Npu => npu_op_class(&entry.layer).to_string(),
                Resource::Cpu => entry.layer.clone(),
            };
        }
        Ok(next)
    }

    /// Derives a mapping with the outputs of `pinned` placed in scratchpad.
    pub fn with_spm(&self, pinned: &BTreeSet<TaskId>) -> SchedResult<Self> {
        let mut next = self.clone();
        for &task in pinned {
            next.entries
                .get_mut(&task)
                .ok_or(SchedError::UnknownTask(task))?
                .buffer = BufferLocation::Spm;
        }
        Ok(next)
    }
}

/// Seeds a mapping from static operation-support rules.
///
/// Unsupported layer types go to the CPU; everything else defaults to NPU
/// tile 0. All outputs start in shared memory.
pub fn heuristic_map(graph: &TaskGraph, config: &AcceleratorConfig) -> SchedResult<TaskMapping> {
    let mut mapping = TaskMapping::new();
    for task in graph.tasks() {
        let layer = graph.layer_type(task)?.to_string();
        let (resource, op) = if config.supports(&layer) {
            (Resource::Npu, npu_op_class(&layer).to_string())
        } else {
            (Resource::Cpu, layer.clone())
        };
        mapping.insert(MappingEntry {
            task,
            layer,
            op,
            resource,
            tile: 0,
            buffer: BufferLocation::Mem,
        });
    }

    tracing::info!(
        spm = mapping.spm_count(),
        total = mapping.len(),
        cpu = mapping.iter().filter(|e| e.resource == Resource::Cpu).count(),
        "heuristic mapping done"
    );
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::graph::TaskAttrs;

    fn graph_with_layers(layers: &[&str]) -> TaskGraph {
        let mut g = TaskGraph::new();
        for (id, layer) in layers.iter().enumerate() {
            g.insert_task(id as TaskId, TaskAttrs::new().with_layer(*layer).with_tensor(8));
        }
        g
    }

    #[test]
    fn test_npu_op_class() {
        assert_eq!(npu_op_class("Conv2D"), "conv");
        assert_eq!(npu_op_class("DepthwiseConv2D"), "conv");
        assert_eq!(npu_op_class("MaxPooling2D"), "pool");
        assert_eq!(npu_op_class("DENSE"), "dense");
        assert_eq!(npu_op_class("Add"), "sfu");
    }

    #[test]
    fn test_heuristic_map() {
        let g = graph_with_layers(&["Conv2D", "Softmax", "MaxPooling2D", "ReLU"]);
        let config = AcceleratorConfig::default();

        let mapping = heuristic_map(&g, &config).unwrap();
        assert!(mapping.covers(&g));

        let conv = mapping.get(0).unwrap();
        assert_eq!(conv.resource, Resource::Npu);
        assert_eq!(conv.op, "conv");
        assert_eq!(conv.tile, 0);
        assert_eq!(conv.buffer, BufferLocation::Mem);

        let softmax = mapping.get(1).unwrap();
        assert_eq!(softmax.resource, Resource::Cpu);
        assert_eq!(softmax.op, "Softmax");

        assert_eq!(mapping.get(2).unwrap().op, "pool");
        assert_eq!(mapping.get(3).unwrap().op, "sfu");
        assert_eq!(mapping.spm_count(), 0);
    }

    #[test]
    fn test_heuristic_map_empty_allowlist() {
        let g = graph_with_layers(&["Softmax"]);
        let config = ConfigBuilder::new()
            .supported_ops(Vec::<String>::new())
            .build()
            .unwrap();

        let mapping = heuristic_map(&g, &config).unwrap();
        assert_eq!(mapping.get(0).unwrap().resource, Resource::Npu);
    }

    #[test]
    fn test_heuristic_map_missing_layer() {
        let mut g = TaskGraph::new();
        g.add_task(0);
        let result = heuristic_map(&g, &AcceleratorConfig::default());
        assert!(matches!(result, Err(SchedError::MissingAttribute { task: 0, .. })));
    }

    #[test]
    fn test_derived_mappings_leave_source_untouched() {
        let g = graph_with_layers(&["Conv2D", "Dense"]);
        let base = heuristic_map(&g, &AcceleratorConfig::default()).unwrap();

        let mut tiles = BTreeMap::new();
        tiles.insert(1, TileAssignment { resource: Resource::Npu, tile: 3 });
        let tiled = base.with_tiles(&tiles).unwrap();
        assert_eq!(tiled.get(1).unwrap().tile, 3);
        assert_eq!(base.get(1).unwrap().tile, 0);

        let pinned = tiled.with_spm(&BTreeSet::from([0])).unwrap();
        assert_eq!(pinned.get(0).unwrap().buffer, BufferLocation::Spm);
        assert_eq!(tiled.get(0).unwrap().buffer, BufferLocation::Mem);

        assert!(base.with_spm(&BTreeSet::from([9])).is_err());
    }
}
