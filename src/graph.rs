//! Task dependency graph.
//!
//! Nodes are integer task ids; an edge `u -> v` means the output of `u` feeds
//! an input of `v`. Both directions are stored so that consumers
//! (`successors`) and producers (`dependencies`) can be read without a scan.
//!
//! Attributes are written while the graph is being built and are read-only to
//! every scheduling pass afterwards. The only pass that changes structure is
//! the communication-aware rescheduler, and it always works on a clone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{SchedError, SchedResult};
use crate::mapping::Resource;
use crate::types::{SimTime, TaskId};

/// Per-task attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAttrs {
    /// Execution time per resource kind
    #[serde(default)]
    pub extime: BTreeMap<Resource, SimTime>,
    /// Output (activation) tensor size in elements
    #[serde(default)]
    pub tensor: Option<u64>,
    /// Weight size in elements
    #[serde(default)]
    pub weight: Option<u64>,
    /// Layer type tag, e.g. `Conv2D`
    #[serde(default)]
    pub layer: Option<String>,
}

impl TaskAttrs {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the execution time on a resource.
    pub fn with_extime(mut self, resource: Resource, time: SimTime) -> Self {
        self.extime.insert(resource, time);
        self
    }

    /// Sets the output tensor size.
    pub fn with_tensor(mut self, size: u64) -> Self {
        self.tensor = Some(size);
        self
    }

    /// Sets the weight size.
    pub fn with_weight(mut self, size: u64) -> Self {
        self.weight = Some(size);
        self
    }

    /// Sets the layer type.
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }
}

/// Result of a bounded simple-path enumeration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathSearch {
    /// Every simple path found, as node sequences from source to destination
    pub paths: Vec<Vec<TaskId>>,
    /// True if the exploration cap stopped the search from expanding a branch
    pub truncated: bool,
}

impl PathSearch {
    /// Length (in nodes) of the longest path found.
    pub fn longest(&self) -> usize {
        self.paths.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Directed task graph with per-node attributes.
#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, TaskAttrs>,
    successors: BTreeMap<TaskId, Vec<TaskId>>,
    dependencies: BTreeMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task with no attributes. Existing tasks are left untouched.
    pub fn add_task(&mut self, id: TaskId) {
        self.tasks.entry(id).or_default();
        self.successors.entry(id).or_default();
        self.dependencies.entry(id).or_default();
    }

    /// Adds a task with the given attributes, replacing any previous attributes.
    pub fn insert_task(&mut self, id: TaskId, attrs: TaskAttrs) {
        self.add_task(id);
        self.tasks.insert(id, attrs);
    }

    /// Returns true if the task exists.
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.successors.values().map(Vec::len).sum()
    }

    /// Task ids in ascending order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    /// All edges `(u, v)`, grouped by ascending producer id.
    pub fn edges(&self) -> impl Iterator<Item = (TaskId, TaskId)> + '_ {
        self.successors
            .iter()
            .flat_map(|(&u, vs)| vs.iter().map(move |&v| (u, v)))
    }

    /// Records `u -> v` and the reverse dependency.
    ///
    /// Duplicate edges are ignored.
    pub fn add_edge(&mut self, u: TaskId, v: TaskId) -> SchedResult<()> {
        if u == v {
            return Err(SchedError::SelfLoop(u));
        }
        for id in [u, v] {
            if !self.contains(id) {
                return Err(SchedError::UnknownTask(id));
            }
        }

        let out = self.successors.entry(u).or_default();
        if !out.contains(&v) {
            out.push(v);
            self.dependencies.entry(v).or_default().push(u);
        }
        Ok(())
    }

    /// Removes `u -> v`. Returns false if the edge did not exist.
    pub fn remove_edge(&mut self, u: TaskId, v: TaskId) -> bool {
        let removed = match self.successors.get_mut(&u) {
            Some(out) => {
                let before = out.len();
                out.retain(|&x| x != v);
                out.len() != before
            }
            None => false,
        };
        if removed {
            if let Some(deps) = self.dependencies.get_mut(&v) {
                deps.retain(|&x| x != u);
            }
        }
        removed
    }

    /// Returns true if `u -> v` exists.
    pub fn has_edge(&self, u: TaskId, v: TaskId) -> bool {
        self.successors(u).contains(&v)
    }

    /// Consumers of `u`'s output, in insertion order.
    pub fn successors(&self, u: TaskId) -> &[TaskId] {
        self.successors.get(&u).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Producers `v` depends on, in insertion order.
    pub fn dependencies(&self, v: TaskId) -> &[TaskId] {
        self.dependencies.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks with no dependencies.
    pub fn sources(&self) -> Vec<TaskId> {
        self.tasks().filter(|&t| self.dependencies(t).is_empty()).collect()
    }

    /// Largest task id, or `None` for an empty graph.
    pub fn max_node_id(&self) -> Option<TaskId> {
        self.tasks.keys().next_back().copied()
    }

    fn attrs_mut(&mut self, id: TaskId) -> SchedResult<&mut TaskAttrs> {
        self.tasks.get_mut(&id).ok_or(SchedError::UnknownTask(id))
    }

    /// Sets the execution time of `id` on `resource`.
    pub fn set_extime(&mut self, id: TaskId, resource: Resource, time: SimTime) -> SchedResult<()> {
        self.attrs_mut(id)?.extime.insert(resource, time);
        Ok(())
    }

    /// Sets the output tensor size of `id`.
    pub fn set_tensor(&mut self, id: TaskId, size: u64) -> SchedResult<()> {
        self.attrs_mut(id)?.tensor = Some(size);
        Ok(())
    }

    /// Sets the weight size of `id`.
    pub fn set_weight(&mut self, id: TaskId, size: u64) -> SchedResult<()> {
        self.attrs_mut(id)?.weight = Some(size);
        Ok(())
    }

    /// Sets the layer type of `id`.
    pub fn set_layer_type(&mut self, id: TaskId, layer: impl Into<String>) -> SchedResult<()> {
        self.attrs_mut(id)?.layer = Some(layer.into());
        Ok(())
    }

    /// Attributes of `id`.
    pub fn attrs(&self, id: TaskId) -> Option<&TaskAttrs> {
        self.tasks.get(&id)
    }

    /// Execution time of `id` on `resource`.
    pub fn extime(&self, id: TaskId, resource: Resource) -> SchedResult<SimTime> {
        self.attrs(id)
            .ok_or(SchedError::UnknownTask(id))?
            .extime
            .get(&resource)
            .copied()
            .ok_or(SchedError::MissingAttribute {
                task: id,
                attribute: match resource {
                    Resource::Cpu => "cpu execution time",
                    Resource::Npu => "npu execution time",
                },
            })
    }

    /// Output tensor size of `id`.
    pub fn tensor(&self, id: TaskId) -> SchedResult<u64> {
        self.attrs(id)
            .ok_or(SchedError::UnknownTask(id))?
            .tensor
            .ok_or(SchedError::MissingAttribute {
                task: id,
                attribute: "tensor size",
            })
    }

    /// Layer type of `id`.
    pub fn layer_type(&self, id: TaskId) -> SchedResult<&str> {
        self.attrs(id)
            .ok_or(SchedError::UnknownTask(id))?
            .layer
            .as_deref()
            .ok_or(SchedError::MissingAttribute {
                task: id,
                attribute: "layer type",
            })
    }

    /// Enumerates simple paths from `s` to `d` by depth-first search.
    ///
    /// At most `cap` path instances (DFS visits) are explored. Once the cap is
    /// reached no further branch is expanded and the result is flagged as
    /// truncated; below the cap the result is exact.
    pub fn all_simple_paths(&self, s: TaskId, d: TaskId, cap: usize) -> PathSearch {
        let mut search = PathSearch::default();
        if !self.contains(s) || !self.contains(d) {
            return search;
        }

        let mut visited = BTreeMap::new();
        let mut path = Vec::new();
        let mut explored = 0usize;
        self.paths_from(s, d, cap, &mut visited, &mut path, &mut explored, &mut search);
        search
    }

    #[allow(clippy::too_many_arguments)]
    fn paths_from(
        &self,
        u: TaskId,
        d: TaskId,
        cap: usize,
        visited: &mut BTreeMap<TaskId, bool>,
        path: &mut Vec<TaskId>,
        explored: &mut usize,
        search: &mut PathSearch,
    ) {
        *explored += 1;
        visited.insert(u, true);
        path.push(u);

        if u == d {
            search.paths.push(path.clone());
        } else {
            for &next in self.successors(u) {
                if visited.get(&next).copied().unwrap_or(false) {
                    continue;
                }
                if *explored >= cap {
                    search.truncated = true;
                    break;
                }
                self.paths_from(next, d, cap, visited, path, explored, search);
            }
        }

        path.pop();
        visited.insert(u, false);
    }

    /// Appends a structurally identical, disconnected copy of the graph.
    ///
    /// Copied ids are shifted by `max_node_id() + 1`; the shift is returned.
    pub fn duplicate_and_add(&mut self) -> SchedResult<TaskId> {
        let offset = self.max_node_id().map_or(0, |m| m + 1);
        let tasks: Vec<(TaskId, TaskAttrs)> =
            self.tasks.iter().map(|(&id, a)| (id, a.clone())).collect();
        let edges: Vec<(TaskId, TaskId)> = self.edges().collect();

        for (id, attrs) in tasks {
            self.insert_task(id + offset, attrs);
        }
        for (u, v) in edges {
            self.add_edge(u + offset, v + offset)?;
        }
        Ok(offset)
    }

    /// Builds a graph from a loader description.
    ///
    /// Every task must carry a weight and a layer type.
    pub fn from_spec(spec: GraphSpec) -> SchedResult<Self> {
        let mut graph = TaskGraph::new();
        for task in &spec.tasks {
            graph.add_task(task.id);
        }
        for &(u, v) in &spec.edges {
            graph.add_task(u);
            graph.add_task(v);
        }
        for &(u, v) in &spec.edges {
            graph.add_edge(u, v)?;
        }
        for task in spec.tasks {
            graph.insert_task(task.id, task.attrs);
        }

        for id in graph.tasks() {
            let attrs = &graph.tasks[&id];
            if attrs.weight.is_none() {
                return Err(SchedError::MissingAttribute {
                    task: id,
                    attribute: "weight",
                });
            }
            if attrs.layer.is_none() {
                return Err(SchedError::MissingAttribute {
                    task: id,
                    attribute: "layer type",
                });
            }
        }

        tracing::info!(
            tasks = graph.task_count(),
            edges = graph.edge_count(),
            "loaded task graph"
        );
        Ok(graph)
    }

    /// Builds a graph from a JSON loader description.
    pub fn from_json(json: &str) -> SchedResult<Self> {
        let spec: GraphSpec = serde_json::from_str(json)?;
        Self::from_spec(spec)
    }
}

/// Loader-facing description of one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(flatten)]
    pub attrs: TaskAttrs,
}

/// Loader-facing description of a whole graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub edges: Vec<(TaskId, TaskId)>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}
