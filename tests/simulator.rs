//! Integration tests for the execution simulator.
//!
//! These tests verify properties every simulated schedule must have:
//! - Exclusive use of the DMA and memory channels
//! - Execution intervals matching declared execution times
//! - Dependencies completing before consumers start
//! - Reproducible results across runs and threads

use std::sync::Arc;

use tilemap_dse::channel::TimeAlignment;
use tilemap_dse::mapping::heuristic_map;
use tilemap_dse::order::steuni;
use tilemap_dse::{
    AcceleratorConfig, BufferLocation, ChannelKind, ConfigBuilder, MappingEntry, Resource,
    Schedule, SchedError, Simulator, Stage, TaskAttrs, TaskGraph, TaskId, TaskMapping,
};

// ============================================================================
// Helpers
// ============================================================================

/// Small deterministic generator so graphs are identical on every run.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

/// Layered DAG with a mix of NPU and CPU layer types.
fn layered_graph(layers: usize, width: usize, seed: u64) -> TaskGraph {
    let kinds = ["Conv2D", "Dense", "MaxPooling2D", "Softmax", "ReLU"];
    let mut rng = Lcg(seed);
    let mut g = TaskGraph::new();
    let mut id: TaskId = 0;
    let mut prev: Vec<TaskId> = Vec::new();

    for _ in 0..layers {
        let mut current = Vec::new();
        for _ in 0..width {
            let layer = kinds[(rng.next() % kinds.len() as u64) as usize];
            g.insert_task(
                id,
                TaskAttrs::new()
                    .with_extime(Resource::Cpu, 20 + rng.next() % 30)
                    .with_extime(Resource::Npu, 2 + rng.next() % 10)
                    .with_tensor(64 + rng.next() % 512)
                    .with_weight(1)
                    .with_layer(layer),
            );
            for &p in &prev {
                if rng.next() % 2 == 0 {
                    g.add_edge(p, id).unwrap();
                }
            }
            current.push(id);
            id += 1;
        }
        prev = current;
    }
    g
}

fn spread_mapping(g: &TaskGraph, config: &AcceleratorConfig) -> TaskMapping {
    let base = heuristic_map(g, config).unwrap();
    let mut m = TaskMapping::new();
    for entry in base.iter() {
        let mut e = entry.clone();
        if e.resource == Resource::Npu {
            e.tile = (e.task as usize) % config.n_tiles;
            if e.task % 3 == 0 {
                e.buffer = BufferLocation::Spm;
            }
        }
        m.insert(e);
    }
    m
}

fn assert_channels_exclusive(s: &Schedule) {
    for channel in [ChannelKind::Dma, ChannelKind::Mem] {
        let mut records = s.transfers(channel).to_vec();
        records.sort_by_key(|r| r.start);
        for pair in records.windows(2) {
            assert!(
                pair[0].end <= pair[1].start,
                "{} transfers overlap: {:?} and {:?}",
                channel,
                pair[0],
                pair[1]
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_three_task_chain_single_tile() {
    let mut g = TaskGraph::new();
    for (id, t) in [(0, 3), (1, 4), (2, 5)] {
        g.insert_task(
            id,
            TaskAttrs::new()
                .with_extime(Resource::Npu, t)
                .with_tensor(10)
                .with_layer("Conv2D"),
        );
    }
    g.add_edge(0, 1).unwrap();
    g.add_edge(1, 2).unwrap();

    let mut m = TaskMapping::new();
    for id in 0..3 {
        m.insert(MappingEntry {
            task: id,
            layer: "Conv2D".to_string(),
            op: "conv".to_string(),
            resource: Resource::Npu,
            tile: 0,
            buffer: BufferLocation::Spm,
        });
    }

    let order = steuni(&g).unwrap();
    assert_eq!(order, vec![0, 1, 2]);

    let s = Simulator::new(AcceleratorConfig::default())
        .run(&g, &order, Arc::new(m), Stage::Actmap)
        .unwrap();
    assert_eq!(s.end[&2], 3 + 4 + 5);
    assert!(s.dma.is_empty() && s.mem.is_empty());
}

#[test]
fn test_channels_are_exclusive() {
    let config = ConfigBuilder::new().n_tiles(3).build().unwrap();
    for seed in [1, 7, 42] {
        let g = layered_graph(5, 4, seed);
        let order = steuni(&g).unwrap();
        let m = spread_mapping(&g, &config);

        let s = Simulator::new(config.clone())
            .run(&g, &order, Arc::new(m), Stage::Opmap)
            .unwrap();
        assert!(!s.dma.is_empty());
        assert_channels_exclusive(&s);
    }
}

#[test]
fn test_end_is_start_plus_extime() {
    let config = ConfigBuilder::new().n_tiles(2).build().unwrap();
    let g = layered_graph(4, 3, 3);
    let order = steuni(&g).unwrap();
    let m = spread_mapping(&g, &config);

    let s = Simulator::new(config)
        .run(&g, &order, Arc::new(m.clone()), Stage::Opmap)
        .unwrap();
    for task in g.tasks() {
        let resource = m.get(task).unwrap().resource;
        let extime = g.extime(task, resource).unwrap();
        assert_eq!(s.end[&task], s.start[&task] + extime);
    }
}

#[test]
fn test_dependencies_finish_first() {
    let config = ConfigBuilder::new().n_tiles(2).build().unwrap();
    let g = layered_graph(4, 3, 11);
    let order = steuni(&g).unwrap();
    let m = spread_mapping(&g, &config);

    let s = Simulator::new(config)
        .run(&g, &order, Arc::new(m), Stage::Opmap)
        .unwrap();
    for (u, v) in g.edges() {
        assert!(s.end[&u] <= s.start[&v], "{} -> {} violated", u, v);
    }
}

#[test]
fn test_runs_are_reproducible() {
    let config = ConfigBuilder::new().n_tiles(3).build().unwrap();
    let g = Arc::new(layered_graph(6, 4, 5));
    let order = Arc::new(steuni(&g).unwrap());
    let m = Arc::new(spread_mapping(&g, &config));

    let first = Simulator::new(config.clone())
        .run(&g, &order, m.clone(), Stage::Opmap)
        .unwrap();

    // Independent runs on other threads never share state
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (g, order, m, config) = (g.clone(), order.clone(), m.clone(), config.clone());
            std::thread::spawn(move || {
                Simulator::new(config)
                    .run(&g, &order, m, Stage::Opmap)
                    .unwrap()
            })
        })
        .collect();
    for h in handles {
        let s = h.join().unwrap();
        assert_eq!(s.start, first.start);
        assert_eq!(s.end, first.end);
        assert_eq!(s.dma, first.dma);
        assert_eq!(s.mem, first.mem);
    }
}

#[test]
fn test_missing_extime_fails_at_start() {
    let mut g = TaskGraph::new();
    g.insert_task(0, TaskAttrs::new().with_tensor(1).with_layer("Conv2D"));
    let m = heuristic_map(&g, &AcceleratorConfig::default()).unwrap();

    let result = Simulator::new(AcceleratorConfig::default()).run(&g, &[0], Arc::new(m), Stage::Steuni);
    assert!(matches!(result, Err(SchedError::MissingAttribute { task: 0, .. })));
}

#[test]
fn test_coarse_tick_starts_on_boundaries() {
    let g = layered_graph(3, 3, 9);
    let order = steuni(&g).unwrap();
    let config = ConfigBuilder::new().n_tiles(2).tick(7).build().unwrap();
    let m = Arc::new(spread_mapping(&g, &config));

    let s = Simulator::new(config).run(&g, &order, m, Stage::Opmap).unwrap();
    assert_eq!(s.start.len(), g.task_count());
    assert!(s.start.values().all(|&t| TimeAlignment::is_on_boundary(t, 7)));
    assert_channels_exclusive(&s);
}
