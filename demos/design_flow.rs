//! Design flow walkthrough.
//!
//! Maps a small convolutional network onto a four-tile accelerator and prints
//! how the estimated latency changes from stage to stage:
//! - STEUni order with the naive mapping
//! - OpMap tile balancing
//! - ActMap scratchpad placement
//! - IPCSchd rescheduling and ParSchd batch offsets
//!
//! Usage:
//!   cargo run --example design_flow
//!   cargo run --example design_flow -- graph.json [accelerator.yaml] [out.json]
//!
//! `graph.json` follows the loader format (`edges` plus `tasks`). When an
//! output path is given, every stage's schedule is written there and the
//! per-stage report lands next to it as `<out>.report.json` and
//! `<out>.report.csv`.

use std::error::Error;
use std::path::{Path, PathBuf};

use tilemap_dse::{
    AcceleratorConfig, ConfigBuilder, DesignFlow, JsonFileSink, MemorySink, Resource, ResultSink,
    Stage, TaskAttrs, TaskGraph, TaskId,
};

// ============================================================================
// Demo Network
// ============================================================================

const N_TILES: usize = 4;
const SPM_KB: f64 = 16.0;

/// (layer type, cpu time, npu time, output elements)
const LAYERS: &[(&str, u64, u64, u64)] = &[
    ("Conv2D", 420, 36, 16384),
    ("BatchNormalization", 60, 6, 16384),
    ("ReLU", 30, 3, 16384),
    ("MaxPooling2D", 80, 8, 4096),
    ("Conv2D", 380, 30, 8192),
    ("DepthwiseConv2D", 240, 20, 8192),
    ("Add", 40, 4, 8192),
    ("GlobalAveragePooling2D", 50, 5, 256),
    ("Dense", 120, 10, 128),
    ("Softmax", 15, 15, 10),
];

/// A single-branch backbone with one residual block.
fn demo_network() -> Result<TaskGraph, Box<dyn Error>> {
    let mut g = TaskGraph::new();
    for (id, &(layer, cpu, npu, tensor)) in LAYERS.iter().enumerate() {
        g.insert_task(
            id as TaskId,
            TaskAttrs::new()
                .with_extime(Resource::Cpu, cpu)
                .with_extime(Resource::Npu, npu)
                .with_tensor(tensor)
                .with_weight(1)
                .with_layer(layer),
        );
    }
    for id in 1..LAYERS.len() as TaskId {
        g.add_edge(id - 1, id)?;
    }
    // Residual: pooled features skip the two convolutions
    g.add_edge(3, 6)?;
    Ok(g)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match args.get(1) {
        Some(path) => AcceleratorConfig::from_file(path)?,
        None => ConfigBuilder::new()
            .n_tiles(N_TILES)
            .spm_kb_per_tile(SPM_KB)
            .build()?,
    };
    tilemap_dse::init_logging(&config.log_level);

    let (name, graph) = match args.first() {
        Some(path) => (path.clone(), TaskGraph::from_json(&std::fs::read_to_string(path)?)?),
        None => ("demo-net".to_string(), demo_network()?),
    };

    println!("Model: {} ({} tasks, {} edges)", name, graph.task_count(), graph.edge_count());
    println!("Accelerator: {} tiles, {} KB scratchpad each", config.n_tiles, config.spm_kb_per_tile);
    println!();

    let flow = DesignFlow::new(config).with_name(name);
    let mut memory = MemorySink::new();
    let outcome = match args.get(2) {
        Some(out) => {
            let mut file = JsonFileSink::new(out);
            let outcome = flow.run(&graph, &mut Tee(&mut memory, &mut file))?;
            println!("Schedules written to {}", out);
            let (json, csv) = report_paths(out);
            outcome.report.to_json_file(&json)?;
            outcome.report.to_csv_file(&csv)?;
            println!("Report written to {} and {}", json.display(), csv.display());
            outcome
        }
        None => flow.run(&graph, &mut memory)?,
    };

    println!("{:<10} {:>12} {:>10} {:>10}", "stage", "completion", "dma", "mem");
    for stage in Stage::ALL {
        if let Some(s) = memory.get(stage) {
            println!(
                "{:<10} {:>12.2} {:>10} {:>10}",
                stage,
                s.completion_time(),
                s.dma.len(),
                s.mem.len()
            );
        }
    }
    println!();

    println!("Tile placement:");
    for tile in &outcome.placement.tiles {
        println!(
            "  tile {}: {} local, {} pinned of {} candidates ({:.2} KB)",
            tile.tile,
            tile.local.len(),
            tile.pinned.len(),
            tile.global.len(),
            tile.pinned_kb
        );
    }
    println!();

    print!("{}", outcome.report.summary());
    Ok(())
}

/// Report files stored beside the schedule output.
fn report_paths(out: &str) -> (PathBuf, PathBuf) {
    let out = Path::new(out);
    (out.with_extension("report.json"), out.with_extension("report.csv"))
}

/// Forwards every schedule to two sinks.
struct Tee<'a>(&'a mut dyn ResultSink, &'a mut dyn ResultSink);

impl ResultSink for Tee<'_> {
    fn accept(&mut self, schedule: &tilemap_dse::Schedule) -> tilemap_dse::SchedResult<()> {
        self.0.accept(schedule)?;
        self.1.accept(schedule)
    }

    fn finish(&mut self) -> tilemap_dse::SchedResult<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_network_runs() {
        let graph = demo_network().unwrap();
        let config = ConfigBuilder::new().n_tiles(N_TILES).spm_kb_per_tile(SPM_KB).build().unwrap();
        let mut sink = MemorySink::new();
        DesignFlow::new(config).run(&graph, &mut sink).unwrap();
        assert_eq!(sink.len(), Stage::ALL.len());
    }

    #[test]
    fn test_report_files_beside_output() {
        let (json, csv) = report_paths("runs/net.json");
        assert_eq!(json, Path::new("runs/net.report.json"));
        assert_eq!(csv, Path::new("runs/net.report.csv"));
    }
}
