//! # tilemap-dse
//!
//! Design-space exploration for mapping neural-network task graphs onto a
//! tiled accelerator: NPU tiles with private scratchpads, a CPU fallback, and
//! two shared transfer channels (DMA and memory).
//!
//! ## Pipeline
//!
//! - **STEUni** ([`order::steuni`]): one deterministic topological order.
//! - **Heuristic mapping** ([`mapping::heuristic_map`]): unsupported layers on
//!   the CPU, everything else on NPU tile 0, all tensors in shared memory.
//! - **OpMap** ([`opmap::opmap`]): integer program balancing tensor load
//!   across NPU tiles.
//! - **ActMap** ([`actmap::actmap`]): per-tile knapsack choosing which outputs
//!   stay in scratchpad.
//! - **Simulation** ([`engine::Simulator`]): discrete-event run of all lanes
//!   against a shared virtual clock with exclusive channels.
//! - **IPCSchd** ([`ipc::ipcschd`]): critical-path rescheduling with explicit
//!   communication actors.
//! - **ParSchd** ([`pipelining::parschd`]): batch offsets from DMA occupancy.
//!
//! ## Features
//!
//! - `parallel` - Step simulator lanes in parallel using rayon (default)
//!
//! ## Quick Start
//!
//! ```rust
//! use tilemap_dse::{ConfigBuilder, DesignFlow, MemorySink, Resource, Stage, TaskAttrs, TaskGraph};
//!
//! let mut graph = TaskGraph::new();
//! for id in 0..3 {
//!     graph.insert_task(
//!         id,
//!         TaskAttrs::new()
//!             .with_extime(Resource::Cpu, 40)
//!             .with_extime(Resource::Npu, 4)
//!             .with_tensor(10)
//!             .with_weight(1)
//!             .with_layer("Conv2D"),
//!     );
//! }
//! graph.add_edge(0, 1).unwrap();
//! graph.add_edge(1, 2).unwrap();
//!
//! let config = ConfigBuilder::new().n_tiles(2).build().unwrap();
//! let mut sink = MemorySink::new();
//! DesignFlow::new(config).run(&graph, &mut sink).unwrap();
//!
//! let actmap = sink.get(Stage::Actmap).unwrap();
//! println!("latency after placement: {}", actmap.completion_time());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use tilemap_dse::config::AcceleratorConfig;
//!
//! let config = AcceleratorConfig::from_file("accelerator.yaml")?;
//! tilemap_dse::init_logging(&config.log_level);
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod graph;
pub mod order;
pub mod mapping;
pub mod solver;
pub mod opmap;
pub mod actmap;
pub mod channel;
pub mod shared;
pub mod executor;
pub mod engine;
pub mod schedule;
pub mod ipc;
pub mod pipelining;
pub mod stats;
pub mod flow;

// Re-export commonly used types
pub use types::{SimTime, TaskId, TileId};
pub use error::{SchedError, SchedResult};
pub use config::{AcceleratorConfig, ChannelParams, ConfigBuilder, ConfigError};
pub use graph::{GraphSpec, PathSearch, TaskAttrs, TaskGraph};
pub use mapping::{BufferLocation, MappingEntry, Resource, TaskMapping};
pub use solver::{GoodLpSolver, IntProgram, MilpSolver, SolveError};
pub use opmap::TileAssignment;
pub use actmap::{ActMapResult, TilePlacement};
pub use channel::{ChannelKind, TimeAlignment, TransferChannel};
pub use executor::{LaneExecutor, LaneKey};
pub use engine::{SimulationStats, Simulator};
pub use schedule::{CommActor, Schedule, Stage, TransferRecord};
pub use stats::{FlowReport, StageStats, Timer};
pub use flow::{DesignFlow, FlowOutcome, JsonFileSink, MemorySink, ResultSink};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// tilemap_dse::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
