//! Error types for the scheduling pipeline.
//!
//! Every failure here is a data or modeling defect rather than a transient
//! condition, so nothing is retried: a pass that returns an error produces no
//! schedule and the flow stops.

use thiserror::Error;

use crate::config::ConfigError;
use crate::solver::SolveError;
use crate::types::{SimTime, TaskId};

/// Errors raised by graph construction, the optimization passes and the simulator.
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("task {0} is not part of the graph")]
    UnknownTask(TaskId),

    #[error("self-loop on task {0}")]
    SelfLoop(TaskId),

    #[error("task {task} has no {attribute} attribute")]
    MissingAttribute {
        task: TaskId,
        attribute: &'static str,
    },

    #[error("topological order covers {produced} of {expected} tasks")]
    OrderMismatch { expected: usize, produced: usize },

    #[error("{dst} is not dependent on {src} in the augmented graph")]
    MissingEdge { src: TaskId, dst: TaskId },

    #[error("task {task} assigned to {assigned} slots, expected exactly one")]
    InvalidAssignment { task: TaskId, assigned: usize },

    #[error("simulation stalled at t={time} with {pending} pending tasks")]
    Deadlock { time: SimTime, pending: usize },

    #[error("solver error: {0}")]
    Solver(#[from] SolveError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the crate.
pub type SchedResult<T> = Result<T, SchedError>;
