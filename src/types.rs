//! Core type definitions shared by every pass.

/// Simulated time unit (virtual clock cycles).
///
/// Task execution times, transfer durations and every recorded start/end
/// timestamp use the same `SimTime` representation.
pub type SimTime = u64;

/// Identifier of a task (a node of the dependency graph).
///
/// Communication actors inserted by the rescheduler share this id space and
/// are always numbered above the largest computation task id.
pub type TaskId = u64;

/// Index of an NPU tile.
pub type TileId = usize;

