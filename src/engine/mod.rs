// src/engine/mod.rs

//! Orchestration engine for streamdag.
//!
//! This module ties together:
//! - the declared [`Pipeline`] (tasks, their specs and stream edges)
//! - the pure DAG scheduler from [`crate::dag`]
//! - the async [`PipelineRunner`] that opens executors, wires channels and
//!   feeds completions back into the scheduler
//! - the one-task-at-a-time [`TaskLifecycle`] control surface

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

pub mod lifecycle;
pub mod pipeline;
pub mod runner;

pub use lifecycle::TaskLifecycle;
pub use pipeline::{Pipeline, PipelineTask, StreamEdge};
pub use runner::{PipelineReport, PipelineRunner, TaskReport, CANCELLED, DEFAULT_MAX_WORKERS};
