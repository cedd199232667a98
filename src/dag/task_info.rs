// src/dag/task_info.rs

//! Task metadata and per-run state.

use crate::engine::TaskName;

/// Per-run state of a task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Handed to the runner; its executor has been (or is about to be) opened.
    Running,
    DoneSuccess,
    /// Failed itself, or was blocked by a failed dependency.
    DoneFailed,
}

/// Public, read-only view of a task's per-run state.
///
/// This is exposed for tests and diagnostics without leaking the internal
/// `RunState` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    /// The run has not been started yet.
    NotInRun,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
}

impl From<Option<RunState>> for TaskRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => TaskRunState::NotInRun,
            Some(RunState::Pending) => TaskRunState::Pending,
            Some(RunState::Running) => TaskRunState::Running,
            Some(RunState::DoneSuccess) => TaskRunState::DoneSuccess,
            Some(RunState::DoneFailed) => TaskRunState::DoneFailed,
        }
    }
}

/// Static task information plus per-run state.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: TaskName,
    /// Direct dependencies for this task (names in `after = [...]`).
    pub deps: Vec<TaskName>,
    /// Per-run state (None until the run starts).
    pub run_state: Option<RunState>,
    /// Why the task ended up `DoneFailed`, if it did.
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn new(name: TaskName, deps: Vec<TaskName>) -> Self {
        Self {
            name,
            deps,
            run_state: None,
            error: None,
        }
    }
}

/// A task the scheduler wants the runner to open now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: TaskName,
}

impl ScheduledTask {
    pub fn from_task_info(info: &TaskInfo) -> Self {
        Self {
            name: info.name.clone(),
        }
    }
}
