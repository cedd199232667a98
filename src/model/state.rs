// src/model/state.rs

//! Persisted execution record of one running task and its state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StreamdagError};
use crate::identity::Oid;
use crate::model::entity::{Entity, NamedEntity};

/// Lifecycle status of a task runtime.
///
/// ```text
/// Pending -> Running -> Finished
///    |          |
///    +----------+----> Failed
/// ```
///
/// `Pending -> Failed` is only used when a task is abandoned before its
/// executor is opened (upstream failure or cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }

    fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Finished)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted execution record for one running instance of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRuntimeState {
    pub oid: Option<Oid>,
    pub name: String,
    /// `None` only for the root of a pipeline execution.
    pub parent_oid: Option<Oid>,
    /// Advisory estimate of how many subtasks this runtime spawns.
    pub estimate_subtasks: Option<u64>,
    pub submit_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub status: TaskStatus,
    /// Empty unless `status == Failed`.
    pub error: String,
}

impl TaskRuntimeState {
    pub fn new(name: impl Into<String>, parent_oid: Option<Oid>, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            oid: None,
            name: name.into(),
            parent_oid,
            estimate_subtasks: None,
            submit_time: now,
            update_time: now,
            status,
            error: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_oid.is_none()
    }

    /// Apply a status transition, refreshing `update_time`.
    ///
    /// Terminal records are frozen: any further transition is rejected.
    pub fn transition(&mut self, next: TaskStatus, error: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(StreamdagError::InvalidTransition(format!(
                "task '{}' ({}) cannot move from {} to {}",
                self.name,
                self.oid.map(|o| o.to_string()).unwrap_or_else(|| "unsaved".to_string()),
                self.status,
                next
            )));
        }

        self.status = next;
        if next == TaskStatus::Failed {
            self.error = error.unwrap_or_default();
        }
        self.update_time = Utc::now();
        Ok(())
    }
}

impl Entity for TaskRuntimeState {
    fn oid(&self) -> Option<Oid> {
        self.oid
    }

    fn set_oid(&mut self, oid: Oid) {
        self.oid = Some(oid);
    }
}

impl NamedEntity for TaskRuntimeState {
    fn name(&self) -> &str {
        &self.name
    }
}
