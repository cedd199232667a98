// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::ScheduledTask;
use crate::engine::TaskName;

/// Structured result of a single scheduler "step".
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks that were newly marked as failed in this step: the task that
    /// failed (if any) followed by every dependent blocked by it.
    pub newly_failed: Vec<TaskName>,
    /// Whether this step left every task in a terminal state.
    pub run_just_finished: bool,
}
