// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::task_info::{RunState, ScheduledTask, TaskInfo};
use crate::dag::DagGraph;
use crate::engine::TaskName;

/// Error recorded on tasks that never ran because a dependency failed.
pub const UPSTREAM_FAILED: &str = "upstream dependency failed";

/// Manages per-run state transitions for tasks.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    tasks: &'a mut HashMap<TaskName, TaskInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, tasks: &'a mut HashMap<TaskName, TaskInfo>) -> Self {
        Self { graph, tasks }
    }

    /// Put every task into the run as `Pending`.
    pub fn mark_all_pending(&mut self) {
        for info in self.tasks.values_mut() {
            info.run_state = Some(RunState::Pending);
            info.error = None;
        }
    }

    /// Mark all not-yet-terminal dependents (transitively) of a failed task
    /// as `DoneFailed` with [`UPSTREAM_FAILED`].
    ///
    /// Returns the newly failed tasks, excluding `failed_task` itself.
    pub fn mark_dependents_failed(&mut self, failed_task: &str) -> Vec<TaskName> {
        let mut stack: Vec<TaskName> = self.graph.dependents_of(failed_task).to_vec();
        let mut newly_failed = Vec::new();

        while let Some(name) = stack.pop() {
            if let Some(info) = self.tasks.get_mut(&name) {
                match info.run_state {
                    Some(RunState::Pending) => {
                        info.run_state = Some(RunState::DoneFailed);
                        info.error = Some(UPSTREAM_FAILED.to_string());
                        debug!(
                            task = %info.name,
                            upstream = %failed_task,
                            "marking dependent as DoneFailed due to upstream failure"
                        );
                        newly_failed.push(info.name.clone());
                        stack.extend(self.graph.dependents_of(&name).iter().cloned());
                    }
                    Some(RunState::Running) => {
                        // Dependencies must all succeed before a task runs.
                        warn!(task = %info.name, upstream = %failed_task, "dependent already running");
                    }
                    Some(RunState::DoneSuccess) | Some(RunState::DoneFailed) | None => {}
                }
            }
        }

        newly_failed
    }

    /// Mark every still-`Pending` task `DoneFailed` with `reason`.
    pub fn fail_all_pending(&mut self, reason: &str) -> Vec<TaskName> {
        let mut failed: Vec<TaskName> = Vec::new();
        for info in self.tasks.values_mut() {
            if info.run_state == Some(RunState::Pending) {
                info.run_state = Some(RunState::DoneFailed);
                info.error = Some(reason.to_string());
                failed.push(info.name.clone());
            }
        }
        failed.sort();
        failed
    }

    /// Collect tasks that are `Pending` and whose dependencies all succeeded,
    /// mark them as `Running`, and return them in name order.
    pub fn collect_new_ready_tasks(&mut self) -> Vec<ScheduledTask> {
        let ro = ReadOnlyStateManager::new(self.tasks);
        let mut candidates: Vec<TaskName> = self
            .tasks
            .values()
            .filter(|info| {
                info.run_state == Some(RunState::Pending) && ro.deps_satisfied_for_info(info)
            })
            .map(|info| info.name.clone())
            .collect();
        candidates.sort();

        let mut ready = Vec::with_capacity(candidates.len());
        for name in candidates {
            if let Some(info) = self.tasks.get_mut(&name) {
                info!(task = %info.name, "dependencies satisfied; scheduling task");
                info.run_state = Some(RunState::Running);
                ready.push(ScheduledTask::from_task_info(info));
            }
        }

        ready
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        !self.tasks.values().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }
}

/// A read-only view for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a HashMap<TaskName, TaskInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a HashMap<TaskName, TaskInfo>) -> Self {
        Self { tasks }
    }

    /// A task is ready only once every dependency finished successfully.
    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        info.deps.iter().all(|dep_name| match self.tasks.get(dep_name) {
            Some(dep) => dep.run_state == Some(RunState::DoneSuccess),
            None => {
                warn!(
                    task = %info.name,
                    dep = %dep_name,
                    "dependency missing from tasks map"
                );
                false
            }
        })
    }
}
