// src/dag/scheduler.rs

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{RunState, TaskInfo, TaskRunState};
use crate::engine::TaskName;
use crate::errors::Result;
use crate::types::TaskOutcome;

/// Scheduler holds the immutable DAG plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a task is ready to run (every dependency succeeded)
/// - recording task outcomes
/// - failing dependents when a task fails
///
/// It is pure: no IO, no async. The runner feeds it completions and acts on
/// the [`SchedulerStep`]s it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    tasks: HashMap<TaskName, TaskInfo>,
    started: bool,
}

impl Scheduler {
    /// Construct a scheduler, rejecting unknown dependencies and cycles.
    pub fn new(graph: DagGraph) -> Result<Self> {
        graph.validate()?;

        let tasks = graph
            .tasks()
            .map(|name| {
                let deps = graph.dependencies_of(name).to_vec();
                (name.to_string(), TaskInfo::new(name.to_string(), deps))
            })
            .collect();

        Ok(Self {
            graph,
            tasks,
            started: false,
        })
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Returns `true` once the run has started and every task is terminal.
    pub fn is_finished(&self) -> bool {
        self.started && self.read_only_all_terminal()
    }

    /// Read-only view of the given task's run state.
    pub fn run_state_of(&self, task: &str) -> Option<TaskRunState> {
        let info = self.tasks.get(task)?;
        Some(info.run_state.into())
    }

    /// Failure reason recorded for `task`, if it failed.
    pub fn error_of(&self, task: &str) -> Option<&str> {
        self.tasks.get(task)?.error.as_deref()
    }

    /// Whether the dependencies of `task` are satisfied.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let info = self.tasks.get(task)?;
        let mgr = ReadOnlyStateManager::new(&self.tasks);
        Some(mgr.deps_satisfied_for_info(info))
    }

    /// Names of tasks that ended `DoneFailed`, sorted.
    pub fn failed_tasks(&self) -> Vec<TaskName> {
        let mut failed: Vec<TaskName> = self
            .tasks
            .values()
            .filter(|info| info.run_state == Some(RunState::DoneFailed))
            .map(|info| info.name.clone())
            .collect();
        failed.sort();
        failed
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.tasks()
    }

    /// Put every task into the run and return the ones with no dependencies.
    ///
    /// Calling this twice is a no-op the second time.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!("scheduler: start called on a run that already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;

        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        manager.mark_all_pending();
        let newly_scheduled = manager.collect_new_ready_tasks();
        let run_just_finished = manager.all_tasks_terminal();

        debug!(
            tasks = self.tasks.len(),
            ready = newly_scheduled.len(),
            "scheduler: run started"
        );

        SchedulerStep {
            newly_scheduled,
            newly_failed: Vec::new(),
            run_just_finished,
        }
    }

    /// Record the outcome of a running task.
    ///
    /// On success, dependents whose dependencies have now all succeeded are
    /// scheduled. On failure, every transitive dependent still pending is
    /// marked failed without ever running.
    pub fn handle_completion(&mut self, task: &str, outcome: TaskOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return step;
        };

        if info.run_state != Some(RunState::Running) {
            warn!(
                task = %task,
                state = ?info.run_state,
                "completion for a task that is not running; ignoring"
            );
            return step;
        }

        match outcome {
            TaskOutcome::Success => {
                info.run_state = Some(RunState::DoneSuccess);
                debug!(task = %info.name, "task completed successfully");
                let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                step.newly_scheduled = manager.collect_new_ready_tasks();
            }
            TaskOutcome::Failed(reason) => {
                info.run_state = Some(RunState::DoneFailed);
                warn!(
                    task = %info.name,
                    error = %reason,
                    "task failed; failing dependents in this run"
                );
                info.error = Some(reason);
                step.newly_failed.push(info.name.clone());
                let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                step.newly_failed.extend(manager.mark_dependents_failed(task));
            }
        }

        step.run_just_finished = self.read_only_all_terminal();
        if step.run_just_finished {
            info!("scheduler: all tasks terminal; run finished");
        }
        step
    }

    /// Fail every task that has not been scheduled yet.
    pub fn cancel_pending(&mut self, reason: &str) -> SchedulerStep {
        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        let newly_failed = manager.fail_all_pending(reason);
        let run_just_finished = manager.all_tasks_terminal();

        if !newly_failed.is_empty() {
            info!(count = newly_failed.len(), %reason, "scheduler: pending tasks cancelled");
        }

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_failed,
            run_just_finished,
        }
    }

    fn read_only_all_terminal(&self) -> bool {
        !self.tasks.values().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }
}
