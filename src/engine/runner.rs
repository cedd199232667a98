// src/engine/runner.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::dag::{Scheduler, SchedulerStep, UPSTREAM_FAILED};
use crate::engine::pipeline::{Pipeline, PipelinePlan};
use crate::engine::TaskName;
use crate::errors::Result;
use crate::exec::{Executor, ExecutorRegistry};
use crate::identity::Oid;
use crate::model::TaskStatus;
use crate::runtime::{connect_with, ChannelPolicy, TaskRuntime};
use crate::storage::StorageRegistry;
use crate::types::{BoxFuture, CancelSignal, TaskOutcome};

/// Concurrent task limit when none is configured.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Error recorded on tasks that never started because the run was cancelled.
pub const CANCELLED: &str = "pipeline cancelled";

/// Final state of one pipeline task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub oid: Oid,
    pub status: TaskStatus,
    /// Empty unless `status` is `Failed`.
    pub error: String,
    /// Blocks this task emitted that no consumer received.
    pub dropped_emissions: u64,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub root_oid: Oid,
    pub status: TaskStatus,
    pub error: String,
    pub tasks: BTreeMap<TaskName, TaskReport>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Finished
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.get(name)
    }

    /// Names of failed tasks, sorted.
    pub fn failed(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Runs a [`Pipeline`] to completion.
///
/// The runner is the async shell around the pure [`Scheduler`]:
/// - it validates the pipeline and builds every executor up front, so a
///   cycle or an unsupported task fails before anything runs
/// - it creates the root runtime and one subtask runtime per task, and wires
///   stream edges between them
/// - it opens and spawns tasks as the scheduler releases them, bounded by
///   `max_workers`, and feeds their outcomes back
pub struct PipelineRunner {
    registry: StorageRegistry,
    executors: ExecutorRegistry,
    max_workers: usize,
    channel_policy: ChannelPolicy,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("registry", &self.registry)
            .field("executors", &self.executors)
            .field("max_workers", &self.max_workers)
            .field("channel_policy", &self.channel_policy)
            .finish()
    }
}

impl PipelineRunner {
    pub fn new(registry: StorageRegistry, executors: ExecutorRegistry) -> Self {
        Self {
            registry,
            executors,
            max_workers: DEFAULT_MAX_WORKERS,
            channel_policy: ChannelPolicy::default(),
        }
    }

    /// Limit concurrently running tasks. `0` is treated as `1`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        if max_workers == 0 {
            warn!("max_workers of 0 requested; using 1");
        }
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_channel_policy(mut self, policy: ChannelPolicy) -> Self {
        self.channel_policy = policy;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub async fn run(&self, pipeline: &Pipeline) -> Result<PipelineReport> {
        self.run_with_cancel(pipeline, CancelSignal::never()).await
    }

    /// Run `pipeline`, aborting running tasks and failing unstarted ones once
    /// `cancel` fires.
    ///
    /// Returns `Err` only for problems found before execution starts
    /// (invalid graph, unsupported task, missing storage). Task failures are
    /// reported in the [`PipelineReport`].
    pub async fn run_with_cancel(&self, pipeline: &Pipeline, cancel: CancelSignal) -> Result<PipelineReport> {
        let plan = pipeline.plan()?;
        let mut scheduler = Scheduler::new(plan.graph.clone())?;

        let mut executors: HashMap<TaskName, Box<dyn Executor>> = HashMap::new();
        for task in pipeline.tasks() {
            executors.insert(task.name().to_string(), self.executors.dispatch(&task.spec)?);
        }

        let root = TaskRuntime::create_root(&self.registry, pipeline.name())?;
        root.set_estimate_subtasks(pipeline.len() as u64)?;

        let mut runtimes: HashMap<TaskName, Arc<TaskRuntime>> = HashMap::new();
        for task in pipeline.tasks() {
            runtimes.insert(task.name().to_string(), root.create_subtask(task.name())?);
        }
        for edge in pipeline.streams() {
            if let (Some(from), Some(to)) = (runtimes.get(&edge.from), runtimes.get(&edge.to)) {
                connect_with(from, to, self.channel_policy);
            }
        }

        info!(
            pipeline = %pipeline.name(),
            root = %root.oid(),
            tasks = pipeline.len(),
            streams = pipeline.streams().len(),
            max_workers = self.max_workers,
            "pipeline run started"
        );

        let mut run = Run {
            plan: &plan,
            executors,
            runtimes: &runtimes,
            cancel: cancel.clone(),
            permits: Arc::new(Semaphore::new(self.max_workers)),
            max_workers: self.max_workers,
            events: mpsc::unbounded_channel(),
            ready: HashSet::new(),
            launched: HashSet::new(),
            dead_groups: HashSet::new(),
            in_flight: 0,
        };

        let mut step = scheduler.start();
        let mut cancelled = false;

        loop {
            run.apply(&mut scheduler, step).await;

            if scheduler.is_finished() {
                break;
            }

            if run.in_flight == 0 {
                // Nothing can complete any more; fail whatever is left.
                warn!(pipeline = %pipeline.name(), "no task in flight but run not finished");
                step = run.abandon(&mut scheduler, "pipeline stalled");
                continue;
            }

            tokio::select! {
                Some((name, outcome)) = run.events.1.recv() => {
                    run.in_flight -= 1;
                    debug!(task = %name, ?outcome, in_flight = run.in_flight, "task completed");
                    step = scheduler.handle_completion(&name, outcome);
                }
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!(pipeline = %pipeline.name(), "cancellation requested");
                    step = run.abandon(&mut scheduler, CANCELLED);
                }
            }
        }

        let failed = scheduler.failed_tasks();
        if failed.is_empty() {
            root.finish()?;
        } else {
            root.fail(format!(
                "{} of {} tasks failed: {}",
                failed.len(),
                pipeline.len(),
                failed.join(", ")
            ))?;
        }

        let report = PipelineReport {
            root_oid: root.oid(),
            status: root.status(),
            error: root.error(),
            tasks: runtimes
                .iter()
                .map(|(name, rt)| {
                    let report = TaskReport {
                        oid: rt.oid(),
                        status: rt.status(),
                        error: rt.error(),
                        dropped_emissions: rt.dropped_emissions(),
                    };
                    (name.clone(), report)
                })
                .collect(),
        };

        info!(
            pipeline = %pipeline.name(),
            root = %report.root_oid,
            status = %report.status,
            failed = failed.len(),
            "pipeline run finished"
        );
        Ok(report)
    }
}

type Completion = (TaskName, TaskOutcome);

/// Mutable bookkeeping of one run.
struct Run<'a> {
    plan: &'a PipelinePlan,
    executors: HashMap<TaskName, Box<dyn Executor>>,
    runtimes: &'a HashMap<TaskName, Arc<TaskRuntime>>,
    cancel: CancelSignal,
    permits: Arc<Semaphore>,
    max_workers: usize,
    events: (mpsc::UnboundedSender<Completion>, mpsc::UnboundedReceiver<Completion>),
    /// Released by the scheduler but waiting for the rest of their group.
    ready: HashSet<TaskName>,
    launched: HashSet<TaskName>,
    /// Groups that can never launch because a member failed first.
    dead_groups: HashSet<usize>,
    in_flight: usize,
}

impl Run<'_> {
    /// Act on one scheduler step until no further step is produced locally.
    async fn apply(&mut self, scheduler: &mut Scheduler, step: SchedulerStep) {
        let mut pending = vec![step];

        while let Some(step) = pending.pop() {
            for name in &step.newly_failed {
                self.fail_unstarted(scheduler, name);
                if let Some(&group) = self.plan.group_of.get(name) {
                    self.kill_group(scheduler, group, &mut pending);
                }
            }

            let mut launchable: Vec<usize> = Vec::new();
            for task in step.newly_scheduled {
                let Some(&group) = self.plan.group_of.get(&task.name) else {
                    continue;
                };
                if self.dead_groups.contains(&group) {
                    pending.push(self.fail_ready(scheduler, &task.name, UPSTREAM_FAILED));
                    continue;
                }
                self.ready.insert(task.name);
                let members = &self.plan.groups[group];
                if members.iter().all(|m| self.ready.contains(m)) && !launchable.contains(&group) {
                    launchable.push(group);
                }
            }

            if !launchable.is_empty() {
                self.launch(&launchable).await;
            }
        }
    }

    /// Open every member of `groups`, then spawn them producers first.
    ///
    /// Members of one group stream into each other and must run together, so
    /// a group takes its permits in one go (one per member, at most
    /// `max_workers`) and holds them until its last member completes.
    async fn launch(&mut self, groups: &[usize]) {
        let mut opened: Vec<Vec<(TaskName, BoxFuture<'static, TaskOutcome>)>> = Vec::new();

        for &group in groups {
            let mut members = Vec::new();
            for name in &self.plan.groups[group] {
                self.ready.remove(name);
                let (Some(executor), Some(runtime)) = (self.executors.get(name), self.runtimes.get(name)) else {
                    continue;
                };
                debug!(task = %name, oid = %runtime.oid(), "opening executor");
                members.push((name.clone(), executor.open(Arc::clone(runtime), self.cancel.clone())));
                self.launched.insert(name.clone());
            }
            opened.push(members);
        }

        for members in opened {
            if members.is_empty() {
                continue;
            }
            let wanted = members.len().min(self.max_workers);
            let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);
            // The pool is never closed, so the permits are always granted.
            let permits = Arc::new(Arc::clone(&self.permits).acquire_many_owned(wanted).await.ok());

            for (name, future) in members {
                let permits = Arc::clone(&permits);
                let tx = self.events.0.clone();
                self.in_flight += 1;
                debug!(task = %name, in_flight = self.in_flight, "spawning task");
                tokio::spawn(async move {
                    let outcome = future.await;
                    drop(permits);
                    let _ = tx.send((name, outcome));
                });
            }
        }
    }

    /// Mark a group unlaunchable and fail members already released.
    fn kill_group(&mut self, scheduler: &mut Scheduler, group: usize, pending: &mut Vec<SchedulerStep>) {
        if !self.dead_groups.insert(group) {
            return;
        }
        for member in &self.plan.groups[group] {
            if self.ready.contains(member) {
                pending.push(self.fail_ready(scheduler, member, UPSTREAM_FAILED));
            }
        }
    }

    /// Fail a task the scheduler released but that was never opened.
    fn fail_ready(&mut self, scheduler: &mut Scheduler, name: &str, reason: &str) -> SchedulerStep {
        self.ready.remove(name);
        if let Some(runtime) = self.runtimes.get(name) {
            if let Err(err) = runtime.fail(reason) {
                warn!(task = %name, error = %err, "could not record task failure");
            }
        }
        scheduler.handle_completion(name, TaskOutcome::Failed(reason.to_string()))
    }

    /// Record a scheduler-side failure on a runtime that never started.
    fn fail_unstarted(&self, scheduler: &Scheduler, name: &str) {
        if self.launched.contains(name) {
            return;
        }
        let Some(runtime) = self.runtimes.get(name) else {
            return;
        };
        if runtime.status().is_terminal() {
            return;
        }
        let reason = scheduler.error_of(name).unwrap_or(UPSTREAM_FAILED);
        if let Err(err) = runtime.fail(reason) {
            warn!(task = %name, error = %err, "could not record task failure");
        }
    }

    /// Fail everything not yet running with `reason`.
    fn abandon(&mut self, scheduler: &mut Scheduler, reason: &str) -> SchedulerStep {
        let mut step = scheduler.cancel_pending(reason);

        let mut waiting: Vec<TaskName> = self.ready.iter().cloned().collect();
        waiting.sort();
        for name in waiting {
            let next = self.fail_ready(scheduler, &name, reason);
            step.newly_failed.extend(next.newly_failed);
            step.run_just_finished = next.run_just_finished;
        }
        step
    }
}
