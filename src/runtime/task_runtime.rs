// src/runtime/task_runtime.rs

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::errors::{Result, StreamdagError};
use crate::identity::Oid;
use crate::model::{DataBlock, TaskRuntimeState, TaskStatus};
use crate::runtime::connector::{Backlog, BlockCallback, Channel, ChannelStats};
use crate::storage::{SaveFn, StorageRegistry};

/// Live execution context of one running task instance.
///
/// A runtime exclusively owns one [`TaskRuntimeState`] and persists every
/// change to it through the save function it was created with. Runtimes are
/// shared as `Arc<TaskRuntime>` between the scheduler, the executor driving
/// them and the connector callbacks.
///
/// A runtime that was never connected emits into nothing and never calls a
/// receive callback, so source and leaf tasks need no special casing.
pub struct TaskRuntime {
    oid: Oid,
    state: Mutex<TaskRuntimeState>,
    save: SaveFn<TaskRuntimeState>,
    outputs: Mutex<Vec<Arc<Channel>>>,
    inputs: Mutex<Vec<Arc<Channel>>>,
}

impl fmt::Debug for TaskRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRuntime")
            .field("state", &*lock(&self.state))
            .field("outputs", &lock(&self.outputs).len())
            .field("inputs", &lock(&self.inputs).len())
            .finish()
    }
}

impl TaskRuntime {
    /// Create and persist the root runtime of one pipeline execution.
    ///
    /// The root starts out `Running` and has no parent.
    pub fn create_root(registry: &StorageRegistry, name: impl Into<String>) -> Result<Arc<Self>> {
        let save = registry.get::<TaskRuntimeState>()?;
        let state = TaskRuntimeState::new(name, None, TaskStatus::Running);
        let runtime = Self::persist_new(save, state)?;
        info!(oid = %runtime.oid, name = %runtime.name(), "root runtime created");
        Ok(runtime)
    }

    /// Create and persist a standalone `Pending` runtime with no parent, for
    /// tasks submitted one by one rather than as part of a pipeline.
    pub fn create_detached(registry: &StorageRegistry, name: impl Into<String>) -> Result<Arc<Self>> {
        let save = registry.get::<TaskRuntimeState>()?;
        let state = TaskRuntimeState::new(name, None, TaskStatus::Pending);
        Self::persist_new(save, state)
    }

    /// Create and persist a `Pending` child of this runtime.
    pub fn create_subtask(&self, name: impl Into<String>) -> Result<Arc<Self>> {
        let state = TaskRuntimeState::new(name, Some(self.oid), TaskStatus::Pending);
        let child = Self::persist_new(Arc::clone(&self.save), state)?;
        debug!(
            parent = %self.oid,
            oid = %child.oid,
            name = %child.name(),
            "subtask runtime created"
        );
        Ok(child)
    }

    fn persist_new(save: SaveFn<TaskRuntimeState>, state: TaskRuntimeState) -> Result<Arc<Self>> {
        let saved = save(state)?;
        let oid = saved.oid.ok_or_else(|| {
            StreamdagError::ExecutionError(format!(
                "save function did not assign an identity to task runtime '{}'",
                saved.name
            ))
        })?;

        Ok(Arc::new(Self {
            oid,
            state: Mutex::new(saved),
            save,
            outputs: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        }))
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn name(&self) -> String {
        lock(&self.state).name.clone()
    }

    pub fn parent_oid(&self) -> Option<Oid> {
        lock(&self.state).parent_oid
    }

    pub fn status(&self) -> TaskStatus {
        lock(&self.state).status
    }

    pub fn error(&self) -> String {
        lock(&self.state).error.clone()
    }

    /// Copy of the current state record.
    pub fn snapshot(&self) -> TaskRuntimeState {
        lock(&self.state).clone()
    }

    /// `Pending -> Running`.
    pub fn start(&self) -> Result<()> {
        self.transition(TaskStatus::Running, None)
    }

    /// `Running -> Finished`.
    pub fn finish(&self) -> Result<()> {
        self.transition(TaskStatus::Finished, None)
    }

    /// `Pending | Running -> Failed`, recording `error`.
    pub fn fail(&self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed, Some(error.into()))
    }

    /// Update the advisory subtask estimate and persist it.
    pub fn set_estimate_subtasks(&self, estimate: u64) -> Result<()> {
        self.update(|state| {
            state.estimate_subtasks = Some(estimate);
            Ok(())
        })
    }

    fn transition(&self, next: TaskStatus, error: Option<String>) -> Result<()> {
        self.update(|state| state.transition(next, error))?;

        match next {
            TaskStatus::Failed => {
                warn!(oid = %self.oid, name = %self.name(), error = %self.error(), "task failed")
            }
            _ => debug!(oid = %self.oid, name = %self.name(), status = %next, "task status changed"),
        }

        if next.is_terminal() {
            self.close_outputs();
        }
        Ok(())
    }

    /// Apply `change` to a copy of the state, persist it, and keep the saved
    /// record only if both succeed.
    fn update(&self, change: impl FnOnce(&mut TaskRuntimeState) -> Result<()>) -> Result<()> {
        let mut state = lock(&self.state);
        let mut updated = state.clone();
        change(&mut updated)?;
        *state = (self.save)(updated)?;
        Ok(())
    }

    /// Send `block` through every outgoing channel.
    pub fn emit(&self, block: DataBlock) {
        let outputs = lock(&self.outputs).clone();
        if outputs.is_empty() {
            trace!(oid = %self.oid, rows = block.len(), "emit on unconnected runtime; ignoring");
            return;
        }
        for channel in outputs {
            channel.send(block.clone());
        }
    }

    /// Register `callback` on every incoming channel.
    ///
    /// With no incoming channel the callback is released immediately.
    pub fn receive(&self, callback: impl Fn(DataBlock) + Send + Sync + 'static) {
        let callback: BlockCallback = Arc::new(callback);
        let inputs = lock(&self.inputs).clone();
        if inputs.is_empty() {
            trace!(oid = %self.oid, "receive on unconnected runtime; ignoring");
            return;
        }
        for channel in inputs {
            channel.subscribe(Arc::clone(&callback));
        }
    }

    /// Like [`receive`](Self::receive), and producers feeding this runtime
    /// wait in [`ready`](Self::ready) while `limit` is full.
    pub fn receive_limited(&self, limit: Arc<Backlog>, callback: impl Fn(DataBlock) + Send + Sync + 'static) {
        for channel in lock(&self.inputs).iter() {
            channel.limit_with(Arc::clone(&limit));
        }
        self.receive(callback);
    }

    /// Wait until every consumer downstream has room for another block.
    ///
    /// Returns immediately when no outgoing channel is limited.
    pub async fn ready(&self) {
        let outputs = lock(&self.outputs).clone();
        for channel in outputs {
            channel.ready().await;
        }
    }

    /// Close every outgoing channel so downstream receivers see end-of-stream.
    pub fn close_outputs(&self) {
        for channel in lock(&self.outputs).iter() {
            channel.close();
        }
    }

    /// Total blocks this runtime emitted that reached no receiver.
    pub fn dropped_emissions(&self) -> u64 {
        self.output_stats().iter().map(|s| s.dropped).sum()
    }

    pub fn output_stats(&self) -> Vec<ChannelStats> {
        lock(&self.outputs).iter().map(|c| c.stats()).collect()
    }

    pub(crate) fn attach_output(&self, channel: Arc<Channel>) {
        lock(&self.outputs).push(channel);
    }

    pub(crate) fn attach_input(&self, channel: Arc<Channel>) {
        lock(&self.inputs).push(channel);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
