// src/engine/lifecycle.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{Result, StreamdagError};
use crate::identity::Oid;
use crate::model::{TaskDef, TaskRef, TaskRuntimeState, TaskStatus};
use crate::runtime::TaskRuntime;
use crate::storage::{SaveFn, StorageRegistry};

/// Control surface for submitting and driving tasks one at a time, for
/// callers that manage execution themselves instead of through a
/// [`PipelineRunner`](crate::engine::PipelineRunner).
///
/// Tasks are addressed by the identity their [`TaskDef`] received on
/// [`create`](Self::create).
pub struct TaskLifecycle {
    registry: StorageRegistry,
    save_task: SaveFn<TaskDef>,
    tasks: HashMap<Oid, TaskDef>,
    names: HashMap<String, Oid>,
    runtimes: HashMap<Oid, Arc<TaskRuntime>>,
}

impl TaskLifecycle {
    /// Fails with `NoStorageRegistered` unless both [`TaskDef`] and
    /// [`TaskRuntimeState`] have a save function.
    pub fn new(registry: StorageRegistry) -> Result<Self> {
        let save_task = registry.get::<TaskDef>()?;
        registry.get::<TaskRuntimeState>()?;

        Ok(Self {
            registry,
            save_task,
            tasks: HashMap::new(),
            names: HashMap::new(),
            runtimes: HashMap::new(),
        })
    }

    /// Persist `task` with its dependencies and a `Pending` runtime state.
    ///
    /// Every dependency must name a task created earlier through this
    /// lifecycle; references are rewritten to identities. Names are unique.
    /// On success `task` carries its assigned identity.
    ///
    /// The runtime state is saved before the definition, so a definition is
    /// never persisted without one. If the definition is then rejected, the
    /// runtime is failed with the save error.
    pub fn create(&mut self, task: &mut TaskDef) -> Result<Oid> {
        if self.names.contains_key(&task.name) {
            return Err(StreamdagError::ConfigError(format!(
                "task '{}' was already created",
                task.name
            )));
        }
        let resolved = task
            .dependencies
            .iter()
            .map(|dep| self.resolve(dep).map(TaskRef::Oid))
            .collect::<Result<Vec<_>>>()?;

        let runtime = TaskRuntime::create_detached(&self.registry, task.name.clone())?;

        let mut pending = task.clone();
        pending.dependencies = resolved;
        let saved = match (self.save_task)(pending) {
            Ok(saved) => saved,
            Err(err) => {
                warn!(task = %task.name, runtime = %runtime.oid(), error = %err, "task definition rejected");
                if let Err(fail_err) = runtime.fail(err.to_string()) {
                    warn!(runtime = %runtime.oid(), error = %fail_err, "could not fail orphaned runtime");
                }
                return Err(err);
            }
        };
        let oid = match saved.oid {
            Some(oid) => oid,
            None => {
                let message = format!("save function did not assign an identity to task '{}'", saved.name);
                if let Err(fail_err) = runtime.fail(message.clone()) {
                    warn!(runtime = %runtime.oid(), error = %fail_err, "could not fail orphaned runtime");
                }
                return Err(StreamdagError::ExecutionError(message));
            }
        };
        info!(task = %saved.name, %oid, runtime = %runtime.oid(), "task created");

        *task = saved.clone();
        self.names.insert(saved.name.clone(), oid);
        self.tasks.insert(oid, saved);
        self.runtimes.insert(oid, runtime);
        Ok(oid)
    }

    /// `Pending -> Running`.
    pub fn start(&self, task: Oid) -> Result<()> {
        self.runtime(task)?.start()
    }

    /// `Running -> Finished`.
    pub fn finish(&self, task: Oid) -> Result<()> {
        self.runtime(task)?.finish()
    }

    /// `Pending | Running -> Failed`.
    pub fn fail(&self, task: Oid, error: impl Into<String>) -> Result<()> {
        self.runtime(task)?.fail(error)
    }

    pub fn status(&self, task: Oid) -> Result<TaskStatus> {
        Ok(self.runtime(task)?.status())
    }

    pub fn state(&self, task: Oid) -> Result<TaskRuntimeState> {
        Ok(self.runtime(task)?.snapshot())
    }

    pub fn task(&self, task: Oid) -> Result<&TaskDef> {
        self.tasks
            .get(&task)
            .ok_or_else(|| StreamdagError::TaskNotFound(format!("no task with identity {task}")))
    }

    /// The runtime backing `task`, e.g. to hand it to an executor.
    pub fn runtime(&self, task: Oid) -> Result<Arc<TaskRuntime>> {
        self.runtimes
            .get(&task)
            .cloned()
            .ok_or_else(|| StreamdagError::TaskNotFound(format!("no task with identity {task}")))
    }

    fn resolve(&self, dep: &TaskRef) -> Result<Oid> {
        let found = match dep {
            TaskRef::Oid(oid) => self.tasks.contains_key(oid).then_some(*oid),
            TaskRef::Name(name) => self.names.get(name).copied(),
        };
        found.ok_or_else(|| StreamdagError::TaskNotFound(format!("unknown dependency {dep}")))
    }
}
