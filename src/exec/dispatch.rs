// src/exec/dispatch.rs

//! Executor selection.
//!
//! The dispatch key is the declared task shape ([`TaskKind`]) plus the kind
//! of data store it talks to ([`SourceKind`]). Each key maps to one factory;
//! an unknown key fails fast with [`StreamdagError::UnsupportedTask`] before
//! any connection is opened.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::driver::DriverRegistry;
use crate::errors::{Result, StreamdagError};
use crate::exec::{BatchInsertExecutor, Executor, OptionQueryExecutor, QueryExecutor};
use crate::model::{SourceKind, TaskKind, TaskSpec};

/// Builds an executor for one declared task.
pub type ExecutorFactory = Arc<dyn Fn(&TaskSpec) -> Result<Box<dyn Executor>> + Send + Sync>;

/// (task kind, source kind) → executor factory.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: BTreeMap<(TaskKind, SourceKind), ExecutorFactory>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executors for every source kind that has a
    /// driver.
    pub fn with_drivers(drivers: &DriverRegistry) -> Self {
        let mut registry = Self::new();

        for kind in drivers.kinds() {
            let Some(driver) = drivers.get(kind) else {
                continue;
            };

            let d = Arc::clone(&driver);
            registry.register(TaskKind::Query, kind, move |spec| {
                Ok(Box::new(QueryExecutor::from_spec(spec, Arc::clone(&d))?) as Box<dyn Executor>)
            });

            let d = Arc::clone(&driver);
            registry.register(TaskKind::OptionQuery, kind, move |spec| {
                Ok(Box::new(OptionQueryExecutor::from_spec(spec, Arc::clone(&d))?) as Box<dyn Executor>)
            });

            let d = driver;
            registry.register(TaskKind::BatchInsert, kind, move |spec| {
                Ok(Box::new(BatchInsertExecutor::from_spec(spec, Arc::clone(&d))?) as Box<dyn Executor>)
            });
        }

        registry
    }

    pub fn register<F>(&mut self, task: TaskKind, source: SourceKind, factory: F)
    where
        F: Fn(&TaskSpec) -> Result<Box<dyn Executor>> + Send + Sync + 'static,
    {
        debug!(%task, %source, "executor factory registered");
        self.factories.insert((task, source), Arc::new(factory));
    }

    pub fn supports(&self, task: TaskKind, source: SourceKind) -> bool {
        self.factories.contains_key(&(task, source))
    }

    /// Pick and build the executor for `spec`.
    pub fn dispatch(&self, spec: &TaskSpec) -> Result<Box<dyn Executor>> {
        let key = (spec.kind(), spec.source_kind());
        let factory = self.factories.get(&key).ok_or_else(|| {
            StreamdagError::UnsupportedTask(format!(
                "no executor for {} tasks on {} sources",
                key.0, key.1
            ))
        })?;
        factory(spec)
    }
}
