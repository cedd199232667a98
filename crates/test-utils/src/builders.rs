#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{json, Value};
use streamdag::config::{ConfigFile, ConfigSection, FixtureConfig, RawConfigFile, TaskConfig, TaskWork};
use streamdag::errors::Result;
use streamdag::identity::SharedOidGenerator;
use streamdag::model::{
    ConnectionDescriptor, DataSource, DatabaseDescriptor, FileDatabaseDescriptor, Record, TaskDef,
    TaskRuntimeState,
};
use streamdag::storage::{MemoryStore, StorageRegistry};

/// `n` records `{ "id": 1 } .. { "id": n }`.
pub fn rows(n: usize) -> Vec<Record> {
    (1..=n).map(|i| record(json!({ "id": i }))).collect()
}

/// Turn a JSON object literal into a [`Record`]. Non-objects give an empty
/// record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Database descriptor named `name` on a local test server.
pub fn database(name: &str) -> DataSource {
    DataSource::Database(DatabaseDescriptor {
        oid: None,
        name: name.to_string(),
        connection: ConnectionDescriptor {
            oid: None,
            name: format!("{name}-conn"),
            host: "localhost".to_string(),
            port: Some(5432),
            username: "etl".to_string(),
            password: "secret".to_string(),
        },
    })
}

pub fn file_db(name: &str) -> DataSource {
    DataSource::File(FileDatabaseDescriptor {
        oid: None,
        name: name.to_string(),
    })
}

/// In-memory stores for runtime states and task definitions, drawing from
/// one identity generator.
///
/// [`MemoryStack::registry`] hands out registries whose save functions write
/// into these stores, so tests can inspect what a run persisted.
#[derive(Clone)]
pub struct MemoryStack {
    pub states: MemoryStore<TaskRuntimeState>,
    pub tasks: MemoryStore<TaskDef>,
}

impl MemoryStack {
    pub fn new() -> Self {
        let ids = SharedOidGenerator::default();
        Self {
            states: MemoryStore::with_generator(ids.clone()),
            tasks: MemoryStore::with_generator(ids),
        }
    }

    pub fn registry(&self) -> StorageRegistry {
        let mut registry = StorageRegistry::new();
        self.states.register_into(&mut registry);
        self.tasks.register_into(&mut registry);
        registry
    }
}

impl Default for MemoryStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                source: BTreeMap::new(),
                task: BTreeMap::new(),
                fixture: Vec::new(),
            },
        }
    }

    pub fn with_source(mut self, name: &str, source: DataSource) -> Self {
        self.config.source.insert(name.to_string(), source);
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_rows_fixture(mut self, source: &str, sql: &str, rows: Vec<Record>) -> Self {
        self.config.fixture.push(FixtureConfig {
            source: source.to_string(),
            sql: Some(sql.to_string()),
            rows,
            option: None,
            value: None,
        });
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.config.config.max_workers = n;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.config.config.batch_size = n;
        self
    }

    pub fn with_max_inflight_batches(mut self, n: usize) -> Self {
        self.config.config.max_inflight_batches = n;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    fn with_work(work: TaskWork) -> Self {
        Self {
            task: TaskConfig {
                after: vec![],
                stream_from: None,
                work,
            },
        }
    }

    pub fn query(source: &str, sql: &str) -> Self {
        Self::with_work(TaskWork::Query {
            source: source.to_string(),
            sql: sql.to_string(),
            args: vec![],
            batch_size: None,
        })
    }

    pub fn option_query(source: &str, option: &str) -> Self {
        Self::with_work(TaskWork::OptionQuery {
            source: source.to_string(),
            option: option.to_string(),
        })
    }

    pub fn batch_insert(target: &str) -> Self {
        Self::with_work(TaskWork::BatchInsert {
            target: target.to_string(),
            data: vec![],
        })
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn stream_from(mut self, task: &str) -> Self {
        self.task.stream_from = Some(task.to_string());
        self
    }

    /// Only meaningful for query tasks.
    pub fn batch_size(mut self, n: usize) -> Self {
        if let TaskWork::Query { batch_size, .. } = &mut self.task.work {
            *batch_size = Some(n);
        }
        self
    }

    /// Only meaningful for batch insert tasks.
    pub fn data(mut self, rows: Vec<Record>) -> Self {
        if let TaskWork::BatchInsert { data, .. } = &mut self.task.work {
            *data = rows;
        }
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
