// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::driver::MemoryDriver;
use crate::errors::{Result, StreamdagError};
use crate::model::{
    DataBlock, DataSource, NamedEntity, Record, TaskSpec, DEFAULT_BATCH_SIZE, DEFAULT_MAX_INFLIGHT_BATCHES,
};
use crate::runtime::ChannelPolicy;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_workers = 4
/// batch_size = 1000
///
/// [source.warehouse]
/// kind = "database"
/// name = "warehouse"
/// connection = { host = "db.internal", port = 5432, username = "etl" }
///
/// [source.lake]
/// kind = "file"
/// name = "lake.db"
///
/// [task.extract]
/// kind = "query"
/// source = "warehouse"
/// sql = "select * from orders"
///
/// [task.load]
/// kind = "batch_insert"
/// target = "lake"
/// stream_from = "extract"
/// ```
///
/// Use [`ConfigFile::try_from`] (or
/// [`load_and_validate`](crate::config::load_and_validate)) to obtain a
/// validated [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Data stores from `[source.<name>]`, keyed by the name tasks use to
    /// refer to them.
    #[serde(default)]
    pub source: BTreeMap<String, DataSource>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    /// Canned data for the in-memory driver from `[[fixture]]`.
    #[serde(default)]
    pub fixture: Vec<FixtureConfig>,
}

/// Validated configuration.
///
/// Every task's `source`/`target`, `after` and `stream_from` reference is
/// known, dependencies are acyclic and stream edges are legal.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub source: BTreeMap<String, DataSource>,
    pub task: BTreeMap<String, TaskConfig>,
    pub fixture: Vec<FixtureConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            source: raw.source,
            task: raw.task,
            fixture: raw.fixture,
        }
    }

    /// In-memory driver preloaded with every `[[fixture]]`.
    pub fn memory_driver(&self) -> MemoryDriver {
        self.fixture.iter().fold(MemoryDriver::new(), |driver, fixture| {
            let Some(source) = self.source.get(&fixture.source) else {
                return driver;
            };
            let database = source.name();
            match (&fixture.sql, &fixture.option) {
                (Some(sql), _) => driver.with_rows(database, sql, fixture.rows.clone()),
                (None, Some(option)) => {
                    driver.with_option(database, option, fixture.value.clone().unwrap_or(Value::Null))
                }
                (None, None) => driver,
            }
        })
    }

    /// Channel policy for every stream edge of the pipeline.
    pub fn channel_policy(&self) -> ChannelPolicy {
        ChannelPolicy::from_buffer_len(self.config.channel_buffer)
    }

    /// Resolve the named task into the spec its executor runs.
    pub fn task_spec(&self, name: &str) -> Result<TaskSpec> {
        let task = self
            .task
            .get(name)
            .ok_or_else(|| StreamdagError::TaskNotFound(name.to_string()))?;

        let spec = match &task.work {
            TaskWork::Query {
                source,
                sql,
                args,
                batch_size,
            } => TaskSpec::Query {
                source: self.lookup_source(name, source)?,
                sql: sql.clone(),
                args: args.clone(),
                batch_size: batch_size.unwrap_or(self.config.batch_size),
            },
            TaskWork::OptionQuery { source, option } => TaskSpec::OptionQuery {
                source: self.lookup_source(name, source)?,
                option: option.clone(),
            },
            TaskWork::BatchInsert { target, data } => TaskSpec::BatchInsert {
                target: self.lookup_source(name, target)?,
                data: DataBlock::new(data.clone()),
                max_inflight: self.config.max_inflight_batches,
            },
        };
        Ok(spec)
    }

    fn lookup_source(&self, task: &str, source: &str) -> Result<DataSource> {
        self.source.get(source).cloned().ok_or_else(|| {
            StreamdagError::ConfigError(format!("task '{task}' references unknown source '{source}'"))
        })
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Upper bound on concurrently running pipeline tasks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Rows per block for query tasks that do not set their own.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Blocks a stream buffers while its consumer has not subscribed yet.
    ///
    /// `0` (the default) drops such blocks.
    #[serde(default)]
    pub channel_buffer: usize,

    /// Blocks a batch insert holds before its producer has to wait.
    #[serde(default = "default_max_inflight_batches")]
    pub max_inflight_batches: usize,
}

fn default_max_workers() -> usize {
    crate::engine::DEFAULT_MAX_WORKERS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_inflight_batches() -> usize {
    DEFAULT_MAX_INFLIGHT_BATCHES
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            channel_buffer: 0,
            max_inflight_batches: default_max_inflight_batches(),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Task whose emitted blocks this task receives.
    #[serde(default)]
    pub stream_from: Option<String>,

    /// What the task does, selected by `kind = "..."`.
    #[serde(flatten)]
    pub work: TaskWork,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskWork {
    Query {
        source: String,
        sql: String,
        #[serde(default)]
        args: Vec<String>,
        /// Falls back to `[config].batch_size`.
        #[serde(default)]
        batch_size: Option<usize>,
    },
    OptionQuery {
        source: String,
        option: String,
    },
    BatchInsert {
        target: String,
        /// Rows written before any streamed block.
        #[serde(default)]
        data: Vec<Record>,
    },
}

impl TaskWork {
    /// Name of the `[source.<name>]` this task reads from or writes into.
    pub fn source_name(&self) -> &str {
        match self {
            TaskWork::Query { source, .. } | TaskWork::OptionQuery { source, .. } => source,
            TaskWork::BatchInsert { target, .. } => target,
        }
    }
}

/// `[[fixture]]` entry: rows a query returns, or the value of an option.
///
/// ```toml
/// [[fixture]]
/// source = "warehouse"
/// sql = "select * from orders"
/// rows = [{ id = 1 }, { id = 2 }]
///
/// [[fixture]]
/// source = "warehouse"
/// option = "server_version"
/// value = "16.2"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureConfig {
    pub source: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub rows: Vec<Record>,
    #[serde(default)]
    pub option: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}
