// src/model/spec.rs

use std::fmt;

use crate::model::block::DataBlock;
use crate::model::descriptor::{DataSource, SourceKind};

/// Rows per block a query emits unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Blocks a batch insert holds (queued or being written) before its
/// producers have to wait.
pub const DEFAULT_MAX_INFLIGHT_BATCHES: usize = 4;

/// Declared shape of a task's work; selects the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    /// Run `sql` against `source` and stream the result in blocks.
    Query {
        source: DataSource,
        sql: String,
        args: Vec<String>,
        batch_size: usize,
    },
    /// Read one named option/setting from `source`.
    OptionQuery { source: DataSource, option: String },
    /// Write `data` and every upstream block into `target`, holding at most
    /// `max_inflight` blocks at a time.
    BatchInsert {
        target: DataSource,
        data: DataBlock,
        max_inflight: usize,
    },
}

/// Discriminant of [`TaskSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Query,
    OptionQuery,
    BatchInsert,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Query => f.write_str("query"),
            TaskKind::OptionQuery => f.write_str("option_query"),
            TaskKind::BatchInsert => f.write_str("batch_insert"),
        }
    }
}

impl TaskSpec {
    pub fn query(source: DataSource, sql: impl Into<String>) -> Self {
        TaskSpec::Query {
            source,
            sql: sql.into(),
            args: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn batch_insert(target: DataSource) -> Self {
        TaskSpec::BatchInsert {
            target,
            data: DataBlock::default(),
            max_inflight: DEFAULT_MAX_INFLIGHT_BATCHES,
        }
    }

    /// Override the in-flight limit of a `BatchInsert`; other shapes are
    /// returned as-is.
    pub fn with_max_inflight(mut self, limit: usize) -> Self {
        if let TaskSpec::BatchInsert { max_inflight, .. } = &mut self {
            *max_inflight = limit;
        }
        self
    }

    /// Override the batch size of a `Query`; other shapes are returned as-is.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        if let TaskSpec::Query { batch_size, .. } = &mut self {
            *batch_size = size;
        }
        self
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::Query { .. } => TaskKind::Query,
            TaskSpec::OptionQuery { .. } => TaskKind::OptionQuery,
            TaskSpec::BatchInsert { .. } => TaskKind::BatchInsert,
        }
    }

    /// The data store this task talks to.
    pub fn data_source(&self) -> &DataSource {
        match self {
            TaskSpec::Query { source, .. } | TaskSpec::OptionQuery { source, .. } => source,
            TaskSpec::BatchInsert { target, .. } => target,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.data_source().kind()
    }
}
