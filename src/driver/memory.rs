// src/driver/memory.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::{Connection, Driver};
use crate::errors::{Result, StreamdagError};
use crate::model::{DataBlock, DataSource, NamedEntity, Record};
use crate::types::BoxFuture;

#[derive(Debug, Default)]
struct MemoryState {
    /// (database, sql) -> rows.
    results: HashMap<(String, String), Vec<Record>>,
    /// (database, option) -> value.
    options: HashMap<(String, String), Value>,
    /// database -> blocks written, in arrival order.
    inserted: HashMap<String, Vec<DataBlock>>,
    unreachable: HashSet<String>,
    failing_queries: HashSet<(String, String)>,
    /// Inserts fail for blocks containing a record with this field/value.
    poison: Option<(String, Value)>,
    connections_opened: usize,
}

/// In-process driver backed by canned results.
///
/// Databases are addressed by the descriptor name. Clones share state, so a
/// test can keep a handle and inspect what was written after a run.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
    fetch_delay: Option<Duration>,
    insert_delay: Option<Duration>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by `sql` against `database`.
    pub fn with_rows(self, database: &str, sql: &str, rows: Vec<Record>) -> Self {
        self.state()
            .results
            .insert((database.to_string(), sql.to_string()), rows);
        self
    }

    pub fn with_option(self, database: &str, name: &str, value: Value) -> Self {
        self.state()
            .options
            .insert((database.to_string(), name.to_string()), value);
        self
    }

    /// Connecting to `database` fails.
    pub fn unreachable(self, database: &str) -> Self {
        self.state().unreachable.insert(database.to_string());
        self
    }

    /// Executing `sql` against `database` fails.
    pub fn failing_query(self, database: &str, sql: &str) -> Self {
        self.state()
            .failing_queries
            .insert((database.to_string(), sql.to_string()));
        self
    }

    /// Inserting a block that contains a record with `field == value` fails.
    pub fn poison_inserts(self, field: &str, value: Value) -> Self {
        self.state().poison = Some((field.to_string(), value));
        self
    }

    /// Sleep before every fetch, to simulate slow sources.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Sleep before every insert, to simulate slow targets.
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// Blocks written into `database` so far.
    pub fn inserted(&self, database: &str) -> Vec<DataBlock> {
        self.state().inserted.get(database).cloned().unwrap_or_default()
    }

    pub fn inserted_rows(&self, database: &str) -> usize {
        self.inserted(database).iter().map(|b| b.len()).sum()
    }

    pub fn connections_opened(&self) -> usize {
        self.state().connections_opened
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for MemoryDriver {
    fn connect<'a>(&'a self, source: &'a DataSource) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let database = source.name().to_string();
            {
                let mut state = self.state();
                if state.unreachable.contains(&database) {
                    return Err(StreamdagError::ExecutionError(format!(
                        "cannot connect to database '{database}'"
                    )));
                }
                state.connections_opened += 1;
            }
            debug!(%database, kind = %source.kind(), "memory connection opened");

            let conn: Box<dyn Connection> = Box::new(MemoryConnection {
                database,
                state: Arc::clone(&self.state),
                fetch_delay: self.fetch_delay,
                insert_delay: self.insert_delay,
                cursor: VecDeque::new(),
            });
            Ok(conn)
        })
    }
}

struct MemoryConnection {
    database: String,
    state: Arc<Mutex<MemoryState>>,
    fetch_delay: Option<Duration>,
    insert_delay: Option<Duration>,
    cursor: VecDeque<Record>,
}

impl MemoryConnection {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connection for MemoryConnection {
    fn execute<'a>(&'a mut self, sql: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = (self.database.clone(), sql.to_string());
            let rows = {
                let state = self.state();
                if state.failing_queries.contains(&key) {
                    return Err(StreamdagError::ExecutionError(format!(
                        "query failed on '{}': {sql}",
                        self.database
                    )));
                }
                state.results.get(&key).cloned().unwrap_or_default()
            };
            debug!(database = %self.database, sql, ?args, rows = rows.len(), "query executed");
            self.cursor = rows.into();
            Ok(())
        })
    }

    fn fetch(&mut self, max_rows: usize) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            let n = max_rows.min(self.cursor.len());
            Ok(self.cursor.drain(..n).collect())
        })
    }

    fn read_option<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            self.state()
                .options
                .get(&(self.database.clone(), name.to_string()))
                .cloned()
                .ok_or_else(|| {
                    StreamdagError::ExecutionError(format!(
                        "unknown option '{name}' on '{}'",
                        self.database
                    ))
                })
        })
    }

    fn insert<'a>(&'a mut self, block: &'a DataBlock) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            if let Some(delay) = self.insert_delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state();
            if let Some((field, value)) = &state.poison {
                if block.iter().any(|r| r.get(field) == Some(value)) {
                    return Err(StreamdagError::ExecutionError(format!(
                        "insert into '{}' rejected a row with {field} = {value}",
                        self.database
                    )));
                }
            }
            state
                .inserted
                .entry(self.database.clone())
                .or_default()
                .push(block.clone());
            Ok(block.len() as u64)
        })
    }
}
