// src/driver/mod.rs

//! Boundary to external data stores.
//!
//! Executors never talk to a database directly. They ask the [`Driver`]
//! registered for a [`SourceKind`] to open a [`Connection`] and then run
//! queries or inserts through it. Real network drivers live outside this
//! crate; [`memory::MemoryDriver`] is an in-process implementation for tests
//! and demos.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::Result;
use crate::model::{DataBlock, DataSource, Record, SourceKind};
use crate::types::BoxFuture;

pub mod memory;

pub use memory::MemoryDriver;

/// Opens connections to one kind of data store.
pub trait Driver: Send + Sync {
    fn connect<'a>(&'a self, source: &'a DataSource) -> BoxFuture<'a, Result<Box<dyn Connection>>>;
}

/// An open connection.
///
/// Query results are consumed through a cursor: [`Connection::execute`]
/// starts a query and [`Connection::fetch`] pulls the next rows, returning
/// fewer than `max_rows` (possibly none) once the result is exhausted.
pub trait Connection: Send {
    fn execute<'a>(&'a mut self, sql: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<()>>;

    fn fetch(&mut self, max_rows: usize) -> BoxFuture<'_, Result<Vec<Record>>>;

    fn read_option<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<Value>>;

    /// Insert every record of `block`; returns the number of rows written.
    fn insert<'a>(&'a mut self, block: &'a DataBlock) -> BoxFuture<'a, Result<u64>>;
}

/// Source kind → driver.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<SourceKind, Arc<dyn Driver>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SourceKind, driver: impl Driver + 'static) -> Self {
        self.register(kind, Arc::new(driver));
        self
    }

    pub fn register(&mut self, kind: SourceKind, driver: Arc<dyn Driver>) {
        self.drivers.insert(kind, driver);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<_> = self.drivers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
