// src/model/block.rs

use std::ops::Deref;
use std::sync::Arc;

use serde_json::{Map, Value};

/// One schema-less row: string keys to JSON values.
pub type Record = Map<String, Value>;

/// Ordered, finite batch of records; the atomic unit of streaming transfer.
///
/// Blocks are immutable once built and cheap to clone, so fan-out to several
/// subscribers shares the same rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBlock {
    records: Arc<Vec<Record>>,
}

impl DataBlock {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Copy the rows out, e.g. to hand them to a driver that wants ownership.
    pub fn to_vec(&self) -> Vec<Record> {
        self.records.as_ref().clone()
    }
}

impl Deref for DataBlock {
    type Target = [Record];

    fn deref(&self) -> &[Record] {
        &self.records
    }
}

impl From<Vec<Record>> for DataBlock {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<Record> for DataBlock {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
