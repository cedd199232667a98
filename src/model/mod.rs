// src/model/mod.rs

//! Record shapes shared by the runtime, executors and scheduler.
//!
//! - [`entity`] has the identity-bearing traits every persisted record implements.
//! - [`task`] holds declared tasks and their dependency references.
//! - [`state`] is the persisted execution record of one running task.
//! - [`block`] is the unit of streaming transfer.
//! - [`descriptor`] describes external data stores.
//! - [`spec`] is the tagged task shape used to pick an executor.

pub mod block;
pub mod descriptor;
pub mod entity;
pub mod spec;
pub mod state;
pub mod task;

pub use block::{DataBlock, Record};
pub use descriptor::{ConnectionDescriptor, DataSource, DatabaseDescriptor, FileDatabaseDescriptor, SourceKind};
pub use entity::{Entity, NamedEntity};
pub use spec::{TaskKind, TaskSpec, DEFAULT_BATCH_SIZE, DEFAULT_MAX_INFLIGHT_BATCHES};
pub use state::{TaskRuntimeState, TaskStatus};
pub use task::{TaskDef, TaskRef};
