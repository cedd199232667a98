// src/storage/mod.rs

//! Pluggable persistence.
//!
//! The [`StorageRegistry`] maps an entity type to the save function used to
//! persist it. This is the only place where backing storage is chosen; task
//! runtimes and executors just call whatever function was registered.
//!
//! - [`registry`] holds the registry itself.
//! - [`memory`] provides an in-memory store whose save function can be
//!   registered for any [`Entity`](crate::model::Entity).

pub mod memory;
pub mod registry;

pub use memory::MemoryStore;
pub use registry::{SaveFn, StorageRegistry};
