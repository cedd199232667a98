// src/exec/mod.rs

//! Execution layer.
//!
//! - [`executor`] defines the [`Executor`] trait and the shared state-machine
//!   driver every executor runs its work through.
//! - [`query`], [`option_query`] and [`batch_insert`] are the built-in
//!   executors.
//! - [`dispatch`] maps a declared task shape to the executor that runs it.

pub mod batch_insert;
pub mod dispatch;
pub mod executor;
pub mod option_query;
pub mod query;

pub use batch_insert::BatchInsertExecutor;
pub use dispatch::{ExecutorFactory, ExecutorRegistry};
pub use executor::Executor;
pub use option_query::OptionQueryExecutor;
pub use query::QueryExecutor;
