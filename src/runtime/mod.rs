// src/runtime/mod.rs

//! Live execution contexts and the wiring between them.
//!
//! - [`task_runtime`] wraps one persisted [`TaskRuntimeState`] and owns its
//!   state machine, subtask creation and emit/receive hooks.
//! - [`connector`] is the per-channel routing primitive that links one
//!   runtime's emission to another's subscription.
//!
//! [`TaskRuntimeState`]: crate::model::TaskRuntimeState

pub mod connector;
pub mod task_runtime;

pub use connector::{connect, connect_with, Backlog, BlockCallback, Channel, ChannelPolicy, ChannelStats};
pub use task_runtime::TaskRuntime;
