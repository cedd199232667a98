// src/exec/executor.rs

//! The executor abstraction.
//!
//! An [`Executor`] takes ownership of driving one [`TaskRuntime`] from
//! `Pending` to a terminal state. The scheduler only ever sees the resulting
//! [`TaskOutcome`]; execution errors are recorded on the runtime's state and
//! never propagate across task boundaries.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::errors::{Result, StreamdagError};
use crate::runtime::TaskRuntime;
use crate::types::{BoxFuture, CancelSignal, TaskOutcome};

/// Polymorphic driver of a task's actual work.
///
/// Implementations must make any subscription they need (e.g.
/// [`TaskRuntime::receive`]) synchronously inside `open`, before returning
/// the future. The scheduler relies on this to open every consumer of a
/// wave before any producer starts emitting.
pub trait Executor: Send + Sync {
    fn open(&self, runtime: Arc<TaskRuntime>, cancel: CancelSignal) -> BoxFuture<'static, TaskOutcome>;
}

/// Run `work` inside `runtime`'s state machine.
///
/// - `Pending -> Running` before the work starts,
/// - `Running -> Finished` if it returns `Ok`,
/// - `Running -> Failed(error)` if it errors or `cancel` fires first.
///
/// When `cancel` fires, `work` is dropped where it stands.
pub(crate) async fn drive<F>(runtime: Arc<TaskRuntime>, cancel: CancelSignal, work: F) -> TaskOutcome
where
    F: Future<Output = Result<()>>,
{
    drive_until_settled(runtime, async move {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            res = work => res,
            _ = cancel.cancelled() => Err(cancelled()),
        }
    })
    .await
}

/// Like [`drive`], but `work` watches for cancellation itself and is always
/// polled to completion. Stages that own subtasks use this so every subtask
/// is settled before the stage reports.
pub(crate) async fn drive_until_settled<F>(runtime: Arc<TaskRuntime>, work: F) -> TaskOutcome
where
    F: Future<Output = Result<()>>,
{
    if let Err(err) = runtime.start() {
        error!(oid = %runtime.oid(), error = %err, "could not start task");
        return TaskOutcome::Failed(err.to_string());
    }

    match work.await {
        Ok(()) => match runtime.finish() {
            Ok(()) => {
                info!(oid = %runtime.oid(), name = %runtime.name(), "task finished");
                TaskOutcome::Success
            }
            Err(err) => {
                error!(oid = %runtime.oid(), error = %err, "could not record task completion");
                TaskOutcome::Failed(err.to_string())
            }
        },
        Err(err) => {
            let message = err.to_string();
            if let Err(persist_err) = runtime.fail(message.clone()) {
                error!(
                    oid = %runtime.oid(),
                    error = %persist_err,
                    "could not record task failure"
                );
            }
            TaskOutcome::Failed(message)
        }
    }
}

pub(crate) fn cancelled() -> StreamdagError {
    StreamdagError::ExecutionError("cancelled".to_string())
}
