// src/exec/batch_insert.rs

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::driver::{Connection, Driver};
use crate::errors::{Result, StreamdagError};
use crate::exec::executor::{cancelled, drive, drive_until_settled, Executor};
use crate::model::{DataBlock, DataSource, TaskSpec, DEFAULT_MAX_INFLIGHT_BATCHES};
use crate::runtime::{Backlog, TaskRuntime};
use crate::types::{BoxFuture, CancelSignal, TaskOutcome};

type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// Writes every block it receives into a target.
///
/// Each block (plus the declared seed block, if any) is written inside its
/// own subtask runtime, so a rejected batch fails only that subtask and the
/// stage itself still finishes. Batch subtasks run concurrently with each
/// other and with the upstream producer; they share one target connection.
///
/// At most `max_inflight` upstream blocks are held at once, counting both
/// queued blocks and blocks being written. Producers wait in
/// [`TaskRuntime::ready`] until a batch settles.
///
/// The stage completes once the upstream channel is closed and every batch
/// subtask has reached a terminal state. On cancellation it stops taking
/// blocks, lets every spawned subtask record its own failure and then fails.
pub struct BatchInsertExecutor {
    target: DataSource,
    seed: DataBlock,
    max_inflight: usize,
    driver: Arc<dyn Driver>,
}

impl BatchInsertExecutor {
    pub fn new(target: DataSource, seed: DataBlock, driver: Arc<dyn Driver>) -> Self {
        Self {
            target,
            seed,
            max_inflight: DEFAULT_MAX_INFLIGHT_BATCHES,
            driver,
        }
    }

    /// `0` is treated as `1`.
    pub fn with_max_inflight(mut self, limit: usize) -> Self {
        self.max_inflight = limit.max(1);
        self
    }

    pub fn from_spec(spec: &TaskSpec, driver: Arc<dyn Driver>) -> Result<Self> {
        match spec {
            TaskSpec::BatchInsert {
                target,
                data,
                max_inflight,
            } => Ok(Self::new(target.clone(), data.clone(), driver).with_max_inflight(*max_inflight)),
            other => Err(StreamdagError::UnsupportedTask(format!(
                "batch insert executor cannot run a {} task",
                other.kind()
            ))),
        }
    }
}

/// One block waiting for its subtask. `limited` blocks came through a
/// channel and count against the backlog.
struct Batch {
    block: DataBlock,
    limited: bool,
}

/// Lifts the backlog limit when the stage ends, however it ends.
struct LiftOnDrop(Arc<Backlog>);

impl Drop for LiftOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl Executor for BatchInsertExecutor {
    fn open(&self, runtime: Arc<TaskRuntime>, cancel: CancelSignal) -> BoxFuture<'static, TaskOutcome> {
        let backlog = Backlog::new(self.max_inflight);

        // Subscribe before returning so no upstream block can slip past.
        let (tx, mut rx) = mpsc::unbounded_channel::<Batch>();
        if !self.seed.is_empty() {
            let _ = tx.send(Batch {
                block: self.seed.clone(),
                limited: false,
            });
        }
        let admitted = Arc::clone(&backlog);
        runtime.receive_limited(Arc::clone(&backlog), move |block| {
            admitted.admit();
            let _ = tx.send(Batch { block, limited: true });
        });

        let target = self.target.clone();
        let driver = Arc::clone(&self.driver);
        let slots = Arc::new(Semaphore::new(self.max_inflight));
        let rt = Arc::clone(&runtime);

        Box::pin(drive_until_settled(runtime, async move {
            let _lift = LiftOnDrop(Arc::clone(&backlog));
            let stage = rt.name();

            let conn = tokio::select! {
                conn = driver.connect(&target) => conn?,
                _ = cancel.cancelled() => return Err(cancelled()),
            };
            let conn: SharedConnection = Arc::new(Mutex::new(conn));

            let mut batches = JoinSet::new();
            let mut spawned = 0u64;
            let mut interrupted = false;
            let mut failure = None;

            loop {
                let next = tokio::select! {
                    next = rx.recv() => next,
                    _ = cancel.cancelled() => {
                        interrupted = true;
                        None
                    }
                };
                let Some(batch) = next else { break };

                let permit = tokio::select! {
                    permit = Arc::clone(&slots).acquire_owned() => permit,
                    _ = cancel.cancelled() => {
                        interrupted = true;
                        break;
                    }
                };
                let Ok(permit) = permit else { break };

                spawned += 1;
                let child = match rt.create_subtask(format!("{stage}/batch-{spawned}")) {
                    Ok(child) => child,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                };
                debug!(
                    stage = %stage,
                    batch = spawned,
                    oid = %child.oid(),
                    rows = batch.block.len(),
                    "spawning batch subtask"
                );

                let conn = Arc::clone(&conn);
                let settled = Arc::clone(&backlog);
                let cancel = cancel.clone();
                batches.spawn(async move {
                    let outcome = insert_batch(child, conn, batch.block, cancel).await;
                    drop(permit);
                    if batch.limited {
                        settled.settle();
                    }
                    outcome
                });

                if let Err(err) = rt.set_estimate_subtasks(spawned) {
                    failure = Some(err);
                    break;
                }
            }

            let mut failed = 0u64;
            while let Some(joined) = batches.join_next().await {
                match joined {
                    Ok(TaskOutcome::Success) => {}
                    Ok(TaskOutcome::Failed(_)) => failed += 1,
                    Err(err) => {
                        error!(stage = %stage, error = %err, "batch subtask panicked or was aborted");
                        failed += 1;
                    }
                }
            }

            if interrupted {
                warn!(stage = %stage, batches = spawned, failed, "cancelled; spawned batches settled");
                return Err(cancelled());
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if failed > 0 {
                warn!(stage = %stage, batches = spawned, failed, "some batches failed; stage continues");
            }
            info!(stage = %stage, batches = spawned, failed, "upstream closed; all batches settled");
            Ok(())
        }))
    }
}

async fn insert_batch(
    runtime: Arc<TaskRuntime>,
    conn: SharedConnection,
    block: DataBlock,
    cancel: CancelSignal,
) -> TaskOutcome {
    drive(runtime, cancel, async move {
        let mut conn = conn.lock().await;
        let written = conn.insert(&block).await?;
        debug!(rows = written, "batch written");
        Ok(())
    })
    .await
}
