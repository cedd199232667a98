// src/exec/query.rs

use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::Driver;
use crate::errors::{Result, StreamdagError};
use crate::exec::executor::{drive, Executor};
use crate::model::{DataBlock, DataSource, TaskSpec};
use crate::runtime::TaskRuntime;
use crate::types::{BoxFuture, CancelSignal, TaskOutcome};

/// Runs a query and streams its result downstream in bounded blocks.
///
/// Every non-empty fetch becomes one [`DataBlock`] passed to
/// [`TaskRuntime::emit`]. A fetch shorter than the batch size ends the stream.
/// Each fetch waits for [`TaskRuntime::ready`], so a slow consumer slows the
/// query down instead of piling up blocks.
pub struct QueryExecutor {
    source: DataSource,
    sql: String,
    args: Vec<String>,
    batch_size: usize,
    driver: Arc<dyn Driver>,
}

impl QueryExecutor {
    pub fn new(
        source: DataSource,
        sql: impl Into<String>,
        args: Vec<String>,
        batch_size: usize,
        driver: Arc<dyn Driver>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(StreamdagError::ConfigError(
                "query batch_size must be >= 1 (got 0)".to_string(),
            ));
        }
        Ok(Self {
            source,
            sql: sql.into(),
            args,
            batch_size,
            driver,
        })
    }

    pub fn from_spec(spec: &TaskSpec, driver: Arc<dyn Driver>) -> Result<Self> {
        match spec {
            TaskSpec::Query {
                source,
                sql,
                args,
                batch_size,
            } => Self::new(source.clone(), sql.clone(), args.clone(), *batch_size, driver),
            other => Err(StreamdagError::UnsupportedTask(format!(
                "query executor cannot run a {} task",
                other.kind()
            ))),
        }
    }
}

impl Executor for QueryExecutor {
    fn open(&self, runtime: Arc<TaskRuntime>, cancel: CancelSignal) -> BoxFuture<'static, TaskOutcome> {
        let source = self.source.clone();
        let sql = self.sql.clone();
        let args = self.args.clone();
        let batch_size = self.batch_size;
        let driver = Arc::clone(&self.driver);
        let rt = Arc::clone(&runtime);

        Box::pin(drive(runtime, cancel, async move {
            let mut conn = driver.connect(&source).await?;
            conn.execute(&sql, &args).await?;

            let mut blocks = 0u64;
            let mut rows = 0usize;
            loop {
                // Fetch nothing more until downstream can take it.
                rt.ready().await;
                let batch = conn.fetch(batch_size).await?;
                if batch.is_empty() {
                    break;
                }
                let exhausted = batch.len() < batch_size;
                rows += batch.len();
                blocks += 1;
                debug!(oid = %rt.oid(), block = blocks, rows = batch.len(), "emitting query block");
                rt.emit(DataBlock::new(batch));
                if exhausted {
                    break;
                }
            }

            info!(oid = %rt.oid(), blocks, rows, batch_size, "query drained");
            Ok(())
        }))
    }
}
