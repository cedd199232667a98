// src/exec/option_query.rs

use std::sync::Arc;

use tracing::debug;

use crate::driver::Driver;
use crate::errors::{Result, StreamdagError};
use crate::exec::executor::{drive, Executor};
use crate::model::{DataBlock, DataSource, Record, TaskSpec};
use crate::runtime::TaskRuntime;
use crate::types::{BoxFuture, CancelSignal, TaskOutcome};

/// Reads one named option from a source and emits it as a single-row block
/// `{ <option>: <value> }`.
pub struct OptionQueryExecutor {
    source: DataSource,
    option: String,
    driver: Arc<dyn Driver>,
}

impl OptionQueryExecutor {
    pub fn new(source: DataSource, option: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            source,
            option: option.into(),
            driver,
        }
    }

    pub fn from_spec(spec: &TaskSpec, driver: Arc<dyn Driver>) -> Result<Self> {
        match spec {
            TaskSpec::OptionQuery { source, option } => {
                Ok(Self::new(source.clone(), option.clone(), driver))
            }
            other => Err(StreamdagError::UnsupportedTask(format!(
                "option query executor cannot run a {} task",
                other.kind()
            ))),
        }
    }
}

impl Executor for OptionQueryExecutor {
    fn open(&self, runtime: Arc<TaskRuntime>, cancel: CancelSignal) -> BoxFuture<'static, TaskOutcome> {
        let source = self.source.clone();
        let option = self.option.clone();
        let driver = Arc::clone(&self.driver);
        let rt = Arc::clone(&runtime);

        Box::pin(drive(runtime, cancel, async move {
            let mut conn = driver.connect(&source).await?;
            let value = conn.read_option(&option).await?;
            debug!(oid = %rt.oid(), %option, %value, "option read");

            let mut record = Record::new();
            record.insert(option, value);
            rt.ready().await;
            rt.emit(DataBlock::new(vec![record]));
            Ok(())
        }))
    }
}
