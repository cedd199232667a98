use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamdag::exec::{Executor, ExecutorRegistry};
use streamdag::model::{DataBlock, SourceKind, TaskKind};
use streamdag::runtime::TaskRuntime;
use streamdag::types::{BoxFuture, CancelSignal, TaskOutcome};

#[derive(Default)]
struct Script {
    failing: HashSet<String>,
    emits: HashMap<String, Vec<DataBlock>>,
    delays: HashMap<String, Duration>,
    opened: Vec<String>,
    received: HashMap<String, Vec<DataBlock>>,
    running: usize,
    peak_running: usize,
}

/// A fake executor that:
/// - records which tasks were opened, in order
/// - records every block each task received
/// - tracks how many tasks ran at the same time
/// - emits scripted blocks, then finishes, unless scripted to fail
///
/// Clones share state, so one instance can back every task of a pipeline
/// via [`FakeExecutor::registry`].
#[derive(Clone, Default)]
pub struct FakeExecutor {
    script: Arc<Mutex<Script>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, task: &str) -> Self {
        self.script.lock().unwrap().failing.insert(task.to_string());
        self
    }

    pub fn emitting(self, task: &str, blocks: Vec<DataBlock>) -> Self {
        self.script
            .lock()
            .unwrap()
            .emits
            .insert(task.to_string(), blocks);
        self
    }

    /// `task` runs for `delay` before it emits or completes.
    pub fn slow(self, task: &str, delay: Duration) -> Self {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(task.to_string(), delay);
        self
    }

    /// Names of tasks whose executor was opened, in order.
    pub fn opened(&self) -> Vec<String> {
        self.script.lock().unwrap().opened.clone()
    }

    pub fn was_opened(&self, task: &str) -> bool {
        self.opened().iter().any(|t| t == task)
    }

    /// Largest number of tasks that were running at once.
    pub fn peak_running(&self) -> usize {
        self.script.lock().unwrap().peak_running
    }

    /// Row counts of the blocks `task` received, in arrival order.
    pub fn received_sizes(&self, task: &str) -> Vec<usize> {
        self.script
            .lock()
            .unwrap()
            .received
            .get(task)
            .map(|blocks| blocks.iter().map(|b| b.len()).collect())
            .unwrap_or_default()
    }

    /// Registry dispatching every task and source kind to this executor.
    pub fn registry(&self) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for task in [TaskKind::Query, TaskKind::OptionQuery, TaskKind::BatchInsert] {
            for source in [SourceKind::Database, SourceKind::File] {
                let fake = self.clone();
                registry.register(task, source, move |_spec| {
                    Ok(Box::new(fake.clone()) as Box<dyn Executor>)
                });
            }
        }
        registry
    }
}

impl Executor for FakeExecutor {
    fn open(&self, runtime: Arc<TaskRuntime>, cancel: CancelSignal) -> BoxFuture<'static, TaskOutcome> {
        let name = runtime.name();
        let (fail, emits, delay) = {
            let mut script = self.script.lock().unwrap();
            script.opened.push(name.clone());
            (
                script.failing.contains(&name),
                script.emits.get(&name).cloned().unwrap_or_default(),
                script.delays.get(&name).copied(),
            )
        };

        let script = Arc::clone(&self.script);
        let receiver = name.clone();
        runtime.receive(move |block| {
            script
                .lock()
                .unwrap()
                .received
                .entry(receiver.clone())
                .or_default()
                .push(block);
        });

        let counter = Arc::clone(&self.script);
        Box::pin(async move {
            if let Err(err) = runtime.start() {
                return TaskOutcome::Failed(err.to_string());
            }

            {
                let mut script = counter.lock().unwrap();
                script.running += 1;
                script.peak_running = script.peak_running.max(script.running);
            }
            let outcome = run_script(&runtime, &name, fail, emits, delay, &cancel).await;
            counter.lock().unwrap().running -= 1;
            outcome
        })
    }
}

async fn run_script(
    runtime: &TaskRuntime,
    name: &str,
    fail: bool,
    emits: Vec<DataBlock>,
    delay: Option<Duration>,
    cancel: &CancelSignal,
) -> TaskOutcome {
    if let Some(delay) = delay {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                let _ = runtime.fail("cancelled");
                return TaskOutcome::Failed("cancelled".to_string());
            }
        }
    }

    if fail {
        let msg = format!("fake failure in {name}");
        let _ = runtime.fail(msg.clone());
        return TaskOutcome::Failed(msg);
    }

    for block in emits {
        runtime.emit(block);
    }

    match runtime.finish() {
        Ok(()) => TaskOutcome::Success,
        Err(err) => TaskOutcome::Failed(err.to_string()),
    }
}
