// tests/pipeline_runner.rs

use std::error::Error;
use std::time::Duration;

use streamdag::dag::UPSTREAM_FAILED;
use streamdag::engine::{Pipeline, PipelineRunner, CANCELLED};
use streamdag::errors::StreamdagError;
use streamdag::exec::ExecutorRegistry;
use streamdag::model::{DataBlock, TaskDef, TaskSpec, TaskStatus};
use streamdag::types::cancel_pair;
use streamdag_test_utils::{database, init_tracing, rows, with_timeout, FakeExecutor, MemoryStack};

type TestResult = Result<(), Box<dyn Error>>;

fn spec() -> TaskSpec {
    TaskSpec::query(database("db"), "select 1")
}

fn chain() -> Pipeline {
    Pipeline::new("chain")
        .task(TaskDef::new("a"), spec())
        .task(TaskDef::new("b").after("a"), spec())
        .task(TaskDef::new("c").after("b"), spec())
}

fn runner(stack: &MemoryStack, fake: &FakeExecutor) -> PipelineRunner {
    PipelineRunner::new(stack.registry(), fake.registry())
}

#[tokio::test]
async fn linear_pipeline_runs_in_dependency_order() -> TestResult {
    init_tracing();
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();

    let report = with_timeout(runner(&stack, &fake).run(&chain())).await?;

    assert!(report.is_success(), "report: {report:?}");
    assert_eq!(fake.opened(), vec!["a", "b", "c"]);
    assert!(report.error.is_empty());
    assert!(report.tasks.values().all(|t| t.status == TaskStatus::Finished));

    // root + one subtask per pipeline task
    let root = stack.states.get(report.root_oid).ok_or("root not persisted")?;
    assert_eq!(root.status, TaskStatus::Finished);
    assert_eq!(root.estimate_subtasks, Some(3));
    let mut children: Vec<String> = stack
        .states
        .children_of(report.root_oid)
        .into_iter()
        .map(|s| s.name)
        .collect();
    children.sort();
    assert_eq!(children, vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn failed_task_fails_its_dependents_without_running_them() -> TestResult {
    init_tracing();
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().failing("a");

    let report = with_timeout(runner(&stack, &fake).run(&chain())).await?;

    assert!(!report.is_success());
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.error, "3 of 3 tasks failed: a, b, c");
    assert_eq!(fake.opened(), vec!["a"]);

    let a = report.task("a").ok_or("missing a")?;
    assert_eq!(a.error, "fake failure in a");
    for name in ["b", "c"] {
        let task = report.task(name).ok_or("missing task")?;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, UPSTREAM_FAILED);
        let stored = stack.states.get(task.oid).ok_or("not persisted")?;
        assert_eq!(stored.status, TaskStatus::Failed);
    }
    assert_eq!(report.failed(), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn independent_branch_still_succeeds_when_another_fails() -> TestResult {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().failing("a");
    let pipeline = chain().task(TaskDef::new("solo"), spec());

    let report = with_timeout(runner(&stack, &fake).run(&pipeline)).await?;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.task("solo").map(|t| t.status), Some(TaskStatus::Finished));
    assert_eq!(report.error, "3 of 4 tasks failed: a, b, c");
    Ok(())
}

#[tokio::test]
async fn cyclic_pipeline_is_rejected_before_anything_runs() {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();
    let pipeline = Pipeline::new("loop")
        .task(TaskDef::new("a").after("c"), spec())
        .task(TaskDef::new("b").after("a"), spec())
        .task(TaskDef::new("c").after("b"), spec());

    let result = runner(&stack, &fake).run(&pipeline).await;

    assert!(matches!(result, Err(StreamdagError::CyclicDependency(_))));
    assert!(fake.opened().is_empty());
    assert!(stack.states.is_empty());
}

#[tokio::test]
async fn unknown_dependency_is_rejected() {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();
    let pipeline = Pipeline::new("p").task(TaskDef::new("a").after("ghost"), spec());

    let result = runner(&stack, &fake).run(&pipeline).await;
    assert!(matches!(result, Err(StreamdagError::TaskNotFound(_))));
}

#[tokio::test]
async fn duplicate_task_names_are_rejected() {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();
    let pipeline = Pipeline::new("p")
        .task(TaskDef::new("a"), spec())
        .task(TaskDef::new("a"), spec());

    let result = runner(&stack, &fake).run(&pipeline).await;
    assert!(matches!(result, Err(StreamdagError::ConfigError(_))));
}

#[tokio::test]
async fn unsupported_task_fails_fast() {
    let stack = MemoryStack::new();
    let runner = PipelineRunner::new(stack.registry(), ExecutorRegistry::new());

    let result = runner.run(&chain()).await;

    assert!(matches!(result, Err(StreamdagError::UnsupportedTask(_))));
    assert!(stack.states.is_empty());
}

#[tokio::test]
async fn stream_consumer_is_subscribed_before_producer_emits() -> TestResult {
    init_tracing();
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().emitting(
        "extract",
        vec![DataBlock::new(rows(2)), DataBlock::new(rows(1))],
    );
    let pipeline = Pipeline::new("etl")
        .task(TaskDef::new("extract"), spec())
        .task(TaskDef::new("load"), spec())
        .stream("extract", "load");

    let report = with_timeout(runner(&stack, &fake).run(&pipeline)).await?;

    assert!(report.is_success());
    assert_eq!(fake.received_sizes("load"), vec![2, 1]);
    assert_eq!(report.task("extract").map(|t| t.dropped_emissions), Some(0));
    Ok(())
}

#[tokio::test]
async fn stream_group_with_one_worker_does_not_deadlock() -> TestResult {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().emitting("extract", vec![DataBlock::new(rows(3))]);
    let pipeline = Pipeline::new("etl")
        .task(TaskDef::new("extract"), spec())
        .task(TaskDef::new("load"), spec())
        .task(TaskDef::new("audit"), spec())
        .stream("extract", "load")
        .stream("extract", "audit");

    let report = with_timeout(runner(&stack, &fake).with_max_workers(1).run(&pipeline)).await?;

    assert!(report.is_success());
    assert_eq!(fake.received_sizes("load"), vec![3]);
    assert_eq!(fake.received_sizes("audit"), vec![3]);
    Ok(())
}

#[tokio::test]
async fn stream_group_waits_for_dependencies_of_every_member() -> TestResult {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new()
        .slow("prepare", Duration::from_millis(20))
        .emitting("extract", vec![DataBlock::new(rows(1))]);
    let pipeline = Pipeline::new("etl")
        .task(TaskDef::new("prepare"), spec())
        .task(TaskDef::new("extract").after("prepare"), spec())
        .task(TaskDef::new("load"), spec())
        .stream("extract", "load");

    let report = with_timeout(runner(&stack, &fake).run(&pipeline)).await?;

    assert!(report.is_success());
    // load has no dependency of its own but starts with its producer.
    assert_eq!(fake.opened(), vec!["prepare", "extract", "load"]);
    assert_eq!(fake.received_sizes("load"), vec![1]);
    Ok(())
}

#[tokio::test]
async fn group_member_waiting_on_a_failed_dependency_is_failed() -> TestResult {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().failing("prepare");
    let pipeline = Pipeline::new("etl")
        .task(TaskDef::new("prepare"), spec())
        .task(TaskDef::new("extract").after("prepare"), spec())
        .task(TaskDef::new("load"), spec())
        .stream("extract", "load");

    let report = with_timeout(runner(&stack, &fake).run(&pipeline)).await?;

    assert_eq!(fake.opened(), vec!["prepare"]);
    assert_eq!(report.failed(), vec!["extract", "load", "prepare"]);
    assert_eq!(report.task("load").map(|t| t.error.as_str()), Some(UPSTREAM_FAILED));
    Ok(())
}

#[tokio::test]
async fn invalid_stream_edges_are_rejected() {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();
    let base = || {
        Pipeline::new("p")
            .task(TaskDef::new("a"), spec())
            .task(TaskDef::new("b"), spec())
    };

    let inside_group = Pipeline::new("p")
        .task(TaskDef::new("a"), spec())
        .task(TaskDef::new("b").after("a"), spec())
        .stream("a", "b");
    let looped = base().stream("a", "b").stream("b", "a");
    let to_self = base().stream("a", "a");
    let unknown = base().stream("a", "ghost");

    let r = runner(&stack, &fake);
    assert!(matches!(r.run(&inside_group).await, Err(StreamdagError::ConfigError(_))));
    assert!(matches!(r.run(&looped).await, Err(StreamdagError::ConfigError(_))));
    assert!(matches!(r.run(&to_self).await, Err(StreamdagError::ConfigError(_))));
    assert!(matches!(r.run(&unknown).await, Err(StreamdagError::TaskNotFound(_))));
    assert!(fake.opened().is_empty());
}

#[tokio::test]
async fn groups_that_depend_on_each_other_in_a_cycle_are_rejected() {
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new();
    // {a, b} and {c, d} are stream groups; b waits on c and d waits on a.
    let pipeline = Pipeline::new("p")
        .task(TaskDef::new("a"), spec())
        .task(TaskDef::new("b").after("c"), spec())
        .task(TaskDef::new("c"), spec())
        .task(TaskDef::new("d").after("a"), spec())
        .stream("a", "b")
        .stream("c", "d");

    let result = runner(&stack, &fake).run(&pipeline).await;
    assert!(matches!(result, Err(StreamdagError::CyclicDependency(_))));
}

#[tokio::test]
async fn cancellation_fails_running_and_pending_tasks() -> TestResult {
    init_tracing();
    let stack = MemoryStack::new();
    let fake = FakeExecutor::new().slow("a", Duration::from_secs(30));
    let pipeline = Pipeline::new("p")
        .task(TaskDef::new("a"), spec())
        .task(TaskDef::new("b").after("a"), spec());

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let report = with_timeout(runner(&stack, &fake).run_with_cancel(&pipeline, signal)).await?;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.task("a").map(|t| t.error.as_str()), Some("cancelled"));
    assert_eq!(report.task("b").map(|t| t.error.as_str()), Some(CANCELLED));
    assert!(!fake.was_opened("b"));
    Ok(())
}

fn two_slow_branches() -> (FakeExecutor, Pipeline) {
    let fake = FakeExecutor::new()
        .slow("left", Duration::from_millis(150))
        .slow("right", Duration::from_millis(150));
    let pipeline = Pipeline::new("branches")
        .task(TaskDef::new("left"), spec())
        .task(TaskDef::new("right"), spec())
        .task(TaskDef::new("join").after("left").after("right"), spec());
    (fake, pipeline)
}

#[tokio::test]
async fn independent_branches_overlap_under_the_default_limit() -> TestResult {
    let stack = MemoryStack::new();
    let (fake, pipeline) = two_slow_branches();

    let report = with_timeout(runner(&stack, &fake).run(&pipeline)).await?;

    assert!(report.is_success(), "report: {report:?}");
    assert_eq!(fake.peak_running(), 2);
    assert_eq!(fake.opened().last().map(String::as_str), Some("join"));
    Ok(())
}

#[tokio::test]
async fn one_worker_runs_independent_branches_one_at_a_time() -> TestResult {
    let stack = MemoryStack::new();
    let (fake, pipeline) = two_slow_branches();

    let started = tokio::time::Instant::now();
    let report = with_timeout(runner(&stack, &fake).with_max_workers(1).run(&pipeline)).await?;

    assert!(report.is_success(), "report: {report:?}");
    assert_eq!(fake.peak_running(), 1);
    assert!(started.elapsed() >= Duration::from_millis(300));
    Ok(())
}

#[test]
fn zero_workers_means_one() {
    let stack = MemoryStack::new();
    let runner = PipelineRunner::new(stack.registry(), ExecutorRegistry::new()).with_max_workers(0);
    assert_eq!(runner.max_workers(), 1);
}
