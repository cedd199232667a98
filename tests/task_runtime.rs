// tests/task_runtime.rs

use std::error::Error;

use streamdag::errors::StreamdagError;
use streamdag::model::{TaskRuntimeState, TaskStatus};
use streamdag::runtime::TaskRuntime;
use streamdag::storage::StorageRegistry;
use streamdag_test_utils::MemoryStack;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn root_is_running_and_persisted_without_parent() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "nightly")?;

    assert_eq!(root.status(), TaskStatus::Running);
    assert_eq!(root.parent_oid(), None);

    let stored = stack.states.get(root.oid()).ok_or("root not persisted")?;
    assert_eq!(stored.name, "nightly");
    assert_eq!(stored.status, TaskStatus::Running);
    assert!(stored.is_root());
    Ok(())
}

#[test]
fn root_creation_requires_runtime_storage() {
    let registry = StorageRegistry::new();
    let err = TaskRuntime::create_root(&registry, "nightly").unwrap_err();
    assert!(matches!(err, StreamdagError::NoStorageRegistered(_)));
}

#[test]
fn subtasks_are_pending_children_with_increasing_identities() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    let a = root.create_subtask("a")?;
    let b = root.create_subtask("b")?;

    assert_eq!(a.status(), TaskStatus::Pending);
    assert_eq!(a.parent_oid(), Some(root.oid()));
    assert!(root.oid() < a.oid() && a.oid() < b.oid());

    let grandchild = a.create_subtask("a/batch-1")?;
    assert_eq!(grandchild.parent_oid(), Some(a.oid()));

    assert_eq!(stack.states.children_of(root.oid()).len(), 2);
    assert_eq!(stack.states.children_of(a.oid()).len(), 1);
    Ok(())
}

#[test]
fn lifecycle_transitions_are_persisted() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    let task = root.create_subtask("load")?;
    let submitted = task.snapshot().submit_time;

    task.start()?;
    assert_eq!(stack.states.get(task.oid()).map(|s| s.status), Some(TaskStatus::Running));

    task.finish()?;
    let stored = stack.states.get(task.oid()).ok_or("missing")?;
    assert_eq!(stored.status, TaskStatus::Finished);
    assert!(stored.error.is_empty());
    assert_eq!(stored.submit_time, submitted);
    assert!(stored.update_time >= submitted);
    Ok(())
}

#[test]
fn failure_records_the_error() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    let task = root.create_subtask("extract")?;

    task.start()?;
    task.fail("connection refused")?;

    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.error(), "connection refused");
    let stored = stack.states.get(task.oid()).ok_or("missing")?;
    assert_eq!(stored.error, "connection refused");
    Ok(())
}

#[test]
fn pending_task_can_fail_without_running() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    let task = root.create_subtask("downstream")?;

    task.fail("upstream dependency failed")?;
    assert_eq!(task.status(), TaskStatus::Failed);
    Ok(())
}

#[test]
fn invalid_transitions_are_rejected() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    let task = root.create_subtask("t")?;

    // Pending -> Finished skips Running.
    assert!(matches!(task.finish(), Err(StreamdagError::InvalidTransition(_))));
    assert_eq!(task.status(), TaskStatus::Pending);

    task.start()?;
    assert!(matches!(task.start(), Err(StreamdagError::InvalidTransition(_))));
    Ok(())
}

#[test]
fn terminal_states_are_frozen() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;

    let done = root.create_subtask("done")?;
    done.start()?;
    done.finish()?;
    assert!(done.fail("late").is_err());
    assert!(done.start().is_err());
    assert_eq!(done.status(), TaskStatus::Finished);
    assert!(done.error().is_empty());

    let failed = root.create_subtask("failed")?;
    failed.fail("boom")?;
    assert!(failed.fail("again").is_err());
    assert!(failed.start().is_err());
    assert_eq!(failed.error(), "boom");
    Ok(())
}

#[test]
fn subtask_estimate_is_persisted() -> TestResult {
    let stack = MemoryStack::new();
    let root = TaskRuntime::create_root(&stack.registry(), "root")?;
    root.set_estimate_subtasks(3)?;

    let stored = stack.states.get(root.oid()).ok_or("missing")?;
    assert_eq!(stored.estimate_subtasks, Some(3));
    Ok(())
}

#[test]
fn failing_save_leaves_state_unchanged() -> TestResult {
    let stack = MemoryStack::new();
    let states = stack.states.clone();

    // Reject any write that would move a child runtime to Running.
    let mut registry = StorageRegistry::new();
    registry.register_fn(move |state: TaskRuntimeState| {
        if state.status == TaskStatus::Running && state.parent_oid.is_some() {
            return Err(StreamdagError::ExecutionError("disk full".into()));
        }
        states.save(state)
    });

    let root = TaskRuntime::create_root(&registry, "root")?;
    let child = root.create_subtask("child")?;

    assert!(child.start().is_err());
    assert_eq!(child.status(), TaskStatus::Pending);
    let stored = stack.states.get(child.oid()).ok_or("missing")?;
    assert_eq!(stored.status, TaskStatus::Pending);
    Ok(())
}

#[test]
fn detached_runtime_is_pending_without_parent() -> TestResult {
    let stack = MemoryStack::new();
    let solo = TaskRuntime::create_detached(&stack.registry(), "solo")?;

    assert_eq!(solo.status(), TaskStatus::Pending);
    assert_eq!(solo.parent_oid(), None);
    solo.start()?;
    solo.finish()?;
    assert_eq!(stack.states.with_status(TaskStatus::Finished).len(), 1);
    Ok(())
}
