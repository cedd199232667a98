// tests/lifecycle.rs

use std::error::Error;

use streamdag::engine::TaskLifecycle;
use streamdag::errors::StreamdagError;
use streamdag::identity::Oid;
use streamdag::model::{TaskDef, TaskRef, TaskRuntimeState, TaskStatus};
use streamdag::storage::{MemoryStore, StorageRegistry};
use streamdag_test_utils::MemoryStack;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn requires_storage_for_tasks_and_runtimes() {
    assert!(matches!(
        TaskLifecycle::new(StorageRegistry::new()).err(),
        Some(StreamdagError::NoStorageRegistered(_))
    ));

    let mut only_states = StorageRegistry::new();
    MemoryStore::<TaskRuntimeState>::new().register_into(&mut only_states);
    assert!(matches!(
        TaskLifecycle::new(only_states).err(),
        Some(StreamdagError::NoStorageRegistered(_))
    ));
}

#[test]
fn create_persists_definition_and_pending_runtime() -> TestResult {
    let stack = MemoryStack::new();
    let mut lifecycle = TaskLifecycle::new(stack.registry())?;

    let mut extract = TaskDef::new("extract");
    let oid = lifecycle.create(&mut extract)?;

    assert_eq!(extract.oid, Some(oid));
    assert_eq!(stack.tasks.get(oid).map(|t| t.name), Some("extract".to_string()));
    assert_eq!(lifecycle.status(oid)?, TaskStatus::Pending);

    let runtime = lifecycle.runtime(oid)?;
    let stored = stack.states.get(runtime.oid()).ok_or("runtime not persisted")?;
    assert_eq!(stored.name, "extract");
    assert_eq!(stored.parent_oid, None);
    Ok(())
}

#[test]
fn dependencies_are_resolved_to_identities() -> TestResult {
    let stack = MemoryStack::new();
    let mut lifecycle = TaskLifecycle::new(stack.registry())?;

    let mut extract = TaskDef::new("extract");
    let extract_oid = lifecycle.create(&mut extract)?;

    let mut load = TaskDef::new("load").after("extract");
    let load_oid = lifecycle.create(&mut load)?;
    assert_eq!(load.dependencies, vec![TaskRef::Oid(extract_oid)]);

    let mut audit = TaskDef::new("audit").after(&load);
    lifecycle.create(&mut audit)?;
    assert_eq!(audit.dependencies, vec![TaskRef::Oid(load_oid)]);
    assert_eq!(lifecycle.task(load_oid)?.dependencies, vec![TaskRef::Oid(extract_oid)]);
    Ok(())
}

#[test]
fn unknown_dependency_is_rejected_and_nothing_is_saved() -> TestResult {
    let stack = MemoryStack::new();
    let mut lifecycle = TaskLifecycle::new(stack.registry())?;

    let mut orphan = TaskDef::new("orphan").after("missing");
    assert!(matches!(
        lifecycle.create(&mut orphan),
        Err(StreamdagError::TaskNotFound(_))
    ));
    let mut by_oid = TaskDef::new("orphan").after(Oid::new(999));
    assert!(lifecycle.create(&mut by_oid).is_err());

    assert!(stack.tasks.is_empty());
    assert!(stack.states.is_empty());
    assert_eq!(orphan.oid, None);
    Ok(())
}

#[test]
fn lifecycle_drives_the_state_machine() -> TestResult {
    let stack = MemoryStack::new();
    let mut lifecycle = TaskLifecycle::new(stack.registry())?;

    let mut ok = TaskDef::new("ok");
    let ok = lifecycle.create(&mut ok)?;
    lifecycle.start(ok)?;
    lifecycle.finish(ok)?;
    assert_eq!(lifecycle.status(ok)?, TaskStatus::Finished);
    assert!(lifecycle.fail(ok, "too late").is_err());

    let mut bad = TaskDef::new("bad");
    let bad = lifecycle.create(&mut bad)?;
    lifecycle.start(bad)?;
    lifecycle.fail(bad, "timeout")?;
    let state = lifecycle.state(bad)?;
    assert_eq!(state.status, TaskStatus::Failed);
    assert_eq!(state.error, "timeout");
    Ok(())
}

#[test]
fn unknown_identity_is_not_found() -> TestResult {
    let stack = MemoryStack::new();
    let lifecycle = TaskLifecycle::new(stack.registry())?;
    let ghost = Oid::new(42);

    assert!(matches!(lifecycle.start(ghost), Err(StreamdagError::TaskNotFound(_))));
    assert!(matches!(lifecycle.status(ghost), Err(StreamdagError::TaskNotFound(_))));
    assert!(lifecycle.task(ghost).is_err());
    Ok(())
}

#[test]
fn duplicate_names_are_rejected_before_saving() -> TestResult {
    let stack = MemoryStack::new();
    let mut lifecycle = TaskLifecycle::new(stack.registry())?;

    let mut first = TaskDef::new("extract");
    let first_oid = lifecycle.create(&mut first)?;

    let mut second = TaskDef::new("extract");
    assert!(matches!(
        lifecycle.create(&mut second),
        Err(StreamdagError::ConfigError(_))
    ));
    assert_eq!(stack.tasks.len(), 1);
    assert_eq!(stack.states.len(), 1);

    // Name references keep resolving to the first task.
    let mut load = TaskDef::new("load").after("extract");
    lifecycle.create(&mut load)?;
    assert_eq!(load.dependencies, vec![TaskRef::Oid(first_oid)]);
    Ok(())
}

#[test]
fn rejected_runtime_state_leaves_no_definition_behind() -> TestResult {
    let tasks = MemoryStore::<TaskDef>::new();
    let mut registry = StorageRegistry::new();
    tasks.register_into(&mut registry);
    registry.register_fn::<TaskRuntimeState, _>(|_| {
        Err(StreamdagError::ExecutionError("state store offline".to_string()))
    });
    let mut lifecycle = TaskLifecycle::new(registry)?;

    let mut extract = TaskDef::new("extract");
    assert!(lifecycle.create(&mut extract).is_err());
    assert!(tasks.is_empty());
    assert_eq!(extract.oid, None);
    Ok(())
}

#[test]
fn rejected_definition_fails_its_runtime() -> TestResult {
    let states = MemoryStore::<TaskRuntimeState>::new();
    let mut registry = StorageRegistry::new();
    states.register_into(&mut registry);
    registry.register_fn::<TaskDef, _>(|_| {
        Err(StreamdagError::ExecutionError("task store offline".to_string()))
    });
    let mut lifecycle = TaskLifecycle::new(registry)?;

    let mut extract = TaskDef::new("extract");
    assert!(lifecycle.create(&mut extract).is_err());

    let persisted = states.all();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, TaskStatus::Failed);
    assert!(persisted[0].error.contains("task store offline"));

    // The name stays free: a retry fails on the store, not as a duplicate.
    assert!(matches!(
        lifecycle.create(&mut TaskDef::new("extract")),
        Err(StreamdagError::ExecutionError(_))
    ));
    Ok(())
}
