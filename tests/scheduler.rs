// tests/scheduler.rs

use streamdag::dag::{DagGraph, Scheduler, TaskRunState, UPSTREAM_FAILED};
use streamdag::errors::StreamdagError;
use streamdag::types::TaskOutcome;

fn graph(tasks: &[(&str, &[&str])]) -> DagGraph {
    DagGraph::new(tasks.iter().map(|(name, deps)| {
        (
            name.to_string(),
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        )
    }))
}

fn scheduler(tasks: &[(&str, &[&str])]) -> Scheduler {
    Scheduler::new(graph(tasks)).expect("valid DAG")
}

fn names(step: &streamdag::dag::SchedulerStep) -> Vec<String> {
    step.newly_scheduled.iter().map(|t| t.name.clone()).collect()
}

#[test]
fn start_schedules_roots_only() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
    assert_eq!(s.run_state_of("a"), Some(TaskRunState::NotInRun));

    let step = s.start();
    assert_eq!(names(&step), vec!["a", "c"]);
    assert_eq!(s.run_state_of("a"), Some(TaskRunState::Running));
    assert_eq!(s.run_state_of("b"), Some(TaskRunState::Pending));
    assert!(!step.run_just_finished);
}

#[test]
fn second_start_is_a_no_op() {
    let mut s = scheduler(&[("a", &[])]);
    s.start();
    let again = s.start();
    assert!(again.newly_scheduled.is_empty());
    assert_eq!(s.run_state_of("a"), Some(TaskRunState::Running));
}

#[test]
fn dependents_wait_for_every_dependency() {
    let mut s = scheduler(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
    s.start();

    let step = s.handle_completion("a", TaskOutcome::Success);
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(s.deps_satisfied("c"), Some(false));

    let step = s.handle_completion("b", TaskOutcome::Success);
    assert_eq!(names(&step), vec!["c"]);

    let step = s.handle_completion("c", TaskOutcome::Success);
    assert!(step.run_just_finished);
    assert!(s.is_finished());
    assert!(s.failed_tasks().is_empty());
}

#[test]
fn failure_propagates_through_the_chain() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
    s.start();

    let step = s.handle_completion("a", TaskOutcome::Failed("boom".into()));
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(step.newly_failed, vec!["a", "b", "c"]);
    assert!(step.run_just_finished);

    assert_eq!(s.error_of("a"), Some("boom"));
    assert_eq!(s.error_of("b"), Some(UPSTREAM_FAILED));
    assert_eq!(s.error_of("c"), Some(UPSTREAM_FAILED));
    assert_eq!(s.failed_tasks(), vec!["a", "b", "c"]);
}

#[test]
fn failure_leaves_independent_branches_running() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"]), ("x", &[]), ("y", &["x"])]);
    s.start();

    let step = s.handle_completion("a", TaskOutcome::Failed("boom".into()));
    assert_eq!(step.newly_failed, vec!["a", "b"]);
    assert!(!step.run_just_finished);

    let step = s.handle_completion("x", TaskOutcome::Success);
    assert_eq!(names(&step), vec!["y"]);
    s.handle_completion("y", TaskOutcome::Success);

    assert!(s.is_finished());
    assert_eq!(s.run_state_of("y"), Some(TaskRunState::DoneSuccess));
    assert_eq!(s.failed_tasks(), vec!["a", "b"]);
}

#[test]
fn diamond_with_one_failed_side_never_runs_the_join() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
    s.start();
    s.handle_completion("a", TaskOutcome::Success);

    let step = s.handle_completion("b", TaskOutcome::Failed("bad".into()));
    assert_eq!(step.newly_failed, vec!["b", "d"]);

    let step = s.handle_completion("c", TaskOutcome::Success);
    assert!(step.newly_scheduled.is_empty());
    assert!(s.is_finished());
}

#[test]
fn completions_for_unknown_or_idle_tasks_are_ignored() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"])]);
    s.start();

    let step = s.handle_completion("nope", TaskOutcome::Success);
    assert!(step.newly_scheduled.is_empty() && step.newly_failed.is_empty());

    // b is still pending.
    let step = s.handle_completion("b", TaskOutcome::Success);
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(s.run_state_of("b"), Some(TaskRunState::Pending));

    s.handle_completion("a", TaskOutcome::Success);
    // A duplicate completion changes nothing.
    let step = s.handle_completion("a", TaskOutcome::Failed("late".into()));
    assert!(step.newly_failed.is_empty());
    assert_eq!(s.run_state_of("a"), Some(TaskRunState::DoneSuccess));
}

#[test]
fn cancel_pending_fails_only_unscheduled_tasks() {
    let mut s = scheduler(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
    s.start();

    let step = s.cancel_pending("pipeline cancelled");
    assert_eq!(step.newly_failed, vec!["b", "c"]);
    assert!(!step.run_just_finished);
    assert_eq!(s.error_of("c"), Some("pipeline cancelled"));

    let step = s.handle_completion("a", TaskOutcome::Success);
    assert!(step.newly_scheduled.is_empty());
    assert!(step.run_just_finished);
}

#[test]
fn cycles_and_bad_references_are_rejected() {
    let cyclic = Scheduler::new(graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]));
    assert!(matches!(cyclic, Err(StreamdagError::CyclicDependency(_))));

    let self_loop = Scheduler::new(graph(&[("a", &["a"])]));
    assert!(matches!(self_loop, Err(StreamdagError::CyclicDependency(_))));

    let unknown = Scheduler::new(graph(&[("a", &["ghost"])]));
    assert!(matches!(unknown, Err(StreamdagError::TaskNotFound(_))));
}

#[test]
fn graph_queries() {
    let g = graph(&[("a", &[]), ("b", &["a", "a"]), ("c", &["b"])]);
    assert_eq!(g.len(), 3);
    assert_eq!(g.dependencies_of("b"), ["a".to_string()]);
    assert_eq!(g.dependents_of("a"), ["b".to_string()]);
    assert!(g.depends_on("c", "a"));
    assert!(!g.depends_on("a", "c"));
    assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn empty_graph_finishes_immediately() {
    let mut s = scheduler(&[]);
    let step = s.start();
    assert!(step.run_just_finished);
    assert!(s.is_finished());
}
