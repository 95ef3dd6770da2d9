//! Divide-and-conquer sessions driven end to end through the loop driver.
//!
//! Tree grown lazily by the scripted divider:
//! ```text
//! R
//! ├── A
//! ├── B
//! │   ├── B0
//! │   └── B1
//! └── C
//! ```

use arbor::core::snapshot::{Mode, RunParams, Snapshot, Structure};
use arbor::core::types::{Classification, RunOutcome, Status};
use arbor::io::session_store::FileSnapshotStore;
use arbor::looping::{DriveOptions, LoopStop, run_loop};
use arbor::session::{MemorySnapshotStore, SnapshotStore};
use arbor::start::{StartRequest, start_session};
use arbor::test_support::{ScriptedCollaborators, children, verdict};

fn start<S: SnapshotStore>(store: &S, params: RunParams) {
    start_session(
        store,
        &StartRequest {
            session_id: "dnc",
            root_task: "R",
            mode: Mode::Dnc,
            params,
        },
    )
    .expect("start");
}

fn preorder_collaborators() -> ScriptedCollaborators {
    ScriptedCollaborators::default()
        .with_verdicts([
            verdict(Classification::Complex), // R
            verdict(Classification::Simple),  // A
            verdict(Classification::Complex), // B
            verdict(Classification::Simple),  // B0
            verdict(Classification::Simple),  // B1
            verdict(Classification::Simple),  // C
        ])
        .with_divisions([children(&["A", "B", "C"]), children(&["B0", "B1"])])
}

/// Visits the whole tree in pre-order and derives parent success.
#[test]
fn lazy_tree_is_walked_in_preorder() {
    let store = MemorySnapshotStore::new();
    start(&store, RunParams::default());
    let collab = preorder_collaborators();

    let outcome = run_loop(&store, &collab, "dnc", None, DriveOptions::default(), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::Completed));
    assert_eq!(outcome.steps_executed, 6);
    assert_eq!(collab.conquered(), vec!["R", "A", "B", "B0", "B1", "C"]);

    let snapshot = store.get("dnc").expect("get").expect("stored");
    let Structure::Dnc { tree } = &snapshot.structure else {
        panic!("expected dnc structure");
    };
    assert_eq!(tree.len(), 6);
    assert!(tree.iter().all(|node| node.status == Status::Success));
    assert_eq!(tree.depth(4).expect("B0"), 3);
    assert!(snapshot.validate().is_empty());
}

/// An unrescued failure stops the walk on the failing node.
#[test]
fn failed_node_stops_the_walk() {
    let store = MemorySnapshotStore::new();
    start(&store, RunParams::default());
    let collab = ScriptedCollaborators::default()
        .with_verdicts([verdict(Classification::Complex), verdict(Classification::Failed)])
        .with_divisions([children(&["A", "B"])]);

    let outcome = run_loop(&store, &collab, "dnc", None, DriveOptions::default(), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::Failed { node_id: 1 }));
    assert_eq!(collab.conquered(), vec!["R", "A"]);
}

/// A rescued failure lets the walk continue to the next sibling.
#[test]
fn rescued_node_continues_the_walk() {
    let store = MemorySnapshotStore::new();
    start(&store, RunParams::default());
    let collab = ScriptedCollaborators::default()
        .with_verdicts([
            verdict(Classification::Complex),
            verdict(Classification::Failed),
            verdict(Classification::Simple),
        ])
        .with_divisions([children(&["A", "B"])])
        .with_rescues([Some(Status::Success)]);

    let outcome = run_loop(&store, &collab, "dnc", None, DriveOptions::default(), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::Completed));
    assert_eq!(collab.conquered(), vec!["R", "A", "B"]);
}

/// A node still complex at the depth limit fails instead of dividing.
#[test]
fn depth_limit_fails_complex_leaf() {
    let store = MemorySnapshotStore::new();
    start(
        &store,
        RunParams {
            max_depth: 2,
            ..RunParams::default()
        },
    );
    let collab = ScriptedCollaborators::default()
        .with_verdicts([verdict(Classification::Complex), verdict(Classification::Complex)])
        .with_divisions([children(&["A"])]);

    let outcome = run_loop(&store, &collab, "dnc", None, DriveOptions::default(), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::Failed { node_id: 1 }));
    assert_eq!(collab.divisions_requested(), 1);
}

/// `max_steps` ends the session with a budget outcome that later steps keep.
#[test]
fn step_budget_is_enforced() {
    let store = MemorySnapshotStore::new();
    start(
        &store,
        RunParams {
            max_steps: 2,
            ..RunParams::default()
        },
    );
    let collab = preorder_collaborators();

    let outcome = run_loop(&store, &collab, "dnc", None, DriveOptions::default(), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::BudgetExhausted));
    assert_eq!(outcome.steps_executed, 2);
    let stored = store.get("dnc").expect("get").expect("stored");
    assert_eq!(stored.steps_taken, 2);
    assert!(stored.is_finished());
}

/// File-backed sessions resume across store instances and keep an audit trail.
#[test]
fn file_sessions_resume_and_log_iterations() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    start(&FileSnapshotStore::new(root), RunParams::default());
    let collab = preorder_collaborators();
    let options = DriveOptions { log_root: Some(root) };

    let first = run_loop(&FileSnapshotStore::new(root), &collab, "dnc", Some(2), options, |_| {}).expect("first");
    assert_eq!(first.stop, LoopStop::MaxIterations { max_iterations: 2 });

    let second = run_loop(&FileSnapshotStore::new(root), &collab, "dnc", None, options, |_| {}).expect("second");
    assert_eq!(second.started_at_step, 2);
    assert_eq!(second.stop, LoopStop::Finished(RunOutcome::Completed));

    for iter in 1..=6 {
        let dir = root.join(format!(".arbor/iterations/dnc/{iter}"));
        assert!(dir.join("meta.json").is_file(), "missing meta for {iter}");
    }
    let before: Snapshot = serde_json::from_str(
        &std::fs::read_to_string(root.join(".arbor/iterations/dnc/3/before.json")).expect("read"),
    )
    .expect("parse");
    assert_eq!(before.steps_taken, 2);
}
