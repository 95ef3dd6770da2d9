//! Drivers for `arbor step` and `arbor loop`.
//!
//! A driven step loads the session snapshot, runs [`step`] on it and, only if
//! the iteration succeeded, writes the new snapshot back together with an
//! audit entry. A failed iteration leaves the stored snapshot untouched.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::collaborators::Collaborators;
use crate::core::error::EngineError;
use crate::core::types::RunOutcome;
use crate::io::iteration_log::{IterationMeta, IterationWriteRequest, write_iteration};
use crate::session::{SnapshotStore, get_or_seed};
use crate::step::{StepOutcome, step};

/// Where (if anywhere) driven steps leave audit files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveOptions<'a> {
    /// Project root for `.arbor/iterations/`; `None` disables the audit log.
    pub log_root: Option<&'a Path>,
}

/// Run one iteration of `session_id` and persist the result.
#[instrument(skip_all, fields(session = session_id))]
pub fn step_session<S, C>(store: &S, collab: &C, session_id: &str, options: DriveOptions<'_>) -> Result<StepOutcome>
where
    S: SnapshotStore + ?Sized,
    C: Collaborators,
{
    let before = get_or_seed(store, session_id, None)?;
    if before.is_finished() {
        return step(before, collab);
    }

    let started = Instant::now();
    let outcome = step(before.clone(), collab)?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    store
        .put(session_id, &outcome.snapshot)
        .with_context(|| format!("store snapshot for session {session_id}"))?;

    // Budget exhaustion finishes the session without running an iteration.
    let iterated = outcome.snapshot.steps_taken > before.steps_taken;
    if let Some(root) = options.log_root
        && iterated
    {
        let meta = IterationMeta {
            session_id,
            report: &outcome.report,
            duration_ms,
        };
        write_iteration(&IterationWriteRequest {
            root,
            meta: &meta,
            before: &before,
            after: &outcome.snapshot,
        })
        .context("write iteration log")?;
    }
    Ok(outcome)
}

/// Reason why [`run_loop`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The session reached a terminal outcome.
    Finished(RunOutcome),
    /// `max_iterations` steps ran in this invocation without finishing.
    MaxIterations { max_iterations: u32 },
    /// A collaborator reply was rejected; the snapshot was not advanced.
    InvalidGeneration { message: String },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub session_id: String,
    pub started_at_step: u32,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Step `session_id` until it finishes, `max_iterations` steps ran, or a
/// collaborator reply is rejected.
///
/// Any other error stops the loop and is returned as is.
pub fn run_loop<S, C, F>(
    store: &S,
    collab: &C,
    session_id: &str,
    max_iterations: Option<u32>,
    options: DriveOptions<'_>,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    S: SnapshotStore + ?Sized,
    C: Collaborators,
    F: FnMut(&StepOutcome),
{
    let started_at_step = get_or_seed(store, session_id, None)?.steps_taken;
    let mut steps_executed = 0u32;
    let finish = |steps_executed, stop| LoopOutcome {
        session_id: session_id.to_string(),
        started_at_step,
        steps_executed,
        stop,
    };

    loop {
        if let Some(limit) = max_iterations
            && steps_executed >= limit
        {
            info!(max_iterations = limit, "iteration limit reached");
            return Ok(finish(steps_executed, LoopStop::MaxIterations { max_iterations: limit }));
        }

        match step_session(store, collab, session_id, options) {
            Ok(outcome) => {
                if outcome.snapshot.steps_taken > started_at_step + steps_executed {
                    steps_executed += 1;
                }
                on_step(&outcome);
                if outcome.exit {
                    let stop = match outcome.snapshot.outcome {
                        Some(result) => LoopStop::Finished(result),
                        None => LoopStop::Finished(RunOutcome::BudgetExhausted),
                    };
                    return Ok(finish(steps_executed, stop));
                }
            }
            Err(err) => {
                if let Some(EngineError::InvalidGeneration(message)) = err.downcast_ref::<EngineError>() {
                    warn!(error = %message, "collaborator reply rejected; stopping loop");
                    return Ok(finish(
                        steps_executed,
                        LoopStop::InvalidGeneration {
                            message: format!("{err:#}"),
                        },
                    ));
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{Mode, RunParams, Snapshot};
    use crate::core::types::Classification;
    use crate::session::MemorySnapshotStore;
    use crate::test_support::{ScriptedCollaborators, children, verdict};

    fn seeded(mode: Mode, params: RunParams) -> MemorySnapshotStore {
        let store = MemorySnapshotStore::new();
        store
            .put("s", &Snapshot::seed("s", mode, "root", params))
            .expect("seed");
        store
    }

    #[test]
    fn loop_runs_dnc_walk_to_completion() {
        let store = seeded(Mode::Dnc, RunParams::default());
        let collab = ScriptedCollaborators::default()
            .with_verdicts([
                verdict(Classification::Complex),
                verdict(Classification::Simple),
                verdict(Classification::Simple),
            ])
            .with_divisions([children(&["a", "b"])]);

        let mut seen = Vec::new();
        let outcome = run_loop(&store, &collab, "s", None, DriveOptions::default(), |step| {
            seen.push(step.report.iteration);
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Finished(RunOutcome::Completed));
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(collab.conquered(), vec!["root", "a", "b"]);
        let stored = store.get("s").expect("get").expect("stored");
        assert_eq!(stored.steps_taken, 3);
    }

    #[test]
    fn loop_honors_max_iterations_and_resumes() {
        let store = seeded(Mode::Dnc, RunParams::default());
        let collab = ScriptedCollaborators::default()
            .with_verdicts([
                verdict(Classification::Complex),
                verdict(Classification::Simple),
                verdict(Classification::Simple),
            ])
            .with_divisions([children(&["a", "b"])]);

        let first = run_loop(&store, &collab, "s", Some(1), DriveOptions::default(), |_| {}).expect("loop");
        assert_eq!(first.stop, LoopStop::MaxIterations { max_iterations: 1 });
        assert_eq!(first.steps_executed, 1);

        let second = run_loop(&store, &collab, "s", None, DriveOptions::default(), |_| {}).expect("loop");
        assert_eq!(second.started_at_step, 1);
        assert_eq!(second.steps_executed, 2);
        assert_eq!(second.stop, LoopStop::Finished(RunOutcome::Completed));
    }

    #[test]
    fn invalid_generation_stops_without_advancing_snapshot() {
        let store = seeded(Mode::Dnc, RunParams::default());
        let collab = ScriptedCollaborators::default()
            .with_verdicts([verdict(Classification::Complex)])
            .with_divisions([children(&[" "])]);

        let outcome = run_loop(&store, &collab, "s", None, DriveOptions::default(), |_| {}).expect("loop");
        assert!(matches!(outcome.stop, LoopStop::InvalidGeneration { .. }));
        assert_eq!(outcome.steps_executed, 0);
        let stored = store.get("s").expect("get").expect("stored");
        assert_eq!(stored.steps_taken, 0);
    }

    #[test]
    fn other_errors_propagate() {
        let store = seeded(Mode::Dnc, RunParams::default());
        let collab = ScriptedCollaborators::default();
        let err = run_loop(&store, &collab, "s", None, DriveOptions::default(), |_| {}).expect_err("no verdict");
        assert!(format!("{err:#}").contains("no scripted verdict"));
    }

    #[test]
    fn unknown_session_is_not_seeded() {
        let store = MemorySnapshotStore::new();
        let err = step_session(&store, &ScriptedCollaborators::default(), "ghost", DriveOptions::default())
            .expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::SessionNotSeeded(_))
        ));
    }

    #[test]
    fn driven_steps_write_audit_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = seeded(Mode::Dnc, RunParams::default());
        let collab = ScriptedCollaborators::default().with_verdicts([verdict(Classification::Simple)]);
        let options = DriveOptions {
            log_root: Some(temp.path()),
        };

        let outcome = step_session(&store, &collab, "s", options).expect("step");
        assert!(outcome.exit);
        let dir = temp.path().join(".arbor/iterations/s/1");
        assert!(dir.join("meta.json").is_file());
        assert!(dir.join("before.json").is_file());
        assert!(dir.join("after.json").is_file());

        // A finished session is reported again but not re-logged.
        let again = step_session(&store, &collab, "s", options).expect("finished");
        assert!(again.exit);
        assert!(!temp.path().join(".arbor/iterations/s/2").exists());
    }
}
