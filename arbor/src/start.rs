//! Orchestration for starting (or resuming) a session.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::error::EngineError;
use crate::core::snapshot::{Mode, RunParams, Snapshot};
use crate::session::{SnapshotStore, get_or_seed};

/// Input for [`start_session`].
#[derive(Debug, Clone)]
pub struct StartRequest<'a> {
    pub session_id: &'a str,
    pub root_task: &'a str,
    pub mode: Mode,
    pub params: RunParams,
}

/// Outcome of `arbor start`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub session_id: String,
    pub structure: &'static str,
    /// `true` when the session already existed and was left untouched.
    pub resumed: bool,
    pub steps_taken: u32,
}

fn structure_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Dnc => "dnc",
        Mode::Search => "search",
        Mode::Graph => "graph",
    }
}

/// Seed a new session, or confirm an existing one runs the requested mode.
///
/// Parameters are fixed at seed time; starting an existing session again
/// does not change them.
pub fn start_session<S: SnapshotStore + ?Sized>(store: &S, request: &StartRequest<'_>) -> Result<StartOutcome> {
    let problems = request.params.problems();
    if !problems.is_empty() {
        return Err(EngineError::InvalidStructure(problems.join("; ")).into());
    }
    if request.root_task.trim().is_empty() {
        return Err(EngineError::InvalidStructure("root task must not be empty".to_string()).into());
    }

    let existed = store.get(request.session_id)?.is_some();
    let seed = Snapshot::seed(
        request.session_id,
        request.mode,
        request.root_task,
        request.params.clone(),
    );
    let snapshot = get_or_seed(store, request.session_id, Some(seed))?;

    let expected = structure_name(request.mode);
    let found = snapshot.structure.name();
    if found != expected {
        return Err(EngineError::StructureMismatch { expected, found }.into());
    }

    if existed {
        debug!(session = request.session_id, steps = snapshot.steps_taken, "session resumed");
    } else {
        info!(session = request.session_id, structure = found, "session started");
    }
    Ok(StartOutcome {
        session_id: snapshot.session_id.clone(),
        structure: found,
        resumed: existed,
        steps_taken: snapshot.steps_taken,
    })
}
