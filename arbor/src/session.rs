//! Session-keyed snapshot storage.
//!
//! The engine itself never holds state between calls. Drivers read a snapshot
//! from a [`SnapshotStore`], pass it to [`crate::step::step`] and write the
//! result back. [`crate::io::session_store::FileSnapshotStore`] persists to
//! disk; [`MemorySnapshotStore`] is for embedding and tests.

use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::core::error::EngineError;
use crate::core::snapshot::Snapshot;

/// Read/write access to one snapshot per session id.
pub trait SnapshotStore {
    fn get(&self, session_id: &str) -> Result<Option<Snapshot>>;

    fn put(&self, session_id: &str, snapshot: &Snapshot) -> Result<()>;
}

/// Process-local store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RefCell<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.borrow().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, session_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.borrow().get(session_id).cloned())
    }

    fn put(&self, session_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .borrow_mut()
            .insert(session_id.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Stored snapshot for `session_id`, seeding it with `initial` on first use.
///
/// Once a session exists, `initial` is ignored. A missing session with no
/// `initial` fails with [`EngineError::SessionNotSeeded`].
pub fn get_or_seed<S: SnapshotStore + ?Sized>(
    store: &S,
    session_id: &str,
    initial: Option<Snapshot>,
) -> Result<Snapshot> {
    if let Some(existing) = store.get(session_id)? {
        debug!(session = session_id, steps = existing.steps_taken, "session found");
        return Ok(existing);
    }
    let Some(seed) = initial else {
        return Err(EngineError::SessionNotSeeded(session_id.to_string()).into());
    };
    debug!(session = session_id, structure = seed.structure.name(), "seeding session");
    store.put(session_id, &seed)?;
    Ok(seed)
}
