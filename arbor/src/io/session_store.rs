//! Snapshot files under `.arbor/sessions/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::snapshot::Snapshot;
use crate::session::SnapshotStore;

/// One pretty-printed JSON file per session: `<root>/.arbor/sessions/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(".arbor").join("sessions"),
        }
    }

    pub fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Ids of every stored session, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read sessions dir {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, session_id: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "loading snapshot");
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read snapshot {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parse snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn put(&self, session_id: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(session_id)?;
        debug!(path = %path.display(), steps = snapshot.steps_taken, "writing snapshot");
        let mut buf = serde_json::to_string_pretty(snapshot)?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }
}

/// Session ids become file names, so keep them to a safe alphabet.
fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(anyhow!("session id must not be empty"));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "session id '{}' may only contain ASCII letters, digits, '-' and '_'",
            session_id
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{Mode, RunParams};
    use crate::session::get_or_seed;

    #[test]
    fn put_then_get_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path());
        let snapshot = Snapshot::seed("s-1", Mode::Search, "question", RunParams::default());

        store.put("s-1", &snapshot).expect("put");
        let loaded = store.get("s-1").expect("get").expect("exists");
        assert_eq!(loaded, snapshot);
        assert!(
            temp.path()
                .join(".arbor/sessions/s-1.json")
                .is_file()
        );
        assert!(!temp.path().join(".arbor/sessions/s-1.json.tmp").exists());
    }

    #[test]
    fn missing_session_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path());
        assert!(store.get("nope").expect("get").is_none());
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn rejects_path_like_session_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path());
        let err = store.get("../escape").expect_err("invalid id");
        assert!(err.to_string().contains("may only contain"));
    }

    #[test]
    fn get_or_seed_persists_across_store_instances() {
        let temp = tempfile::tempdir().expect("tempdir");
        let seed = Snapshot::seed("a", Mode::Graph, "root", RunParams::default());
        get_or_seed(&FileSnapshotStore::new(temp.path()), "a", Some(seed.clone())).expect("seed");

        let reopened = FileSnapshotStore::new(temp.path());
        assert_eq!(get_or_seed(&reopened, "a", None).expect("existing"), seed);
        assert_eq!(reopened.list().expect("list"), vec!["a".to_string()]);
    }

    #[test]
    fn corrupt_snapshot_is_rejected_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path());
        let path = store.path_for("bad").expect("path");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(
            &path,
            r#"{"session_id":"bad","params":{},"steps_taken":0,
               "structure":{"dnc":{"tree":{"nodes":{"0":{"id":0,"parent_id":null,"task":"r","status":"waiting"},
               "1":{"id":1,"parent_id":7,"task":"x","status":"waiting"}},"cursor":0}}}}"#,
        )
        .expect("write");
        let err = store.get("bad").expect_err("dangling parent");
        assert!(format!("{err:#}").contains("parent 7"));
    }
}
