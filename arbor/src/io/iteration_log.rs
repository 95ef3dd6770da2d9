//! Per-iteration audit files under `.arbor/iterations/`.
//!
//! Every driven step leaves `meta.json` plus the snapshot before and after the
//! step, so a run can be replayed or inspected without the live session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::snapshot::Snapshot;
use crate::step::StepReport;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta<'a> {
    pub session_id: &'a str,
    #[serde(flatten)]
    pub report: &'a StepReport,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub before_path: PathBuf,
    pub after_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, session_id: &str, iter: u32) -> Self {
        let dir = root
            .join(".arbor")
            .join("iterations")
            .join(session_id)
            .join(iter.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            before_path: dir.join("before.json"),
            after_path: dir.join("after.json"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub root: &'a Path,
    pub meta: &'a IterationMeta<'a>,
    pub before: &'a Snapshot,
    pub after: &'a Snapshot,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(
        request.root,
        request.meta.session_id,
        request.meta.report.iteration,
    );
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_json(&paths.before_path, request.before)?;
    write_json(&paths.after_path, request.after)?;

    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{Mode, RunParams};
    use crate::core::types::RunOutcome;
    use serde_json::Value;

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(temp.path(), "s-1", 3);

        assert!(paths.dir.ends_with(Path::new(".arbor/iterations/s-1/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.before_path.ends_with("before.json"));
        assert!(paths.after_path.ends_with("after.json"));
    }

    #[test]
    fn writes_meta_and_both_snapshots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let before = Snapshot::seed("s-2", Mode::Dnc, "root", RunParams::default());
        let mut after = before.clone();
        after.steps_taken = 1;
        after.outcome = Some(RunOutcome::Completed);
        let report = StepReport {
            iteration: 1,
            structure: "dnc",
            focus: Some(0),
            created: Vec::new(),
            exit: true,
            outcome: after.outcome.clone(),
        };
        let meta = IterationMeta {
            session_id: "s-2",
            report: &report,
            duration_ms: 5,
        };

        let paths = write_iteration(&IterationWriteRequest {
            root: temp.path(),
            meta: &meta,
            before: &before,
            after: &after,
        })
        .expect("write logs");

        let meta_json: Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read")).expect("json");
        assert_eq!(meta_json["session_id"], "s-2");
        assert_eq!(meta_json["iteration"], 1);
        assert_eq!(meta_json["outcome"]["kind"], "completed");

        let logged_after: Snapshot =
            serde_json::from_str(&fs::read_to_string(&paths.after_path).expect("read")).expect("json");
        assert_eq!(logged_after, after);
        assert!(paths.before_path.is_file());
    }
}
