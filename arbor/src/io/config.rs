//! Project configuration stored in `arbor.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::snapshot::{Mode, RunParams};

pub const CONFIG_FILE: &str = "arbor.toml";

/// `arbor.toml`. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ArborConfig {
    pub run: RunConfig,
    pub collaborator: CollaboratorConfig,
}

/// `[run]`: structure to build and the parameters fixed at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RunConfig {
    pub mode: Mode,
    #[serde(flatten)]
    pub params: RunParams,
}

/// `[collaborator]`: external command answering every collaborator role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Program and arguments, e.g. `["python3", "agent.py"]`.
    pub command: Vec<String>,

    /// Wall-clock budget per call, in seconds.
    pub timeout_secs: u64,

    /// Per-stream cap on captured stdout/stderr.
    pub output_limit_bytes: usize,

    /// Directory of `<role>.md` templates overriding the built-in prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["arbor-collaborator".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            templates_dir: None,
        }
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ArborConfig {
    pub fn validate(&self) -> Result<()> {
        let problems = self.run.params.problems();
        if !problems.is_empty() {
            return Err(anyhow!("invalid [run] parameters: {}", problems.join("; ")));
        }
        if self.collaborator.command.is_empty() || self.collaborator.command[0].trim().is_empty() {
            return Err(anyhow!("collaborator.command must be a non-empty array"));
        }
        if self.collaborator.timeout_secs == 0 {
            return Err(anyhow!("collaborator.timeout_secs must be > 0"));
        }
        if self.collaborator.output_limit_bytes == 0 {
            return Err(anyhow!("collaborator.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ArborConfig::default()`.
pub fn load_config(path: &Path) -> Result<ArborConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing; using defaults");
        let cfg = ArborConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ArborConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ArborConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ScoringMode, SearchType};

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ArborConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let mut cfg = ArborConfig::default();
        cfg.run.mode = Mode::Search;
        cfg.run.params.search_type = SearchType::Dfs;
        cfg.collaborator.templates_dir = Some(PathBuf::from("prompts"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        fs::write(
            &path,
            "[run]\nmode = \"search\"\nscoring = \"vote\"\nbeam_width = 4\n\n[collaborator]\ncommand = [\"python3\", \"agent.py\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run.mode, Mode::Search);
        assert_eq!(cfg.run.params.scoring, ScoringMode::Vote);
        assert_eq!(cfg.run.params.beam_width, 4);
        assert_eq!(cfg.run.params.max_depth, RunParams::default().max_depth);
        assert_eq!(cfg.collaborator.timeout_secs, 300);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        fs::write(&path, "[run]\nbeam_width = 0\n").expect("write");

        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("beam_width must be > 0"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let cfg = ArborConfig {
            collaborator: CollaboratorConfig {
                command: Vec::new(),
                ..CollaboratorConfig::default()
            },
            ..ArborConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
