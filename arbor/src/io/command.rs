//! Collaborator backed by an external command.
//!
//! Each call spawns the configured command once, writes a JSON request on its
//! stdin and reads one JSON object from its stdout:
//!
//! ```text
//! stdin:  {"role": "conquer", "prompt": "...", "node": {...}}
//! stdout: {"classification": "simple", "result": "..."}
//! ```
//!
//! Replies are checked against the role's JSON Schema before they are
//! deserialized. A reply that fails the schema, or that a parser cannot make
//! sense of, is reported as [`EngineError::InvalidGeneration`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::collaborators::{Conqueror, Divider, Evaluator, GenerateRequest, Generator, Rescuer};
use crate::core::error::EngineError;
use crate::core::tree::TaskNode;
use crate::core::types::{Candidate, ChildSpec, Status, ValueLabel, Verdict};
use crate::io::config::CollaboratorConfig;
use crate::io::parse::{parse_value_label, parse_vote};
use crate::io::process::{ProcessLimits, run_bounded};
use crate::io::prompt::{PromptTemplates, Role};

/// JSON Schema for each role's reply. `value` and `vote` share one.
fn schema_source(role: Role) -> &'static str {
    match role {
        Role::Divide => include_str!("schemas/divide.json"),
        Role::Conquer => include_str!("schemas/conquer.json"),
        Role::Rescue => include_str!("schemas/rescue.json"),
        Role::Value | Role::Vote => include_str!("schemas/evaluate.json"),
        Role::Generate => include_str!("schemas/generate.json"),
    }
}

#[derive(Deserialize)]
struct DivideReply {
    children: Vec<ChildSpec>,
}

#[derive(Deserialize)]
struct RescueReply {
    status: Option<Status>,
}

#[derive(Deserialize)]
struct EvaluateReply {
    answer: String,
}

#[derive(Deserialize)]
struct GenerateReply {
    candidates: Vec<Candidate>,
}

pub struct CommandCollaborator {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    limits: ProcessLimits,
    templates: PromptTemplates,
    validators: BTreeMap<Role, Validator>,
}

impl CommandCollaborator {
    /// Build from `[collaborator]` config. Relative template paths resolve
    /// against `root`, which is also the command's working directory.
    pub fn from_config(root: &Path, cfg: &CollaboratorConfig) -> Result<Self> {
        let (program, args) = cfg
            .command
            .split_first()
            .ok_or_else(|| anyhow!("collaborator.command must be a non-empty array"))?;
        let templates_dir = cfg.templates_dir.as_ref().map(|dir| root.join(dir));
        let templates = PromptTemplates::load(templates_dir.as_deref())?;

        let mut validators = BTreeMap::new();
        for role in Role::ALL {
            let schema: Value = serde_json::from_str(schema_source(role))
                .with_context(|| format!("parse {} reply schema", role.as_str()))?;
            let validator = validator_for(&schema)
                .map_err(|err| anyhow!("invalid {} reply schema: {}", role.as_str(), err))?;
            validators.insert(role, validator);
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: root.to_path_buf(),
            limits: ProcessLimits {
                timeout: cfg.timeout(),
                max_output_bytes: cfg.output_limit_bytes,
            },
            templates,
            validators,
        })
    }

    /// Render the prompt, run the command and return its validated reply.
    ///
    /// `node` is sent verbatim and is visible to templates both as `node` and
    /// through its top-level fields.
    #[instrument(skip_all, fields(role = role.as_str()))]
    fn call<T: DeserializeOwned>(&self, role: Role, node: Value) -> Result<T> {
        let fields = minijinja::Value::from_serialize(&node);
        let prompt = self
            .templates
            .render(role, minijinja::context! { node => fields.clone(), ..fields })?;
        let request = json!({
            "role": role,
            "prompt": prompt,
            "node": node,
        });
        let stdin = serde_json::to_vec(&request).context("serialize collaborator request")?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        debug!(program = %self.program, bytes = stdin.len(), "invoking collaborator");
        let output = run_bounded(cmd, &stdin, self.limits)
            .with_context(|| format!("run collaborator command '{}'", self.program))?;

        if output.timed_out {
            return Err(anyhow!(
                "collaborator '{}' timed out after {:?}",
                self.program,
                self.limits.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "collaborator failed");
            return Err(anyhow!(
                "collaborator '{}' exited with status {:?}: {}",
                self.program,
                output.status.code(),
                output.stderr.excerpt(200)
            ));
        }
        if output.stdout.overflowed() {
            return Err(EngineError::InvalidGeneration(format!(
                "{} reply exceeded {} bytes",
                role.as_str(),
                self.limits.max_output_bytes
            ))
            .into());
        }

        let reply: Value = serde_json::from_slice(&output.stdout.bytes).map_err(|err| {
            EngineError::InvalidGeneration(format!("{} reply is not JSON: {}", role.as_str(), err))
        })?;
        self.check_reply(role, &reply)?;
        let parsed = serde_json::from_value(reply).map_err(|err| {
            EngineError::InvalidGeneration(format!("{} reply has the wrong shape: {}", role.as_str(), err))
        })?;
        Ok(parsed)
    }

    fn check_reply(&self, role: Role, reply: &Value) -> Result<()> {
        let validator = self
            .validators
            .get(&role)
            .ok_or_else(|| anyhow!("no reply schema for role {}", role.as_str()))?;
        if validator.is_valid(reply) {
            return Ok(());
        }
        let messages = validator
            .iter_errors(reply)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(EngineError::InvalidGeneration(format!(
            "{} reply failed schema validation: {}",
            role.as_str(),
            messages.join("; ")
        ))
        .into())
    }
}

fn node_context(node: &TaskNode) -> Result<Value> {
    serde_json::to_value(node).context("serialize task node")
}

impl Divider for CommandCollaborator {
    fn divide(&self, node: &TaskNode) -> Result<Vec<ChildSpec>> {
        let reply: DivideReply = self.call(Role::Divide, node_context(node)?)?;
        Ok(reply.children)
    }
}

impl Conqueror for CommandCollaborator {
    fn conquer(&self, node: &TaskNode) -> Result<Verdict> {
        self.call(Role::Conquer, node_context(node)?)
    }
}

impl Rescuer for CommandCollaborator {
    fn rescue(&self, node: &TaskNode) -> Result<Option<Status>> {
        let reply: RescueReply = self.call(Role::Rescue, node_context(node)?)?;
        Ok(reply.status)
    }
}

impl Evaluator for CommandCollaborator {
    fn value(&self, content: &str) -> Result<ValueLabel> {
        let reply: EvaluateReply = self.call(Role::Value, json!({ "content": content }))?;
        Ok(parse_value_label(&reply.answer)?)
    }

    fn vote(&self, candidates: &[String]) -> Result<usize> {
        let reply: EvaluateReply = self.call(Role::Vote, json!({ "candidates": candidates }))?;
        Ok(parse_vote(&reply.answer, candidates.len())?)
    }
}

impl Generator for CommandCollaborator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<Candidate>> {
        let reply: GenerateReply = self.call(
            Role::Generate,
            json!({
                "task": request.task,
                "content": request.content,
                "phase": request.phase,
                "count": request.count,
            }),
        )?;
        Ok(reply.candidates)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::Classification;
    use std::fs;

    /// Collaborator whose command prints `reply` regardless of its input.
    fn replying(root: &Path, reply: &str) -> CommandCollaborator {
        let script = root.join("reply.sh");
        fs::write(&script, format!("cat > request.json\ncat <<'EOF'\n{reply}\nEOF\n")).expect("script");
        let cfg = CollaboratorConfig {
            command: vec!["sh".to_string(), script.display().to_string()],
            timeout_secs: 10,
            ..CollaboratorConfig::default()
        };
        CommandCollaborator::from_config(root, &cfg).expect("collaborator")
    }

    fn task_node() -> TaskNode {
        TaskNode {
            id: 4,
            parent_id: Some(1),
            task: "sum the column".to_string(),
            status: Status::Running,
            result: None,
        }
    }

    #[test]
    fn conquer_sends_request_and_parses_verdict() {
        let temp = tempfile::tempdir().expect("tempdir");
        let collab = replying(temp.path(), r#"{"classification": "simple", "result": 42}"#);

        let verdict = collab.conquer(&task_node()).expect("verdict");
        assert_eq!(verdict.classification, Classification::Simple);
        assert_eq!(verdict.result, Some(json!(42)));

        let request: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("request.json")).expect("read"))
                .expect("request json");
        assert_eq!(request["role"], "conquer");
        assert_eq!(request["node"]["id"], 4);
        assert!(request["prompt"].as_str().expect("prompt").contains("sum the column"));
    }

    #[test]
    fn schema_violation_is_invalid_generation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let collab = replying(temp.path(), r#"{"classification": "maybe"}"#);

        let err = collab.conquer(&task_node()).expect_err("bad enum");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidGeneration(_))
        ));
    }

    #[test]
    fn non_json_reply_is_invalid_generation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let collab = replying(temp.path(), "sure thing");

        let err = collab.divide(&task_node()).expect_err("not json");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidGeneration(_))
        ));
    }

    #[test]
    fn value_and_vote_parse_free_text_answers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let value = replying(temp.path(), r#"{"answer": "24 is reachable.\nlikely"}"#);
        assert_eq!(value.value("4 6 1 1").expect("label"), ValueLabel::Likely);

        let vote = replying(temp.path(), r#"{"answer": "The best choice is 2"}"#);
        let candidates = vec!["a".to_string(), "b".to_string()];
        assert_eq!(vote.vote(&candidates).expect("vote"), 1);
    }

    #[test]
    fn generate_and_rescue_replies_deserialize() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generate = replying(
            temp.path(),
            r#"{"candidates": [{"task": "try 4 * 6"}, {"task": "merge both", "kind": "merge"}]}"#,
        );
        let candidates = generate
            .generate(&GenerateRequest {
                task: "make 24",
                content: "make 24",
                phase: None,
                count: 2,
            })
            .expect("candidates");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].kind, crate::core::types::TaskKind::Merge);

        let rescue = replying(temp.path(), r#"{"status": null}"#);
        assert_eq!(rescue.rescue(&task_node()).expect("rescue"), None);
    }

    #[test]
    fn failing_command_reports_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = CollaboratorConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 2".to_string()],
            timeout_secs: 10,
            ..CollaboratorConfig::default()
        };
        let collab = CommandCollaborator::from_config(temp.path(), &cfg).expect("collaborator");
        let err = collab.conquer(&task_node()).expect_err("exit 2");
        assert!(err.to_string().contains("boom"));
        assert!(err.downcast_ref::<EngineError>().is_none());
    }
}
