//! Prompt rendering for command collaborators.
//!
//! Every collaborator role has a built-in minijinja template. A project can
//! override any of them by dropping `<role>.md` into the configured templates
//! directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Collaborator role, used to pick the prompt template and reply schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Divide,
    Conquer,
    Rescue,
    Value,
    Vote,
    Generate,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Divide,
        Role::Conquer,
        Role::Rescue,
        Role::Value,
        Role::Vote,
        Role::Generate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Divide => "divide",
            Role::Conquer => "conquer",
            Role::Rescue => "rescue",
            Role::Value => "value",
            Role::Vote => "vote",
            Role::Generate => "generate",
        }
    }

    fn builtin_template(self) -> &'static str {
        match self {
            Role::Divide => include_str!("prompts/divide.md"),
            Role::Conquer => include_str!("prompts/conquer.md"),
            Role::Rescue => include_str!("prompts/rescue.md"),
            Role::Value => include_str!("prompts/value.md"),
            Role::Vote => include_str!("prompts/vote.md"),
            Role::Generate => include_str!("prompts/generate.md"),
        }
    }
}

/// Template sources for every role.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    sources: BTreeMap<Role, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            sources: Role::ALL
                .iter()
                .map(|role| (*role, role.builtin_template().to_string()))
                .collect(),
        }
    }
}

impl PromptTemplates {
    /// Built-ins, with `<dir>/<role>.md` taking precedence when present.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };
        for role in Role::ALL {
            let path = dir.join(format!("{}.md", role.as_str()));
            if !path.is_file() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read prompt template {}", path.display()))?;
            debug!(role = role.as_str(), path = %path.display(), "using template override");
            templates.sources.insert(role, source);
        }
        templates.check()?;
        Ok(templates)
    }

    /// Render the template for `role` against `ctx`.
    pub fn render<S: Serialize>(&self, role: Role, ctx: S) -> Result<String> {
        let mut env = Environment::new();
        env.add_template(role.as_str(), self.source(role))
            .with_context(|| format!("parse {} template", role.as_str()))?;
        let template = env.get_template(role.as_str())?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {} template", role.as_str()))?;
        Ok(rendered.trim().to_string())
    }

    fn source(&self, role: Role) -> &str {
        self.sources
            .get(&role)
            .map(String::as_str)
            .unwrap_or_else(|| role.builtin_template())
    }

    /// Parse every template so syntax errors surface at load time.
    fn check(&self) -> Result<()> {
        let mut env = Environment::new();
        for role in Role::ALL {
            env.add_template(role.as_str(), self.source(role))
                .with_context(|| format!("parse {} template", role.as_str()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn builtin_templates_render() {
        let templates = PromptTemplates::default();
        let node = context! { id => 3, task => "write the parser", status => "running" };

        let conquer = templates
            .render(Role::Conquer, context! { node => node })
            .expect("conquer");
        assert!(conquer.contains("Task #3"));
        assert!(conquer.contains("write the parser"));

        let vote = templates
            .render(Role::Vote, context! { candidates => vec!["alpha", "beta"] })
            .expect("vote");
        assert!(vote.contains("Choice 1:\nalpha"));
        assert!(vote.contains("Choice 2:\nbeta"));
    }

    #[test]
    fn generate_template_switches_on_phase() {
        let templates = PromptTemplates::default();
        let graph = templates
            .render(
                Role::Generate,
                context! { task => "t", content => "draft", phase => "generate", count => 2 },
            )
            .expect("graph");
        assert!(graph.starts_with("Propose independent approaches"));
        assert!(graph.contains("Current state:\ndraft"));

        let search = templates
            .render(
                Role::Generate,
                context! { task => "t", content => "t", phase => (), count => 3 },
            )
            .expect("search");
        assert!(search.starts_with("Propose possible next steps"));
        assert!(search.contains("at most 3"));
        assert!(!search.contains("Current state"));
    }

    #[test]
    fn overrides_replace_builtins() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("value.md"), "rate: {{ content }}").expect("write");

        let templates = PromptTemplates::load(Some(temp.path())).expect("load");
        let rendered = templates
            .render(Role::Value, context! { content => "x + 1" })
            .expect("render");
        assert_eq!(rendered, "rate: x + 1");
    }

    #[test]
    fn broken_override_fails_at_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("divide.md"), "{% if %}").expect("write");

        let err = PromptTemplates::load(Some(temp.path())).expect_err("syntax error");
        assert!(format!("{err:#}").contains("divide"));
    }
}
