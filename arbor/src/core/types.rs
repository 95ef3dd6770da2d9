//! Shared deterministic types for the traversal and search core.
//!
//! These types are the stable vocabulary between the core, the collaborators
//! and the persisted snapshot. String tags coming from collaborators are
//! parsed into these enums at the boundary and never compared as text inside
//! the core.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node identifier. Allocated as `max + 1` and never reused.
pub type NodeId = u64;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Waiting,
    Running,
    Success,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

/// Conqueror verdict for a single task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// The node produced a usable result directly.
    Simple,
    /// The node needs children.
    Complex,
    Failed,
}

/// Output of one Conqueror call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Child spec returned by a Divider. Only `task` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    pub task: String,
}

/// Search discipline for the scored thought tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Bfs,
    Dfs,
}

/// Scoring policy, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Each candidate is rated independently against [`ValueLabel`].
    #[default]
    Value,
    /// All candidates are shown at once and one index is chosen.
    Vote,
}

/// Closed vocabulary for value-mode evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueLabel {
    Sure,
    Likely,
    Impossible,
}

impl ValueLabel {
    pub const ALL: [ValueLabel; 3] = [ValueLabel::Sure, ValueLabel::Likely, ValueLabel::Impossible];

    pub fn as_str(self) -> &'static str {
        match self {
            ValueLabel::Sure => "sure",
            ValueLabel::Likely => "likely",
            ValueLabel::Impossible => "impossible",
        }
    }
}

/// Numeric weight of each [`ValueLabel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueWeights {
    pub sure: f64,
    pub likely: f64,
    pub impossible: f64,
}

impl Default for ValueWeights {
    fn default() -> Self {
        Self {
            sure: 1.0,
            likely: 0.5,
            impossible: -1.0,
        }
    }
}

impl ValueWeights {
    pub fn weight(&self, label: ValueLabel) -> f64 {
        match label {
            ValueLabel::Sure => self.sure,
            ValueLabel::Likely => self.likely,
            ValueLabel::Impossible => self.impossible,
        }
    }
}

/// Best-N grouping key for graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Solve,
    Merge,
    Refine,
}

/// Operation performed by a graph phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseLabel {
    Generate,
    Reduce,
    Refine,
}

/// How the DnC controller finds the next sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingLookup {
    /// Sibling whose id is exactly `id + 1`.
    #[default]
    Adjacent,
    /// Next entry in the parent's ascending child list.
    Ordered,
}

/// Successor candidate returned by a Generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub task: String,
    #[serde(default)]
    pub kind: TaskKind,
}

/// Terminal state of a run, recorded on the snapshot once `exit` is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Search or graph run picked a final answer.
    Solved { answer_path: Vec<NodeId> },
    /// DnC walk visited the whole tree.
    Completed,
    /// DnC walk stopped on an unrescued failed node.
    Failed { node_id: NodeId },
    /// Every branch of the search was pruned.
    Exhausted,
    /// `max_steps` iterations ran without reaching another outcome.
    BudgetExhausted,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Solved { .. } => "solved",
            RunOutcome::Completed => "completed",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Exhausted => "exhausted",
            RunOutcome::BudgetExhausted => "budget_exhausted",
        }
    }
}
