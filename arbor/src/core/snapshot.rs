//! Per-session snapshot: the unit of state read and written every iteration.

use serde::{Deserialize, Serialize};

use crate::core::graph::{TaskGraph, default_phases};
use crate::core::invariants::{validate_graph, validate_tree};
use crate::core::search::ThoughtTree;
use crate::core::tree::{TaskTree, TreeNode};
use crate::core::types::{
    NodeId, PhaseLabel, RunOutcome, ScoringMode, SearchType, SiblingLookup, ValueWeights,
};

/// Which structure a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Divide-and-conquer walk over a task tree.
    #[default]
    Dnc,
    /// Scored thought tree searched breadth- or depth-first.
    Search,
    /// Multi-predecessor graph reduced phase by phase.
    Graph,
}

/// Fixed run parameters, chosen at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub max_depth: u32,
    pub max_steps: u32,
    pub search_type: SearchType,
    pub scoring: ScoringMode,
    /// Beam width `b` for breadth retention.
    pub beam_width: usize,
    /// Candidates requested per generation call.
    pub n_generate: usize,
    /// Value-mode ratings per candidate, or vote rounds in vote mode.
    pub n_evaluate: usize,
    pub best_n: usize,
    pub higher_is_better: bool,
    /// Depth-first search prunes nodes scoring strictly below this.
    pub prune_threshold: f64,
    pub value_weights: ValueWeights,
    pub phases: Vec<PhaseLabel>,
    pub sibling_lookup: SiblingLookup,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_steps: 50,
            search_type: SearchType::Bfs,
            scoring: ScoringMode::Value,
            beam_width: 2,
            n_generate: 3,
            n_evaluate: 3,
            best_n: 1,
            higher_is_better: true,
            prune_threshold: 0.0,
            value_weights: ValueWeights::default(),
            phases: default_phases(),
            sibling_lookup: SiblingLookup::Adjacent,
        }
    }
}

impl RunParams {
    /// Human-readable problems with the parameters; empty when valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_depth == 0 {
            problems.push("max_depth must be > 0".to_string());
        }
        if self.max_steps == 0 {
            problems.push("max_steps must be > 0".to_string());
        }
        if self.beam_width == 0 {
            problems.push("beam_width must be > 0".to_string());
        }
        if self.n_generate == 0 {
            problems.push("n_generate must be > 0".to_string());
        }
        if self.n_evaluate == 0 {
            problems.push("n_evaluate must be > 0".to_string());
        }
        if self.best_n == 0 {
            problems.push("best_n must be > 0".to_string());
        }
        if self.phases.is_empty() {
            problems.push("phases must not be empty".to_string());
        }
        if !self.prune_threshold.is_finite() {
            problems.push("prune_threshold must be finite".to_string());
        }
        let weights = &self.value_weights;
        if [weights.sure, weights.likely, weights.impossible]
            .iter()
            .any(|weight| !weight.is_finite())
        {
            problems.push("value_weights must be finite".to_string());
        }
        problems
    }
}

/// Session structure. Tree variants carry their own cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    Dnc { tree: TaskTree },
    Search { tree: ThoughtTree, depth: u32 },
    Graph { graph: TaskGraph },
}

impl Structure {
    pub fn name(&self) -> &'static str {
        match self {
            Structure::Dnc { .. } => "dnc",
            Structure::Search { .. } => "search",
            Structure::Graph { .. } => "graph",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub params: RunParams,
    pub steps_taken: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    pub structure: Structure,
}

impl Snapshot {
    /// Fresh snapshot holding only the root (or seed) node.
    pub fn seed(session_id: impl Into<String>, mode: Mode, root_task: &str, params: RunParams) -> Self {
        let structure = match mode {
            Mode::Dnc => Structure::Dnc {
                tree: TaskTree::new(root_task),
            },
            Mode::Search => Structure::Search {
                tree: ThoughtTree::new(root_task),
                depth: 1,
            },
            Mode::Graph => Structure::Graph {
                graph: TaskGraph::seed(root_task, params.phases.clone()),
            },
        };
        Self {
            session_id: session_id.into(),
            params,
            steps_taken: 0,
            outcome: None,
            structure,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Structural problems across the whole snapshot; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.params.problems();
        match &self.structure {
            Structure::Dnc { tree } => errors.extend(validate_tree(tree.nodes(), tree.cursor())),
            Structure::Search { tree, depth } => {
                errors.extend(validate_tree(tree.nodes(), tree.cursor()));
                if *depth == 0 {
                    errors.push("search depth must be >= 1".to_string());
                }
            }
            Structure::Graph { graph } => errors.extend(validate_graph(graph.nodes())),
        }
        errors
    }

    /// Task text along the reported answer path, if the run was solved.
    pub fn answer(&self) -> Option<Vec<String>> {
        let Some(RunOutcome::Solved { answer_path }) = &self.outcome else {
            return None;
        };
        answer_path
            .iter()
            .map(|id| self.task_of(*id))
            .collect::<Option<Vec<String>>>()
    }

    fn task_of(&self, id: NodeId) -> Option<String> {
        match &self.structure {
            Structure::Dnc { tree } => tree.get(id).ok().map(|n| n.task().to_string()),
            Structure::Search { tree, .. } => tree.get(id).ok().map(|n| n.task().to_string()),
            Structure::Graph { graph } => graph.get(id).ok().map(|n| n.task.clone()),
        }
    }
}
