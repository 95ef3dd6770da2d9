//! Merge graph of task nodes with phases and best-N reduction.
//!
//! Unlike [`crate::core::tree::Tree`], a node here may have several
//! predecessors. The frontier is the set of nodes nobody lists as a
//! predecessor yet.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::error::{EngineError, EngineResult};
use crate::core::invariants::validate_graph;
use crate::core::types::{Candidate, NodeId, PhaseLabel, Status, TaskKind};

/// Inputs a node was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NodeContent {
    Single(String),
    Many(Vec<String>),
}

impl NodeContent {
    /// Flattened text for evaluation and generation requests.
    pub fn text(&self) -> String {
        match self {
            NodeContent::Single(text) => text.clone(),
            NodeContent::Many(texts) => texts.join("\n---\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub task: String,
    #[serde(default)]
    pub kind: TaskKind,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub predecessors: BTreeSet<NodeId>,
    pub phase: u32,
    pub score: f64,
    pub scored: bool,
    /// Dropped by a reduction; kept for audit but outside the frontier.
    #[serde(default)]
    pub pruned: bool,
    pub content: NodeContent,
}

impl GraphNode {
    /// Text handed to successors: the result when present, else the task.
    pub fn output_text(&self) -> String {
        match &self.result {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => self.task.clone(),
        }
    }
}

pub fn default_phases() -> Vec<PhaseLabel> {
    vec![PhaseLabel::Generate, PhaseLabel::Reduce, PhaseLabel::Refine]
}

/// Task graph plus its phase counter and phase schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphRecord")]
pub struct TaskGraph {
    nodes: BTreeMap<NodeId, GraphNode>,
    phase: u32,
    phases: Vec<PhaseLabel>,
}

#[derive(Deserialize)]
struct GraphRecord {
    nodes: BTreeMap<NodeId, GraphNode>,
    phase: u32,
    #[serde(default = "default_phases")]
    phases: Vec<PhaseLabel>,
}

impl TryFrom<GraphRecord> for TaskGraph {
    type Error = EngineError;

    fn try_from(record: GraphRecord) -> Result<Self, Self::Error> {
        let mut errors = validate_graph(&record.nodes);
        if record.phases.is_empty() {
            errors.push("phase schedule is empty".to_string());
        }
        if !errors.is_empty() {
            return Err(EngineError::InvalidStructure(errors.join("; ")));
        }
        Ok(Self {
            nodes: record.nodes,
            phase: record.phase,
            phases: record.phases,
        })
    }
}

impl TaskGraph {
    /// Graph holding only the seed node (id 0, phase 0, no predecessors).
    pub fn seed(task: impl Into<String>, phases: Vec<PhaseLabel>) -> Self {
        let task = task.into();
        let seed = GraphNode {
            id: 0,
            content: NodeContent::Single(task.clone()),
            task,
            kind: TaskKind::Solve,
            status: Status::Waiting,
            result: None,
            predecessors: BTreeSet::new(),
            phase: 0,
            score: 0.0,
            scored: false,
            pruned: false,
        };
        let mut nodes = BTreeMap::new();
        nodes.insert(0, seed);
        let phases = if phases.is_empty() {
            default_phases()
        } else {
            phases
        };
        Self {
            nodes,
            phase: 0,
            phases,
        }
    }

    pub fn next_id(&self) -> NodeId {
        self.nodes.keys().next_back().map_or(0, |max| max + 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> EngineResult<&GraphNode> {
        self.nodes.get(&id).ok_or(EngineError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> EngineResult<&mut GraphNode> {
        self.nodes.get_mut(&id).ok_or(EngineError::UnknownNode(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub(crate) fn nodes(&self) -> &BTreeMap<NodeId, GraphNode> {
        &self.nodes
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn phases(&self) -> &[PhaseLabel] {
        &self.phases
    }

    /// Operation for the current phase. The last scheduled label repeats.
    pub fn phase_label(&self) -> PhaseLabel {
        let index = (self.phase as usize).min(self.phases.len().saturating_sub(1));
        self.phases.get(index).copied().unwrap_or(PhaseLabel::Refine)
    }

    pub fn advance_phase(&mut self) {
        self.phase += 1;
    }

    /// Add a node for the next phase on top of `predecessors`.
    pub fn add_node(
        &mut self,
        task: impl Into<String>,
        kind: TaskKind,
        content: NodeContent,
        predecessors: BTreeSet<NodeId>,
    ) -> EngineResult<NodeId> {
        if predecessors.is_empty() {
            return Err(EngineError::MissingPredecessor);
        }
        for pred in &predecessors {
            self.get(*pred)?;
        }
        let id = self.next_id();
        self.nodes.insert(
            id,
            GraphNode {
                id,
                task: task.into(),
                kind,
                status: Status::Waiting,
                result: None,
                predecessors,
                phase: self.phase + 1,
                score: 0.0,
                scored: false,
                pruned: false,
                content,
            },
        );
        Ok(id)
    }

    /// Unpruned nodes that are not yet a predecessor of anything, ascending.
    pub fn leaves(&self) -> Vec<NodeId> {
        let consumed: BTreeSet<NodeId> = self
            .nodes
            .values()
            .flat_map(|node| node.predecessors.iter().copied())
            .collect();
        self.nodes
            .values()
            .filter(|node| !node.pruned && !consumed.contains(&node.id))
            .map(|node| node.id)
            .collect()
    }

    /// A node may run only once every predecessor has been scored.
    pub fn is_executable(&self, id: NodeId) -> EngineResult<bool> {
        let node = self.get(id)?;
        for pred in &node.predecessors {
            if !self.get(*pred)?.scored {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn executable_leaves(&self) -> EngineResult<Vec<NodeId>> {
        let mut ready = Vec::new();
        for id in self.leaves() {
            if self.is_executable(id)? {
                ready.push(id);
            }
        }
        Ok(ready)
    }

    pub fn set_score(&mut self, id: NodeId, score: f64) -> EngineResult<()> {
        let node = self.get_mut(id)?;
        node.score = score;
        node.scored = true;
        Ok(())
    }

    /// One successor per candidate, each with `leaf` as its only predecessor.
    pub fn expand_leaf(&mut self, leaf: NodeId, candidates: &[Candidate]) -> EngineResult<Vec<NodeId>> {
        self.get(leaf)?;
        if let Some(blank) = candidates.iter().position(|c| c.task.trim().is_empty()) {
            return Err(EngineError::InvalidGeneration(format!(
                "candidate {} for node {} has an empty task",
                blank, leaf
            )));
        }
        let mut ids = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            ids.push(self.add_node(
                candidate.task.clone(),
                candidate.kind,
                NodeContent::Single(candidate.task.clone()),
                BTreeSet::from([leaf]),
            )?);
        }
        Ok(ids)
    }

    /// Tournament step: per task kind keep the `best_n` executable leaves and
    /// merge them into one next-phase node; the losers are pruned. Returns the
    /// new node ids.
    pub fn reduce_best_n(&mut self, best_n: usize, higher_is_better: bool) -> EngineResult<Vec<NodeId>> {
        let mut groups: BTreeMap<TaskKind, Vec<(NodeId, f64)>> = BTreeMap::new();
        for id in self.executable_leaves()? {
            let node = self.get(id)?;
            groups.entry(node.kind).or_default().push((id, node.score));
        }

        let mut created = Vec::new();
        for members in groups.into_values() {
            created.extend(self.merge_best(members, best_n, higher_is_better)?);
        }
        Ok(created)
    }

    /// Like [`Self::reduce_best_n`] but over every executable leaf at once, so
    /// the frontier always narrows to a single node. The merged node takes the
    /// winner's kind.
    pub fn collapse_best_n(&mut self, best_n: usize, higher_is_better: bool) -> EngineResult<Option<NodeId>> {
        let mut members = Vec::new();
        for id in self.executable_leaves()? {
            members.push((id, self.get(id)?.score));
        }
        self.merge_best(members, best_n, higher_is_better)
    }

    /// `members` arrive in ascending id order, so the stable sort keeps the
    /// first-created node ahead on equal scores.
    fn merge_best(
        &mut self,
        mut members: Vec<(NodeId, f64)>,
        best_n: usize,
        higher_is_better: bool,
    ) -> EngineResult<Option<NodeId>> {
        if higher_is_better {
            members.sort_by(|a, b| b.1.total_cmp(&a.1));
        } else {
            members.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        let kept: Vec<NodeId> = members.iter().take(best_n).map(|(id, _)| *id).collect();
        let Some(&winner) = kept.first() else {
            return Ok(None);
        };
        for (id, _) in members.iter().skip(best_n) {
            self.get_mut(*id)?.pruned = true;
        }

        let mut texts = Vec::with_capacity(kept.len());
        for id in &kept {
            texts.push(self.get(*id)?.output_text());
        }
        let content = if texts.len() == 1 {
            NodeContent::Single(texts.remove(0))
        } else {
            NodeContent::Many(texts)
        };
        let (task, kind) = {
            let node = self.get(winner)?;
            (node.task.clone(), node.kind)
        };
        let id = self.add_node(task, kind, content, kept.iter().copied().collect())?;
        debug!(?kind, kept = ?kept, node = id, "best-n reduction");
        Ok(Some(id))
    }

    /// The refinement loop ends once one leaf remains in a `refine` phase.
    pub fn should_exit(&self) -> bool {
        self.leaves().len() == 1 && self.phase_label() == PhaseLabel::Refine
    }

    /// `id` and every node it transitively depends on, ascending.
    pub fn lineage(&self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.get(next)?.predecessors.iter().copied());
            }
        }
        Ok(seen.into_iter().collect())
    }
}
