//! Scored thought tree and the two search disciplines run over it.
//!
//! Pruning only flips `pruned`; discarded branches stay in the tree so a
//! finished run can still be inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::error::{EngineError, EngineResult};
use crate::core::tree::{Tree, TreeNode};
use crate::core::types::{NodeId, Status, ValueLabel, ValueWeights};

/// Tree node carrying an accumulated evaluation score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub task: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Sum of every evaluation applied to this node.
    pub evaluation_value: f64,
    /// Root-to-node thought text, fed to the next evaluation or generation.
    pub content: String,
    pub depth: u32,
    #[serde(default)]
    pub evaluated: bool,
    #[serde(default)]
    pub pruned: bool,
}

impl ThoughtNode {
    pub fn is_live(&self) -> bool {
        !self.pruned
    }
}

impl TreeNode for ThoughtNode {
    fn spawn(id: NodeId, task: String, parent: Option<&Self>) -> Self {
        let (depth, content) = match parent {
            Some(parent) if !parent.content.is_empty() => {
                (parent.depth + 1, format!("{}\n{}", parent.content, task))
            }
            Some(parent) => (parent.depth + 1, task.clone()),
            None => (1, task.clone()),
        };
        Self {
            id,
            parent_id: parent.map(|p| p.id),
            task,
            status: Status::Waiting,
            result: None,
            evaluation_value: 0.0,
            content,
            depth,
            evaluated: false,
            pruned: false,
        }
    }

    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }

    fn task(&self) -> &str {
        &self.task
    }

    fn status(&self) -> Status {
        self.status
    }

    fn stored_depth(&self) -> Option<u32> {
        Some(self.depth)
    }
}

pub type ThoughtTree = Tree<ThoughtNode>;

/// Where a depth-first step leaves the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfsMove {
    /// Cursor moved to a live child of the evaluated node.
    Descend(NodeId),
    /// Evaluated node is viable but has no children yet.
    Expand(NodeId),
    /// A branch was pruned and the cursor moved to a surviving ancestor's child.
    Backtracked(NodeId),
    /// Viable node at the depth limit.
    Solved(NodeId),
    /// Every branch, root included, is pruned.
    Exhausted,
}

/// Add `delta` to a node's score and mark it evaluated.
pub fn add_score(tree: &mut ThoughtTree, id: NodeId, delta: f64) -> EngineResult<()> {
    let node = tree.get_mut(id)?;
    node.evaluation_value += delta;
    node.evaluated = true;
    Ok(())
}

/// Sum the weights of repeated value-mode labels.
pub fn value_score(labels: &[ValueLabel], weights: &ValueWeights) -> f64 {
    labels.iter().map(|label| weights.weight(*label)).sum()
}

/// Count vote rounds into per-candidate score increments.
pub fn tally_votes(choices: &[usize], candidates: usize) -> EngineResult<Vec<f64>> {
    let mut tally = vec![0.0; candidates];
    for &choice in choices {
        let slot = tally.get_mut(choice).ok_or_else(|| {
            EngineError::InvalidGeneration(format!(
                "vote chose candidate {} of {}",
                choice, candidates
            ))
        })?;
        *slot += 1.0;
    }
    Ok(tally)
}

/// Live node ids at `depth`, ascending.
pub fn live_at_depth(tree: &ThoughtTree, depth: u32) -> Vec<NodeId> {
    tree.iter()
        .filter(|node| node.depth == depth && node.is_live())
        .map(|node| node.id)
        .collect()
}

pub fn live_children(tree: &ThoughtTree, id: NodeId) -> EngineResult<Vec<NodeId>> {
    Ok(tree
        .children(id)?
        .into_iter()
        .filter(|node| node.is_live())
        .map(|node| node.id)
        .collect())
}

/// Order ids by descending score; equal scores keep ascending id order.
fn rank(tree: &ThoughtTree, ids: &[NodeId]) -> EngineResult<Vec<NodeId>> {
    let mut scored = Vec::with_capacity(ids.len());
    for &id in ids {
        scored.push((id, tree.get(id)?.evaluation_value));
    }
    scored.sort_by_key(|(id, _)| *id);
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored.into_iter().map(|(id, _)| id).collect())
}

/// Keep the `b` best of `ids` and prune the rest. Returns kept ids ascending.
pub fn retain_top(tree: &mut ThoughtTree, ids: &[NodeId], b: usize) -> EngineResult<Vec<NodeId>> {
    let ranked = rank(tree, ids)?;
    let (kept, dropped) = ranked.split_at(b.min(ranked.len()));
    for &id in dropped {
        tree.get_mut(id)?.pruned = true;
    }
    debug!(kept = ?kept, pruned = ?dropped, "beam retention");
    let mut kept = kept.to_vec();
    kept.sort_unstable();
    Ok(kept)
}

/// Highest-scoring live child of `id`, first-created on ties.
pub fn best_live_child(tree: &ThoughtTree, id: NodeId) -> EngineResult<Option<NodeId>> {
    let live = live_children(tree, id)?;
    Ok(rank(tree, &live)?.first().copied())
}

/// Highest-scoring live node at `depth`, first-created on ties.
pub fn best_at_depth(tree: &ThoughtTree, depth: u32) -> EngineResult<Option<NodeId>> {
    let live = live_at_depth(tree, depth);
    Ok(rank(tree, &live)?.first().copied())
}

/// Highest-scoring live node at `depth` that has been scored at least once.
fn best_evaluated_at_depth(tree: &ThoughtTree, depth: u32) -> EngineResult<Option<NodeId>> {
    let scored: Vec<NodeId> = live_at_depth(tree, depth)
        .into_iter()
        .filter(|id| tree.get(*id).is_ok_and(|node| node.evaluated))
        .collect();
    Ok(rank(tree, &scored)?.first().copied())
}

/// Prune `id`, then every ancestor left without a live child.
///
/// Returns the first ancestor that still has a live child, or `None` when the
/// pruning reached the root.
pub fn prune_upward(tree: &mut ThoughtTree, id: NodeId) -> EngineResult<Option<NodeId>> {
    let mut node_id = id;
    loop {
        tree.get_mut(node_id)?.pruned = true;
        let Some(parent_id) = tree.get(node_id)?.parent_id else {
            return Ok(None);
        };
        if !live_children(tree, parent_id)?.is_empty() {
            return Ok(Some(parent_id));
        }
        debug!(node = parent_id, "parent left without live children");
        node_id = parent_id;
    }
}

/// Prune from `id` upward and move the cursor to the best surviving branch.
pub fn backtrack_from(tree: &mut ThoughtTree, id: NodeId) -> EngineResult<DfsMove> {
    let Some(ancestor) = prune_upward(tree, id)? else {
        return Ok(DfsMove::Exhausted);
    };
    match best_live_child(tree, ancestor)? {
        Some(child) => {
            tree.set_cursor(child)?;
            Ok(DfsMove::Backtracked(child))
        }
        None => Ok(DfsMove::Exhausted),
    }
}

/// Decide the depth-first move for the cursor once it has been evaluated.
pub fn dfs_next(tree: &mut ThoughtTree, threshold: f64, max_depth: u32) -> EngineResult<DfsMove> {
    let node = tree.current();
    let id = node.id;

    if node.evaluation_value < threshold {
        debug!(node = id, score = node.evaluation_value, threshold, "below viability");
        return backtrack_from(tree, id);
    }
    if node.depth >= max_depth {
        let best = best_evaluated_at_depth(tree, node.depth)?.unwrap_or(id);
        if best != id {
            debug!(node = id, best, "better-scored node at the depth limit");
            tree.set_cursor(best)?;
        }
        return Ok(DfsMove::Solved(best));
    }
    if let Some(child) = best_live_child(tree, id)? {
        tree.set_cursor(child)?;
        return Ok(DfsMove::Descend(child));
    }
    if tree.children(id)?.is_empty() {
        return Ok(DfsMove::Expand(id));
    }
    // Children exist but all of them were pruned.
    backtrack_from(tree, id)
}

/// Ids from the root to `id`, the reported answer path.
pub fn answer_path(tree: &ThoughtTree, id: NodeId) -> EngineResult<Vec<NodeId>> {
    tree.path_to(id)
}
