//! Divide-and-conquer traversal over a lazily grown task tree.
//!
//! One external iteration conquers the cursor node (possibly dividing it) and
//! then calls [`advance`] to pick the next cursor. Repeating the pair yields
//! an iterative pre-order walk that ends when the root has no next sibling.

use serde_json::Value;
use tracing::debug;

use crate::core::error::{EngineError, EngineResult};
use crate::core::tree::{TaskTree, TreeNode};
use crate::core::types::{ChildSpec, Classification, NodeId, SiblingLookup, Status, Verdict};

/// Why [`advance`] stopped or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Cursor node is `failed` and was not rescued.
    Failed,
    /// Moved to the first child of the cursor.
    Descended,
    /// Moved to the next sibling of the cursor.
    NextSibling,
    /// Moved to the next sibling of an ancestor.
    Climbed,
    /// Every node has been visited.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub exit: bool,
    pub reason: AdvanceReason,
}

impl Advance {
    fn stop(reason: AdvanceReason) -> Self {
        Self { exit: true, reason }
    }

    fn moved(reason: AdvanceReason) -> Self {
        Self {
            exit: false,
            reason,
        }
    }
}

/// Move the cursor after one conquer/divide step.
///
/// Rules, first match wins: failed cursor exits; children descend; a next
/// sibling is taken; otherwise climb until an ancestor has a next sibling;
/// reaching the root without one completes the walk.
pub fn advance(tree: &mut TaskTree, lookup: SiblingLookup) -> EngineResult<Advance> {
    let current = tree.current();
    let current_id = current.id;

    if current.status == Status::Failed {
        debug!(node = current_id, "cursor failed; stopping walk");
        return Ok(Advance::stop(AdvanceReason::Failed));
    }

    if let Some(first) = tree.child_ids(current_id)?.first().copied() {
        tree.set_cursor(first)?;
        return Ok(Advance::moved(AdvanceReason::Descended));
    }

    if let Some(next) = next_sibling_id(tree, current_id, lookup)? {
        tree.set_cursor(next)?;
        return Ok(Advance::moved(AdvanceReason::NextSibling));
    }

    let mut node_id = current_id;
    while let Some(parent_id) = tree.get(node_id)?.parent_id {
        node_id = parent_id;
        if let Some(next) = next_sibling_id(tree, node_id, lookup)? {
            tree.set_cursor(next)?;
            return Ok(Advance::moved(AdvanceReason::Climbed));
        }
    }

    Ok(Advance::stop(AdvanceReason::Completed))
}

fn next_sibling_id(tree: &TaskTree, id: NodeId, lookup: SiblingLookup) -> EngineResult<Option<NodeId>> {
    let next = match lookup {
        SiblingLookup::Adjacent => tree.next_sibling(id)?,
        SiblingLookup::Ordered => tree.next_sibling_ordered(id)?,
    };
    Ok(next.map(TreeNode::id))
}

/// Record a Conqueror verdict on `id`.
///
/// `simple` succeeds with the result, `failed` fails with it, and `complex`
/// leaves the node `running` until its children are attached.
pub fn record_verdict(tree: &mut TaskTree, id: NodeId, verdict: &Verdict) -> EngineResult<()> {
    let node = tree.get_mut(id)?;
    node.status = match verdict.classification {
        Classification::Simple => Status::Success,
        Classification::Complex => Status::Running,
        Classification::Failed => Status::Failed,
    };
    if verdict.result.is_some() {
        node.result = verdict.result.clone();
    }
    Ok(())
}

/// Attach Divider output under `parent_id`.
///
/// An empty list means the node is terminal and it is marked `success`.
/// Blank task text is rejected before anything is inserted.
pub fn attach_children(tree: &mut TaskTree, parent_id: NodeId, specs: &[ChildSpec]) -> EngineResult<Vec<NodeId>> {
    if let Some(blank) = specs.iter().position(|spec| spec.task.trim().is_empty()) {
        return Err(EngineError::InvalidGeneration(format!(
            "child spec {} for node {} has an empty task",
            blank, parent_id
        )));
    }
    if specs.is_empty() {
        tree.get_mut(parent_id)?.status = Status::Success;
        return Ok(Vec::new());
    }
    tree.add_subtasks(parent_id, specs.iter().map(|spec| spec.task.clone()))
}

/// Fail a `complex` node that sits at the depth limit.
pub fn mark_depth_limited(tree: &mut TaskTree, id: NodeId, max_depth: u32) -> EngineResult<()> {
    let node = tree.get_mut(id)?;
    node.status = Status::Failed;
    node.result = Some(Value::String(format!(
        "depth limit {} reached before the task became simple",
        max_depth
    )));
    Ok(())
}

/// Apply a Rescuer decision. `None` leaves the failure in place.
pub fn apply_rescue(tree: &mut TaskTree, id: NodeId, rescued: Option<Status>) -> EngineResult<bool> {
    let node = tree.get_mut(id)?;
    match rescued {
        Some(status) if status != Status::Failed => {
            debug!(node = id, status = status.as_str(), "node rescued");
            node.status = status;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Mark internal nodes `success` once all their children succeeded.
///
/// Children always have larger ids than their parent, so a single pass in
/// descending id order settles whole subtrees. Returns the ids that changed.
pub fn derive_statuses(tree: &mut TaskTree) -> EngineResult<Vec<NodeId>> {
    let mut ids: Vec<NodeId> = tree.iter().map(|node| node.id).collect();
    ids.reverse();
    let mut derived = Vec::new();
    for id in ids {
        let children = tree.children(id)?;
        if children.is_empty() || tree.get(id)?.status == Status::Success {
            continue;
        }
        if children.iter().all(|child| child.status == Status::Success) {
            tree.get_mut(id)?.status = Status::Success;
            derived.push(id);
        }
    }
    derived.sort_unstable();
    Ok(derived)
}
