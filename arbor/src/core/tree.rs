//! Single-parent node store shared by the DnC and search variants.
//!
//! Nodes live in a flat id-keyed map. Parents always have a smaller id than
//! their children, which keeps the structure acyclic without extra checks.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{EngineError, EngineResult};
use crate::core::invariants::validate_tree;
use crate::core::types::{NodeId, Status};

/// Node shape understood by [`Tree`].
pub trait TreeNode {
    /// Build a fresh `waiting` node. `parent` is `None` only for the root.
    fn spawn(id: NodeId, task: String, parent: Option<&Self>) -> Self
    where
        Self: Sized;

    fn id(&self) -> NodeId;

    fn parent_id(&self) -> Option<NodeId>;

    fn task(&self) -> &str;

    fn status(&self) -> Status;

    /// Depth recorded on the node itself, for variants that store it.
    fn stored_depth(&self) -> Option<u32> {
        None
    }
}

/// Plain task node used by the divide-and-conquer walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub task: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl TreeNode for TaskNode {
    fn spawn(id: NodeId, task: String, parent: Option<&Self>) -> Self {
        Self {
            id,
            parent_id: parent.map(|p| p.id),
            task,
            status: Status::Waiting,
            result: None,
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
}

pub type TaskTree = Tree<TaskNode>;

/// Id-keyed single-rooted tree with a cursor.
///
/// Deserialization re-checks every structural invariant, so a `Tree` value
/// always has exactly one root, resolvable parents and a valid cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "TreeRecord<N>",
    bound(deserialize = "N: TreeNode + DeserializeOwned")
)]
pub struct Tree<N> {
    nodes: BTreeMap<NodeId, N>,
    cursor: NodeId,
    #[serde(skip)]
    root: NodeId,
}

/// Raw persisted form of a [`Tree`], validated on conversion.
#[derive(Deserialize)]
struct TreeRecord<N> {
    nodes: BTreeMap<NodeId, N>,
    cursor: NodeId,
}

impl<N: TreeNode> TryFrom<TreeRecord<N>> for Tree<N> {
    type Error = EngineError;

    fn try_from(record: TreeRecord<N>) -> Result<Self, Self::Error> {
        let errors = validate_tree(&record.nodes, record.cursor);
        if !errors.is_empty() {
            return Err(EngineError::InvalidStructure(errors.join("; ")));
        }
        let root = record
            .nodes
            .values()
            .find(|node| node.parent_id().is_none())
            .map(TreeNode::id)
            .ok_or_else(|| EngineError::InvalidStructure("tree has no root".to_string()))?;
        Ok(Self {
            nodes: record.nodes,
            cursor: record.cursor,
            root,
        })
    }
}

impl<N: TreeNode> Tree<N> {
    /// Create a tree holding only the root, with the cursor on it.
    pub fn new(root_task: impl Into<String>) -> Self {
        let root = N::spawn(0, root_task.into(), None);
        let mut nodes = BTreeMap::new();
        nodes.insert(0, root);
        Self {
            nodes,
            cursor: 0,
            root: 0,
        }
    }

    /// Next id to allocate: one past the largest existing id.
    pub fn next_id(&self) -> NodeId {
        self.nodes.keys().next_back().map_or(0, |max| max + 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> EngineResult<&N> {
        self.nodes.get(&id).ok_or(EngineError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> EngineResult<&mut N> {
        self.nodes.get_mut(&id).ok_or(EngineError::UnknownNode(id))
    }

    /// All nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.nodes.values()
    }

    pub(crate) fn nodes(&self) -> &BTreeMap<NodeId, N> {
        &self.nodes
    }

    /// Insert a `waiting` node under `parent_id`.
    ///
    /// A tree always has its root, so `None` is rejected.
    pub fn add_node(&mut self, task: impl Into<String>, parent_id: Option<NodeId>) -> EngineResult<NodeId> {
        let Some(parent_id) = parent_id else {
            return Err(EngineError::MultipleRoots);
        };
        let id = self.next_id();
        let node = N::spawn(id, task.into(), Some(self.get(parent_id)?));
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Insert several children under `parent_id` with consecutive ids.
    ///
    /// The parent is checked before anything is inserted.
    pub fn add_subtasks<I, S>(&mut self, parent_id: NodeId, tasks: I) -> EngineResult<Vec<NodeId>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.get(parent_id)?;
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(self.add_node(task, Some(parent_id))?);
        }
        Ok(ids)
    }

    pub fn root(&self) -> &N {
        &self.nodes[&self.root]
    }

    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    pub fn current(&self) -> &N {
        &self.nodes[&self.cursor]
    }

    pub fn set_cursor(&mut self, id: NodeId) -> EngineResult<()> {
        self.get(id)?;
        self.cursor = id;
        Ok(())
    }

    /// Children of `id` in ascending id order.
    pub fn children(&self, id: NodeId) -> EngineResult<Vec<&N>> {
        self.get(id)?;
        Ok(self
            .nodes
            .values()
            .filter(|node| node.parent_id() == Some(id))
            .collect())
    }

    pub fn child_ids(&self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        Ok(self.children(id)?.into_iter().map(TreeNode::id).collect())
    }

    pub fn parent(&self, id: NodeId) -> EngineResult<Option<&N>> {
        match self.get(id)?.parent_id() {
            Some(parent_id) => Ok(Some(self.get(parent_id)?)),
            None => Ok(None),
        }
    }

    /// Same-parent nodes excluding `id` itself. The root has none.
    pub fn siblings(&self, id: NodeId) -> EngineResult<Vec<&N>> {
        let Some(parent_id) = self.get(id)?.parent_id() else {
            return Ok(Vec::new());
        };
        Ok(self
            .children(parent_id)?
            .into_iter()
            .filter(|node| node.id() != id)
            .collect())
    }

    /// Root is depth 1; every parent hop adds one.
    pub fn depth(&self, id: NodeId) -> EngineResult<u32> {
        let mut depth = 1;
        let mut node = self.get(id)?;
        while let Some(parent_id) = node.parent_id() {
            node = self.get(parent_id)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Ids from the root down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        let mut path = vec![id];
        let mut node = self.get(id)?;
        while let Some(parent_id) = node.parent_id() {
            path.push(parent_id);
            node = self.get(parent_id)?;
        }
        path.reverse();
        Ok(path)
    }

    /// Same-parent node whose id is exactly `id + 1`.
    ///
    /// Siblings created out of sequence (another branch grew in between) are
    /// not found. See [`Tree::next_sibling_ordered`].
    pub fn next_sibling(&self, id: NodeId) -> EngineResult<Option<&N>> {
        let parent_id = self.get(id)?.parent_id();
        Ok(id
            .checked_add(1)
            .and_then(|next| self.nodes.get(&next))
            .filter(|node| parent_id.is_some() && node.parent_id() == parent_id))
    }

    /// Same-parent node whose id is exactly `id - 1`.
    pub fn previous_sibling(&self, id: NodeId) -> EngineResult<Option<&N>> {
        let parent_id = self.get(id)?.parent_id();
        Ok(id
            .checked_sub(1)
            .and_then(|prev| self.nodes.get(&prev))
            .filter(|node| parent_id.is_some() && node.parent_id() == parent_id))
    }

    /// Next entry after `id` in its parent's ascending child list.
    pub fn next_sibling_ordered(&self, id: NodeId) -> EngineResult<Option<&N>> {
        let Some(parent_id) = self.get(id)?.parent_id() else {
            return Ok(None);
        };
        Ok(self
            .children(parent_id)?
            .into_iter()
            .find(|node| node.id() > id))
    }
}
