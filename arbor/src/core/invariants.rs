//! Structural invariants checked on load and by `arbor validate`.

use std::collections::BTreeMap;

use crate::core::graph::GraphNode;
use crate::core::tree::TreeNode;
use crate::core::types::NodeId;

/// Check single-parent tree invariants:
/// - map keys match node ids
/// - exactly one root
/// - every parent exists and has a smaller id (no cycles)
/// - stored depths, where present, are `parent + 1` (root = 1)
/// - cursor references an existing node
pub fn validate_tree<N: TreeNode>(nodes: &BTreeMap<NodeId, N>, cursor: NodeId) -> Vec<String> {
    let mut errors = Vec::new();
    if nodes.is_empty() {
        errors.push("tree has no nodes".to_string());
        return errors;
    }

    let roots: Vec<NodeId> = nodes
        .values()
        .filter(|node| node.parent_id().is_none())
        .map(TreeNode::id)
        .collect();
    match roots.len() {
        0 => errors.push("tree has no root".to_string()),
        1 => {}
        _ => errors.push(format!("multiple roots: {:?}", roots)),
    }

    for (key, node) in nodes {
        if *key != node.id() {
            errors.push(format!("node key {} holds id {}", key, node.id()));
        }
        let Some(parent_id) = node.parent_id() else {
            if let Some(depth) = node.stored_depth()
                && depth != 1
            {
                errors.push(format!("node {}: root depth {} expected 1", key, depth));
            }
            continue;
        };
        let Some(parent) = nodes.get(&parent_id) else {
            errors.push(format!("node {}: parent {} does not exist", key, parent_id));
            continue;
        };
        if parent_id >= *key {
            errors.push(format!(
                "node {}: parent {} must have a smaller id",
                key, parent_id
            ));
        }
        if let (Some(depth), Some(parent_depth)) = (node.stored_depth(), parent.stored_depth())
            && depth != parent_depth + 1
        {
            errors.push(format!(
                "node {}: depth {} expected {}",
                key,
                depth,
                parent_depth + 1
            ));
        }
    }

    if !nodes.contains_key(&cursor) {
        errors.push(format!("cursor {} does not reference a node", cursor));
    }

    errors
}

/// Check merge-graph invariants:
/// - map keys match node ids
/// - only the seed (smallest id) has no predecessors
/// - predecessors exist, have smaller ids and an earlier phase
pub fn validate_graph(nodes: &BTreeMap<NodeId, GraphNode>) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(seed) = nodes.keys().next().copied() else {
        errors.push("graph has no nodes".to_string());
        return errors;
    };

    for (key, node) in nodes {
        if *key != node.id {
            errors.push(format!("node key {} holds id {}", key, node.id));
        }
        if node.predecessors.is_empty() && *key != seed {
            errors.push(format!("node {}: only the seed may have no predecessors", key));
        }
        if *key == seed && !node.predecessors.is_empty() {
            errors.push(format!("seed {} must not have predecessors", key));
        }
        for pred in &node.predecessors {
            match nodes.get(pred) {
                None => errors.push(format!("node {}: predecessor {} does not exist", key, pred)),
                Some(pred_node) => {
                    if pred >= key {
                        errors.push(format!(
                            "node {}: predecessor {} must have a smaller id",
                            key, pred
                        ));
                    }
                    if pred_node.phase >= node.phase {
                        errors.push(format!(
                            "node {}: predecessor {} is not from an earlier phase",
                            key, pred
                        ));
                    }
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::{TaskNode, TaskTree};
    use crate::core::types::Status;

    fn task(id: NodeId, parent_id: Option<NodeId>) -> TaskNode {
        TaskNode {
            id,
            parent_id,
            task: format!("task {id}"),
            status: Status::Waiting,
            result: None,
        }
    }

    #[test]
    fn valid_tree_has_no_errors() {
        let mut tree = TaskTree::new("root");
        tree.add_subtasks(0, ["a", "b"]).expect("children");
        assert!(validate_tree(tree.nodes(), tree.cursor()).is_empty());
    }

    #[test]
    fn reports_roots_cycles_and_cursor() {
        let mut nodes = BTreeMap::new();
        nodes.insert(0, task(0, None));
        nodes.insert(1, task(1, None));
        nodes.insert(2, task(2, Some(3)));
        nodes.insert(3, task(3, Some(2)));
        let errors = validate_tree(&nodes, 9);

        assert!(errors.iter().any(|e| e.contains("multiple roots")));
        assert!(errors.iter().any(|e| e.contains("must have a smaller id")));
        assert!(errors.iter().any(|e| e.contains("cursor 9")));
    }

    #[test]
    fn reports_empty_tree() {
        let nodes: BTreeMap<NodeId, TaskNode> = BTreeMap::new();
        assert_eq!(validate_tree(&nodes, 0), vec!["tree has no nodes".to_string()]);
    }
}
