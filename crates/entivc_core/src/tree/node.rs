//! Hash tree nodes.

use std::collections::HashSet;

/// Position of a node within the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The single synthetic root; its children are the root entities.
    SuperRoot,
    /// An entity with an empty parent id.
    Root,
    /// An entity parented to another entity.
    NonRoot,
}

/// A node mirroring one entity (or the synthetic super-root).
///
/// Children are kept in two parallel forms: a membership set and a list
/// ordered ascending by entity id. The list may temporarily be unsorted
/// after child churn; `needs_child_sort` tracks that.
#[derive(Debug, Clone)]
pub(crate) struct TreeNode {
    pub entity_id: String,
    pub parent_id: String,
    /// SHA-256 hex of the entity's canonical JSON; empty on the
    /// super-root.
    pub entity_data_hash: String,
    /// Composite hash over this node and its children.
    pub hash: Option<String>,
    pub child_set: HashSet<String>,
    pub ordered_children: Vec<String>,
    pub outdated: bool,
    pub needs_child_sort: bool,
    pub removed: bool,
}

impl TreeNode {
    pub fn new(entity_id: String, parent_id: String, entity_data_hash: String) -> Self {
        Self {
            entity_id,
            parent_id,
            entity_data_hash,
            hash: None,
            child_set: HashSet::new(),
            ordered_children: Vec::new(),
            outdated: true,
            needs_child_sort: false,
            removed: false,
        }
    }

    pub fn super_root() -> Self {
        let mut node = Self::new(String::new(), String::new(), String::new());
        node.outdated = true;
        node
    }

    pub fn kind(&self) -> NodeKind {
        if self.entity_id.is_empty() {
            NodeKind::SuperRoot
        } else if self.parent_id.is_empty() {
            NodeKind::Root
        } else {
            NodeKind::NonRoot
        }
    }

    pub fn add_child(&mut self, child_id: &str) {
        if self.child_set.insert(child_id.to_string()) {
            self.ordered_children.push(child_id.to_string());
            self.needs_child_sort = true;
        }
    }

    pub fn remove_child(&mut self, child_id: &str) {
        if self.child_set.remove(child_id) {
            self.ordered_children.retain(|id| id != child_id);
            self.needs_child_sort = true;
        }
    }

    pub fn sort_children(&mut self) {
        if self.needs_child_sort {
            self.ordered_children.sort_unstable();
            self.needs_child_sort = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(TreeNode::super_root().kind(), NodeKind::SuperRoot);
        assert_eq!(
            TreeNode::new("e1".into(), String::new(), "h".into()).kind(),
            NodeKind::Root
        );
        assert_eq!(
            TreeNode::new("e1".into(), "p1".into(), "h".into()).kind(),
            NodeKind::NonRoot
        );
    }

    #[test]
    fn children_stay_deduplicated_and_sortable() {
        let mut node = TreeNode::super_root();
        node.add_child("b");
        node.add_child("a");
        node.add_child("b");

        assert_eq!(node.ordered_children.len(), 2);
        assert!(node.needs_child_sort);

        node.sort_children();
        assert_eq!(node.ordered_children, vec!["a", "b"]);
        assert!(!node.needs_child_sort);
    }

    #[test]
    fn remove_child_updates_both_forms() {
        let mut node = TreeNode::super_root();
        node.add_child("a");
        node.add_child("b");
        node.sort_children();

        node.remove_child("a");
        assert!(!node.child_set.contains("a"));
        assert_eq!(node.ordered_children, vec!["b"]);
    }
}
