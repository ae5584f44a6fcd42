//! The parent-child hash tree.
//!
//! The tree mirrors the entity parent relation: a synthetic super-root
//! holds every root-parented entity; every other node hangs under the
//! node of its parent entity. Each node carries the hash of its
//! entity's canonical JSON, and a composite hash over itself and its
//! children ordered by entity id. The super-root's composite hash is
//! the snapshot digest.
//!
//! Maintenance is incremental: entity changes mark affected nodes
//! outdated; recomputation happens once per root-hash query.

mod node;

pub use node::NodeKind;

use crate::canonical::{field_map_hash, sha256_hex};
use crate::change::ChangeKind;
use crate::delta::Delta;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::store::EntityStore;
use node::TreeNode;
use std::collections::{HashMap, HashSet};

/// The incremental hash tree over a head store.
#[derive(Debug)]
pub struct HashTree {
    /// Nodes keyed by entity id; the empty key is the super-root.
    nodes: HashMap<String, TreeNode>,
    /// Children waiting for a parent that has not been inserted yet,
    /// keyed by the missing parent id. The waiting nodes themselves
    /// live in `nodes` but are unreachable from the super-root.
    staged: HashMap<String, HashSet<String>>,
    cleanup_needed: bool,
}

impl Default for HashTree {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTree {
    /// Creates an empty tree holding only the super-root.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(String::new(), TreeNode::super_root());
        Self {
            nodes,
            staged: HashMap::new(),
            cleanup_needed: false,
        }
    }

    /// Computes the data hash of an entity's canonical JSON.
    pub fn entity_hash(entity: &Entity) -> CoreResult<String> {
        field_map_hash(&entity.to_dict())
    }

    /// The root hash of a tree with no entities.
    #[must_use]
    pub fn empty_root_hash() -> String {
        sha256_hex(b"")
    }

    /// Returns the number of live entity nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1 - self.nodes.values().filter(|n| n.removed).count()
    }

    /// Returns true if a live node exists for the entity.
    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.nodes
            .get(entity_id)
            .is_some_and(|n| !n.removed && !n.entity_id.is_empty())
    }

    /// Returns the position kind of a node, if present.
    #[must_use]
    pub fn node_kind(&self, entity_id: &str) -> Option<NodeKind> {
        self.nodes.get(entity_id).map(node::TreeNode::kind)
    }

    /// Inserts a node for a new entity.
    ///
    /// If the parent is not present yet the node is staged and attached
    /// once the parent arrives; staged subtrees left over at hash time
    /// are an integrity error.
    pub fn insert(
        &mut self,
        entity_id: &str,
        parent_id: &str,
        entity_data_hash: String,
    ) -> CoreResult<()> {
        if entity_id.is_empty() {
            return Err(CoreError::invalid_entity("tree node id must not be empty"));
        }
        if self.nodes.get(entity_id).is_some_and(|n| !n.removed) {
            return Err(CoreError::DuplicateId {
                entity_id: entity_id.to_string(),
            });
        }

        let mut node = TreeNode::new(
            entity_id.to_string(),
            parent_id.to_string(),
            entity_data_hash,
        );

        // Adopt children that were staged waiting for this entity.
        if let Some(waiting) = self.staged.remove(entity_id) {
            for child in waiting {
                node.add_child(&child);
            }
        }
        self.nodes.insert(entity_id.to_string(), node);

        self.attach(entity_id, parent_id);
        Ok(())
    }

    /// Refreshes a node after its entity changed.
    ///
    /// Rehashes the node, marks the path to the super-root outdated
    /// and moves the node when the entity was reparented.
    pub fn update(
        &mut self,
        entity_id: &str,
        parent_id: &str,
        entity_data_hash: String,
    ) -> CoreResult<()> {
        let old_parent = match self.nodes.get_mut(entity_id) {
            Some(node) if !node.removed => {
                node.entity_data_hash = entity_data_hash;
                node.parent_id.clone()
            }
            _ => {
                return Err(CoreError::EntityNotFound {
                    entity_id: entity_id.to_string(),
                })
            }
        };

        self.mark_outdated(entity_id);

        if old_parent != parent_id {
            self.detach(entity_id, &old_parent);
            if let Some(node) = self.nodes.get_mut(entity_id) {
                node.parent_id = parent_id.to_string();
            }
            self.attach(entity_id, parent_id);
        }
        Ok(())
    }

    /// Tombstones a node.
    ///
    /// The node stays in place until the sweep that precedes the next
    /// hash computation; sweeping a tombstone with live children is an
    /// integrity error.
    pub fn remove(&mut self, entity_id: &str) -> CoreResult<()> {
        let parent_id = match self.nodes.get_mut(entity_id) {
            Some(node) if !node.removed && !node.entity_id.is_empty() => {
                node.removed = true;
                node.parent_id.clone()
            }
            _ => {
                return Err(CoreError::EntityNotFound {
                    entity_id: entity_id.to_string(),
                })
            }
        };

        self.cleanup_needed = true;
        self.mark_outdated(&parent_id);
        Ok(())
    }

    /// Links a node under its parent, staging when the parent is
    /// missing.
    fn attach(&mut self, entity_id: &str, parent_id: &str) {
        match self.nodes.get_mut(parent_id) {
            Some(parent) if !parent.removed => {
                parent.add_child(entity_id);
                self.mark_outdated(parent_id);
            }
            _ => {
                self.staged
                    .entry(parent_id.to_string())
                    .or_default()
                    .insert(entity_id.to_string());
            }
        }
    }

    /// Unlinks a node from its current parent or staging slot.
    fn detach(&mut self, entity_id: &str, parent_id: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.remove_child(entity_id);
            self.mark_outdated(parent_id);
        }
        if let Some(waiting) = self.staged.get_mut(parent_id) {
            waiting.remove(entity_id);
            if waiting.is_empty() {
                self.staged.remove(parent_id);
            }
        }
    }

    /// Marks a node and its ancestors outdated, stopping at a node
    /// that is already flagged.
    fn mark_outdated(&mut self, entity_id: &str) {
        let mut current = entity_id.to_string();
        loop {
            let Some(node) = self.nodes.get_mut(&current) else {
                return;
            };
            if node.outdated {
                return;
            }
            node.outdated = true;
            if node.entity_id.is_empty() {
                return;
            }
            current = node.parent_id.clone();
        }
    }

    /// Recomputes and returns the snapshot digest.
    ///
    /// Asserts there are no orphan subtrees, sweeps tombstones, sorts
    /// children where needed, then recomputes outdated nodes bottom-up.
    pub fn update_root_hash(&mut self) -> CoreResult<String> {
        if let Some(parent_id) = self.staged.keys().next() {
            return Err(CoreError::OrphanSubtree {
                parent_id: parent_id.clone(),
            });
        }

        if self.cleanup_needed {
            self.sweep()?;
        }

        for node in self.nodes.values_mut() {
            node.sort_children();
        }

        self.recompute()
    }

    fn sweep(&mut self) -> CoreResult<()> {
        let removed: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.removed)
            .map(|n| n.entity_id.clone())
            .collect();

        for id in &removed {
            let node = &self.nodes[id];
            for child in &node.child_set {
                if self.nodes.get(child).is_some_and(|c| !c.removed) {
                    return Err(CoreError::TombstoneWithChildren {
                        entity_id: id.clone(),
                    });
                }
            }
        }

        for id in &removed {
            let parent_id = self.nodes[id].parent_id.clone();
            self.nodes.remove(id);
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.remove_child(id);
            }
        }

        self.cleanup_needed = false;
        Ok(())
    }

    fn recompute(&mut self) -> CoreResult<String> {
        enum Frame {
            Enter(String),
            Exit(String),
        }

        let mut stack = vec![Frame::Enter(String::new())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    let node = self.nodes.get(&id).ok_or_else(|| {
                        CoreError::protocol(format!("hash tree lost node '{id}'"))
                    })?;
                    if !node.outdated && node.hash.is_some() {
                        continue;
                    }
                    stack.push(Frame::Exit(id.clone()));
                    for child in &node.ordered_children {
                        stack.push(Frame::Enter(child.clone()));
                    }
                }
                Frame::Exit(id) => {
                    let node = &self.nodes[&id];
                    let mut payload = node.entity_data_hash.clone();
                    for child_id in node.ordered_children.clone() {
                        let child_hash = self
                            .nodes
                            .get(&child_id)
                            .and_then(|c| c.hash.clone())
                            .ok_or_else(|| {
                                CoreError::protocol(format!(
                                    "hash tree child '{child_id}' has no hash"
                                ))
                            })?;
                        payload.push_str(&child_hash);
                    }
                    let digest = sha256_hex(payload.as_bytes());
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.hash = Some(digest);
                        node.outdated = false;
                    }
                }
            }
        }

        self.nodes
            .get("")
            .and_then(|root| root.hash.clone())
            .ok_or_else(|| CoreError::protocol("super-root hash missing after recompute"))
    }

    /// Applies a delta's tree effects and returns the new root hash.
    ///
    /// The store must already hold the post-delta state; created and
    /// updated entities are re-serialized from it.
    pub fn update_from_delta(
        &mut self,
        store: &EntityStore,
        delta: &Delta,
    ) -> CoreResult<String> {
        for change in delta {
            match change.kind() {
                ChangeKind::Empty => {}
                ChangeKind::Create | ChangeKind::Update => {
                    let entity = store.get(change.entity_id()).ok_or_else(|| {
                        CoreError::EntityNotFound {
                            entity_id: change.entity_id().to_string(),
                        }
                    })?;
                    let hash = Self::entity_hash(&entity)?;
                    if change.kind() == ChangeKind::Create {
                        self.insert(entity.id(), entity.parent_id(), hash)?;
                    } else {
                        self.update(entity.id(), entity.parent_id(), hash)?;
                    }
                }
                ChangeKind::Delete => self.remove(change.entity_id())?,
            }
        }
        self.update_root_hash()
    }

    /// Builds a fresh tree from a store snapshot.
    ///
    /// Used to verify incrementally maintained digests: the rebuilt
    /// tree's root hash must equal the incremental one.
    pub fn build_from_store(store: &EntityStore) -> CoreResult<Self> {
        let mut tree = Self::new();
        for entity in store.iter() {
            let hash = Self::entity_hash(&entity)?;
            tree.insert(entity.id(), entity.parent_id(), hash)?;
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_hash(seed: &str) -> String {
        sha256_hex(seed.as_bytes())
    }

    #[test]
    fn empty_tree_digest_is_stable() {
        let mut tree = HashTree::new();
        assert_eq!(tree.update_root_hash().unwrap(), HashTree::empty_root_hash());
    }

    #[test]
    fn digest_changes_with_inserts() {
        let mut tree = HashTree::new();
        let empty = tree.update_root_hash().unwrap();

        tree.insert("p1", "", data_hash("p1")).unwrap();
        let one = tree.update_root_hash().unwrap();
        assert_ne!(one, empty);

        tree.insert("n1", "p1", data_hash("n1")).unwrap();
        let two = tree.update_root_hash().unwrap();
        assert_ne!(two, one);
    }

    #[test]
    fn digest_is_insertion_order_independent() {
        let mut a = HashTree::new();
        a.insert("p1", "", data_hash("p1")).unwrap();
        a.insert("n1", "p1", data_hash("n1")).unwrap();
        a.insert("n2", "p1", data_hash("n2")).unwrap();

        let mut b = HashTree::new();
        b.insert("n2", "p1", data_hash("n2")).unwrap();
        b.insert("n1", "p1", data_hash("n1")).unwrap();
        b.insert("p1", "", data_hash("p1")).unwrap();

        assert_eq!(a.update_root_hash().unwrap(), b.update_root_hash().unwrap());
    }

    #[test]
    fn staged_children_attach_when_parent_arrives() {
        let mut tree = HashTree::new();
        tree.insert("n1", "p1", data_hash("n1")).unwrap();

        // Hashing now would see an orphan subtree.
        assert!(matches!(
            tree.update_root_hash(),
            Err(CoreError::OrphanSubtree { .. })
        ));

        tree.insert("p1", "", data_hash("p1")).unwrap();
        assert!(tree.update_root_hash().is_ok());
        assert!(tree.contains("n1"));
    }

    #[test]
    fn remove_restores_previous_digest() {
        let mut tree = HashTree::new();
        tree.insert("p1", "", data_hash("p1")).unwrap();
        let before = tree.update_root_hash().unwrap();

        tree.insert("n1", "p1", data_hash("n1")).unwrap();
        tree.update_root_hash().unwrap();

        tree.remove("n1").unwrap();
        assert_eq!(tree.update_root_hash().unwrap(), before);
    }

    #[test]
    fn tombstone_with_live_children_is_an_error() {
        let mut tree = HashTree::new();
        tree.insert("p1", "", data_hash("p1")).unwrap();
        tree.insert("n1", "p1", data_hash("n1")).unwrap();

        tree.remove("p1").unwrap();
        assert!(matches!(
            tree.update_root_hash(),
            Err(CoreError::TombstoneWithChildren { .. })
        ));
    }

    #[test]
    fn removing_parent_and_children_together_is_fine() {
        let mut tree = HashTree::new();
        let empty = tree.update_root_hash().unwrap();
        tree.insert("p1", "", data_hash("p1")).unwrap();
        tree.insert("n1", "p1", data_hash("n1")).unwrap();
        tree.update_root_hash().unwrap();

        tree.remove("n1").unwrap();
        tree.remove("p1").unwrap();
        assert_eq!(tree.update_root_hash().unwrap(), empty);
    }

    #[test]
    fn update_rehashes_node() {
        let mut tree = HashTree::new();
        tree.insert("p1", "", data_hash("a")).unwrap();
        let before = tree.update_root_hash().unwrap();

        tree.update("p1", "", data_hash("b")).unwrap();
        let after = tree.update_root_hash().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn update_moves_reparented_nodes() {
        let mut tree = HashTree::new();
        tree.insert("p1", "", data_hash("p1")).unwrap();
        tree.insert("p2", "", data_hash("p2")).unwrap();
        tree.insert("n1", "p1", data_hash("n1")).unwrap();
        tree.update_root_hash().unwrap();

        tree.update("n1", "p2", data_hash("n1")).unwrap();
        tree.update_root_hash().unwrap();

        // An equivalent tree built directly must agree.
        let mut expected = HashTree::new();
        expected.insert("p1", "", data_hash("p1")).unwrap();
        expected.insert("p2", "", data_hash("p2")).unwrap();
        expected.insert("n1", "p2", data_hash("n1")).unwrap();
        assert_eq!(
            tree.update_root_hash().unwrap(),
            expected.update_root_hash().unwrap()
        );
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut tree = HashTree::new();
        tree.insert("p1", "", data_hash("p1")).unwrap();
        assert!(matches!(
            tree.insert("p1", "", data_hash("x")),
            Err(CoreError::DuplicateId { .. })
        ));
    }

    #[test]
    fn update_unknown_node_is_rejected() {
        let mut tree = HashTree::new();
        assert!(matches!(
            tree.update("ghost", "", data_hash("x")),
            Err(CoreError::EntityNotFound { .. })
        ));
    }
}
