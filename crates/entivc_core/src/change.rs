//! Per-entity changes and the merge-with-priority algebra.
//!
//! A change holds two field maps: `reverse` (values before) and
//! `forward` (values after). The maps classify the change: both empty
//! is EMPTY, only forward is CREATE, only reverse is DELETE, both is
//! UPDATE. Merging two changes for the same entity produces a change
//! equivalent to applying the first then the second.

use crate::canonical::deep_equal;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use entivc_protocol::{ChangeData, FieldMap};
use serde_json::Value;
use std::fmt;

/// Classification of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Neither map set; applying it does nothing.
    Empty,
    /// Entity comes into existence; forward is the full serialized form.
    Create,
    /// Fields change; both maps hold only the changed fields.
    Update,
    /// Entity disappears; reverse is the full serialized form.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Empty => "EMPTY",
            ChangeKind::Create => "CREATE",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A change to a single entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    entity_id: String,
    reverse: FieldMap,
    forward: FieldMap,
}

impl Change {
    /// Builds a CREATE change from an entity's serialized form.
    #[must_use]
    pub fn create(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id().to_string(),
            reverse: FieldMap::new(),
            forward: entity.to_dict(),
        }
    }

    /// Builds a DELETE change from an entity's serialized form.
    #[must_use]
    pub fn delete(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id().to_string(),
            reverse: entity.to_dict(),
            forward: FieldMap::new(),
        }
    }

    /// Builds an UPDATE change by diffing two states of one entity.
    ///
    /// Only fields that actually changed (deep-equal to the depth cap)
    /// land in the maps. A field absent on one side is recorded as null
    /// on that side, so reversal restores absence exactly. Diffing two
    /// equal states yields an EMPTY change.
    pub fn update(old: &Entity, new: &Entity) -> CoreResult<Self> {
        if old.id() != new.id() {
            return Err(CoreError::ImmutableId {
                entity_id: old.id().to_string(),
            });
        }

        let old_dict = old.to_dict();
        let new_dict = new.to_dict();
        let mut reverse = FieldMap::new();
        let mut forward = FieldMap::new();

        let mut keys: Vec<&String> = old_dict.keys().collect();
        for key in new_dict.keys() {
            if !old_dict.contains_key(key) {
                keys.push(key);
            }
        }

        for key in keys {
            let old_val = old_dict.get(key);
            let new_val = new_dict.get(key);
            if !deep_equal(old_val, new_val)? {
                reverse.insert(key.clone(), old_val.cloned().unwrap_or(Value::Null));
                forward.insert(key.clone(), new_val.cloned().unwrap_or(Value::Null));
            }
        }

        Ok(Self {
            entity_id: old.id().to_string(),
            reverse,
            forward,
        })
    }

    /// Builds an EMPTY change.
    #[must_use]
    pub fn empty(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            reverse: FieldMap::new(),
            forward: FieldMap::new(),
        }
    }

    /// Builds a change from raw field maps.
    #[must_use]
    pub fn from_maps(entity_id: impl Into<String>, reverse: FieldMap, forward: FieldMap) -> Self {
        Self {
            entity_id: entity_id.into(),
            reverse,
            forward,
        }
    }

    /// Returns the targeted entity id.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns the reverse field map.
    #[must_use]
    pub fn reverse(&self) -> &FieldMap {
        &self.reverse
    }

    /// Returns the forward field map.
    #[must_use]
    pub fn forward(&self) -> &FieldMap {
        &self.forward
    }

    /// Classifies the change by map emptiness.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match (self.reverse.is_empty(), self.forward.is_empty()) {
            (true, true) => ChangeKind::Empty,
            (true, false) => ChangeKind::Create,
            (false, true) => ChangeKind::Delete,
            (false, false) => ChangeKind::Update,
        }
    }

    /// Returns true for an EMPTY change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind() == ChangeKind::Empty
    }

    /// Swaps the two maps: CREATE becomes DELETE, UPDATE swaps its
    /// direction, EMPTY stays EMPTY.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            entity_id: self.entity_id.clone(),
            reverse: self.forward.clone(),
            forward: self.reverse.clone(),
        }
    }

    /// Merges a following change into this one.
    ///
    /// The result is equivalent to applying `self` then `next`. Returns
    /// `Ok(None)` when the pair cancels out (CREATE then DELETE).
    /// Sequences that cannot follow each other (CREATE then CREATE,
    /// UPDATE then CREATE, DELETE then UPDATE, DELETE then DELETE) are
    /// irrational and error.
    pub fn merge(&self, next: &Change) -> CoreResult<Option<Change>> {
        debug_assert_eq!(self.entity_id, next.entity_id);

        let first_kind = self.kind();
        let next_kind = next.kind();

        if next_kind == ChangeKind::Empty {
            return Ok(Some(if first_kind == ChangeKind::Empty {
                Change::empty(&self.entity_id)
            } else {
                self.clone()
            }));
        }
        if first_kind == ChangeKind::Empty {
            return Ok(Some(next.clone()));
        }

        let merged = match (first_kind, next_kind) {
            // Folding an update into a fresh entity keeps it a CREATE.
            (ChangeKind::Create, ChangeKind::Update) => Some(Change {
                entity_id: self.entity_id.clone(),
                reverse: FieldMap::new(),
                forward: overlay(&self.forward, &next.forward),
            }),
            (ChangeKind::Create, ChangeKind::Delete) => None,
            (ChangeKind::Update, ChangeKind::Update) => Some(Change {
                entity_id: self.entity_id.clone(),
                // Forward composes left to right (next wins); reverse
                // composes right to left (first wins).
                reverse: overlay(&next.reverse, &self.reverse),
                forward: overlay(&self.forward, &next.forward),
            }),
            (ChangeKind::Update, ChangeKind::Delete) => Some(Change {
                entity_id: self.entity_id.clone(),
                // The delete's reverse holds the post-first state;
                // overlaying the first update's reverse restores the
                // pre-first state.
                reverse: overlay(&next.reverse, &self.reverse),
                forward: FieldMap::new(),
            }),
            (ChangeKind::Delete, ChangeKind::Create) => Some(Change {
                entity_id: self.entity_id.clone(),
                reverse: self.reverse.clone(),
                forward: next.forward.clone(),
            }),
            (first, next_k) => {
                return Err(CoreError::IrrationalChange {
                    entity_id: self.entity_id.clone(),
                    first,
                    next: next_k,
                })
            }
        };
        Ok(merged)
    }

    /// Converts to the serialized record form.
    #[must_use]
    pub fn to_data(&self) -> ChangeData {
        ChangeData {
            entity_id: self.entity_id.clone(),
            reverse: self.reverse.clone(),
            forward: self.forward.clone(),
        }
    }

    /// Rebuilds a change from its serialized record form.
    #[must_use]
    pub fn from_data(data: &ChangeData) -> Self {
        Self {
            entity_id: data.entity_id.clone(),
            reverse: data.reverse.clone(),
            forward: data.forward.clone(),
        }
    }
}

/// Overlays `over` onto a copy of `base`; `over` wins per key.
fn overlay(base: &FieldMap, over: &FieldMap) -> FieldMap {
    let mut result = base.clone();
    for (key, value) in over {
        result.insert(key.clone(), value.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(id: &str, name: &str) -> Entity {
        Entity::with_id("Page", id).with_field("name", name)
    }

    #[test]
    fn classification() {
        let entity = page("p1", "a");
        assert_eq!(Change::create(&entity).kind(), ChangeKind::Create);
        assert_eq!(Change::delete(&entity).kind(), ChangeKind::Delete);
        assert_eq!(Change::empty("p1").kind(), ChangeKind::Empty);

        let update = Change::update(&entity, &page("p1", "b")).unwrap();
        assert_eq!(update.kind(), ChangeKind::Update);
    }

    #[test]
    fn update_diff_holds_only_changed_fields() {
        let old = page("p1", "a").with_field("body", "same");
        let new = page("p1", "b").with_field("body", "same");

        let change = Change::update(&old, &new).unwrap();
        assert_eq!(change.forward().len(), 1);
        assert_eq!(change.forward().get("name"), Some(&json!("b")));
        assert_eq!(change.reverse().get("name"), Some(&json!("a")));
    }

    #[test]
    fn update_diff_of_equal_states_is_empty() {
        let entity = page("p1", "a");
        let change = Change::update(&entity, &entity.clone()).unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn update_records_added_fields_with_null_reverse() {
        let old = page("p1", "a");
        let new = page("p1", "a").with_field("body", "text");

        let change = Change::update(&old, &new).unwrap();
        assert_eq!(change.forward().get("body"), Some(&json!("text")));
        assert_eq!(change.reverse().get("body"), Some(&Value::Null));
    }

    #[test]
    fn update_rejects_differing_ids() {
        let result = Change::update(&page("p1", "a"), &page("p2", "a"));
        assert!(matches!(result, Err(CoreError::ImmutableId { .. })));
    }

    #[test]
    fn reversal_is_involutive() {
        let change = Change::update(&page("p1", "a"), &page("p1", "b")).unwrap();
        assert_eq!(change.reversed().reversed(), change);

        let create = Change::create(&page("p1", "a"));
        assert_eq!(create.reversed().kind(), ChangeKind::Delete);
        assert_eq!(create.reversed().reversed(), create);
    }

    #[test]
    fn create_then_update_folds_into_create() {
        let create = Change::create(&page("p1", "a"));
        let update = Change::update(&page("p1", "a"), &page("p1", "b")).unwrap();

        let merged = create.merge(&update).unwrap().unwrap();
        assert_eq!(merged.kind(), ChangeKind::Create);
        assert_eq!(merged.forward().get("name"), Some(&json!("b")));
    }

    #[test]
    fn create_then_delete_cancels() {
        let create = Change::create(&page("p1", "a"));
        let delete = Change::delete(&page("p1", "a"));
        assert!(create.merge(&delete).unwrap().is_none());
    }

    #[test]
    fn update_then_update_merges_with_priority() {
        let a = page("p1", "a").with_field("body", "x");
        let b = page("p1", "b").with_field("body", "x");
        let c = page("p1", "b").with_field("body", "y");

        let first = Change::update(&a, &b).unwrap();
        let second = Change::update(&b, &c).unwrap();
        let merged = first.merge(&second).unwrap().unwrap();

        // Forward: next wins; here the key sets are disjoint.
        assert_eq!(merged.forward().get("name"), Some(&json!("b")));
        assert_eq!(merged.forward().get("body"), Some(&json!("y")));
        // Reverse: first wins, restoring the oldest pre-state.
        assert_eq!(merged.reverse().get("name"), Some(&json!("a")));
        assert_eq!(merged.reverse().get("body"), Some(&json!("x")));
    }

    #[test]
    fn update_then_update_same_key_keeps_oldest_reverse() {
        let a = page("p1", "a");
        let b = page("p1", "b");
        let c = page("p1", "c");

        let merged = Change::update(&a, &b)
            .unwrap()
            .merge(&Change::update(&b, &c).unwrap())
            .unwrap()
            .unwrap();

        assert_eq!(merged.forward().get("name"), Some(&json!("c")));
        assert_eq!(merged.reverse().get("name"), Some(&json!("a")));
    }

    #[test]
    fn update_then_delete_restores_pre_update_state() {
        let a = page("p1", "a");
        let b = page("p1", "b");

        let update = Change::update(&a, &b).unwrap();
        let delete = Change::delete(&b);
        let merged = update.merge(&delete).unwrap().unwrap();

        assert_eq!(merged.kind(), ChangeKind::Delete);
        // Reverse must be the pre-update serialized form.
        assert_eq!(merged.reverse(), &a.to_dict());
    }

    #[test]
    fn delete_then_create_promotes_to_update() {
        let a = page("p1", "a");
        let b = page("p1", "b");

        let merged = Change::delete(&a)
            .merge(&Change::create(&b))
            .unwrap()
            .unwrap();
        assert_eq!(merged.kind(), ChangeKind::Update);
        assert_eq!(merged.reverse(), &a.to_dict());
        assert_eq!(merged.forward(), &b.to_dict());
    }

    #[test]
    fn empty_neighbors_dissolve() {
        let update = Change::update(&page("p1", "a"), &page("p1", "b")).unwrap();
        let empty = Change::empty("p1");

        assert_eq!(update.merge(&empty).unwrap().unwrap(), update);
        assert_eq!(empty.merge(&update).unwrap().unwrap(), update);
        assert!(empty.merge(&Change::empty("p1")).unwrap().unwrap().is_empty());
    }

    #[test]
    fn irrational_sequences_error() {
        let entity = page("p1", "a");
        let create = Change::create(&entity);
        let update = Change::update(&entity, &page("p1", "b")).unwrap();
        let delete = Change::delete(&entity);

        assert!(matches!(
            create.merge(&create),
            Err(CoreError::IrrationalChange { .. })
        ));
        assert!(matches!(
            update.merge(&create),
            Err(CoreError::IrrationalChange { .. })
        ));
        assert!(matches!(
            delete.merge(&update),
            Err(CoreError::IrrationalChange { .. })
        ));
        assert!(matches!(
            delete.merge(&delete),
            Err(CoreError::IrrationalChange { .. })
        ));
    }
}
