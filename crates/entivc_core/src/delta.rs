//! Deltas: ordered collections of changes, one per entity.

use crate::change::Change;
use crate::error::{CoreError, CoreResult};
use entivc_protocol::DeltaData;
use std::collections::HashMap;

/// An ordered collection of changes keyed by entity id.
///
/// Order is insertion order; reversal emits changes in reverse order.
/// At most one change exists per entity: adding a second change for an
/// id merges it through the change algebra.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    changes: Vec<Change>,
}

impl Delta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a delta by folding changes in input order.
    ///
    /// Surfaces an error on the first irrational sequence.
    pub fn from_changes(changes: impl IntoIterator<Item = Change>) -> CoreResult<Self> {
        let mut delta = Self::new();
        for change in changes {
            delta.merge_change(change)?;
        }
        Ok(delta)
    }

    /// Merges one change into the delta.
    ///
    /// A change for a new entity is appended; a change for an entity
    /// already present is merged in place, keeping the original
    /// position. A pair that cancels out removes the entry.
    pub fn merge_change(&mut self, change: Change) -> CoreResult<()> {
        match self
            .changes
            .iter()
            .position(|c| c.entity_id() == change.entity_id())
        {
            None => self.changes.push(change),
            Some(pos) => match self.changes[pos].merge(&change)? {
                Some(merged) => self.changes[pos] = merged,
                None => {
                    self.changes.remove(pos);
                }
            },
        }
        Ok(())
    }

    /// Returns the change for an entity, if present.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.entity_id() == entity_id)
    }

    /// Iterates changes in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Returns the number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the delta holds no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the delta that undoes this one: every change inverted,
    /// in reverse order.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            changes: self.changes.iter().rev().map(Change::reversed).collect(),
        }
    }

    /// Folds a sequence of deltas into one equivalent delta.
    pub fn squish(deltas: impl IntoIterator<Item = Delta>) -> CoreResult<Self> {
        let mut result = Self::new();
        for delta in deltas {
            for change in delta.changes {
                result.merge_change(change)?;
            }
        }
        Ok(result)
    }

    /// Converts to the serialized record form.
    #[must_use]
    pub fn to_data(&self) -> DeltaData {
        self.changes.iter().map(Change::to_data).collect()
    }

    /// Rebuilds a delta from its serialized record form.
    ///
    /// Stored deltas are already merged, so entries are taken as-is;
    /// a duplicate entity id marks the record as malformed.
    pub fn from_data(data: &DeltaData) -> CoreResult<Self> {
        let mut seen: HashMap<&str, ()> = HashMap::with_capacity(data.len());
        let mut changes = Vec::with_capacity(data.len());
        for record in data {
            if seen.insert(record.entity_id.as_str(), ()).is_some() {
                return Err(CoreError::protocol(format!(
                    "delta data holds two changes for entity '{}'",
                    record.entity_id
                )));
            }
            changes.push(Change::from_data(record));
        }
        Ok(Self { changes })
    }
}

impl<'a> IntoIterator for &'a Delta {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
