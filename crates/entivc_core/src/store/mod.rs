//! Indexed in-memory entity store.
//!
//! The store holds the head state of a branch: every entity after
//! applying the branch's commits to the empty state. Mutations return
//! the [`Change`] they caused; reads hand out deep copies, so no
//! mutation is observable without going back through the store.

mod index;

pub use index::{IndexConfig, IndexField};

use crate::canonical::{deep_equal, validate_field_map, validate_value_depth};
use crate::change::Change;
use crate::delta::Delta;
use crate::entity::{Entity, EntityRegistry, TYPE_NAME_KEY};
use crate::error::{CoreError, CoreResult};
use index::Index;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// An equality filter over entity properties.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    type_name: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl Filter {
    /// Creates an empty filter matching every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters on the entity id.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_field("id", Value::String(id.into()))
    }

    /// Filters on the exact type name.
    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Filters on a property value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the required type name, if any.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Returns the required value for a property, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the property constraints.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

/// The indexed entity store.
pub struct EntityStore {
    registry: Arc<EntityRegistry>,
    entities: HashMap<String, Entity>,
    indexes: Vec<Index>,
    id_index: usize,
}

impl EntityStore {
    /// Creates a store with the given index configurations.
    ///
    /// The configuration must contain a unique index over `[id]`; index
    /// names must be unique.
    pub fn new(registry: Arc<EntityRegistry>, configs: Vec<IndexConfig>) -> CoreResult<Self> {
        let id_index = configs
            .iter()
            .position(IndexConfig::is_id_index)
            .ok_or_else(|| {
                CoreError::config_mismatch("store requires a unique index over [id]")
            })?;

        for (i, config) in configs.iter().enumerate() {
            if configs[..i].iter().any(|c| c.name == config.name) {
                return Err(CoreError::config_mismatch(format!(
                    "duplicate index name '{}'",
                    config.name
                )));
            }
        }

        Ok(Self {
            registry,
            entities: HashMap::new(),
            indexes: configs.into_iter().map(Index::new).collect(),
            id_index,
        })
    }

    /// Returns the type registry the store validates against.
    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns true if an entity with the id is live.
    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    /// Returns a deep copy of an entity by id.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<Entity> {
        self.entities.get(entity_id).cloned()
    }

    /// Iterates deep copies of every live entity.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.values().cloned()
    }

    /// Inserts an entity, returning the CREATE change.
    pub fn insert_one(&mut self, entity: Entity) -> CoreResult<Change> {
        if entity.id().is_empty() {
            return Err(CoreError::invalid_entity("entity id must not be empty"));
        }
        if !self.registry.is_registered(entity.type_name()) {
            return Err(CoreError::UnknownEntityType {
                type_name: entity.type_name().to_string(),
            });
        }
        validate_field_map(entity.fields())?;
        if self.entities.contains_key(entity.id()) {
            return Err(CoreError::DuplicateId {
                entity_id: entity.id().to_string(),
            });
        }

        let keys: Vec<Option<String>> = self
            .indexes
            .iter()
            .map(|index| index.key_for(&entity, &self.registry))
            .collect();

        for (index, key) in self.indexes.iter().zip(&keys) {
            if let Some(key) = key {
                if index.unique_holder(key).is_some() {
                    return Err(CoreError::UniqueIndexViolation {
                        index: index.config.name.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        for (index, key) in self.indexes.iter_mut().zip(keys) {
            if let Some(key) = key {
                index.insert(key, entity.id());
            }
        }

        let change = Change::create(&entity);
        self.entities.insert(entity.id().to_string(), entity);
        Ok(change)
    }

    /// Replaces an entity's state, returning the UPDATE change.
    ///
    /// Only indexes whose fields intersect the changed set (or whose
    /// resolved type bucket moved) are re-keyed.
    pub fn update_one(&mut self, entity: Entity) -> CoreResult<Change> {
        validate_field_map(entity.fields())?;
        let old = self
            .entities
            .get(entity.id())
            .ok_or_else(|| CoreError::EntityNotFound {
                entity_id: entity.id().to_string(),
            })?
            .clone();

        if !self.registry.is_registered(entity.type_name()) {
            return Err(CoreError::UnknownEntityType {
                type_name: entity.type_name().to_string(),
            });
        }

        let change = Change::update(&old, &entity)?;
        if change.is_empty() {
            return Ok(change);
        }

        // (affected, old_key, new_key) per index.
        let rekeys: Vec<Option<(Option<String>, Option<String>)>> = self
            .indexes
            .iter()
            .map(|index| {
                if index
                    .config
                    .affected_by(change.forward(), &old, &entity, &self.registry)
                {
                    Some((
                        index.key_for(&old, &self.registry),
                        index.key_for(&entity, &self.registry),
                    ))
                } else {
                    None
                }
            })
            .collect();

        for (index, rekey) in self.indexes.iter().zip(&rekeys) {
            if let Some((old_key, Some(new_key))) = rekey {
                if old_key.as_ref() != Some(new_key) {
                    if let Some(holder) = index.unique_holder(new_key) {
                        if holder != entity.id() {
                            return Err(CoreError::UniqueIndexViolation {
                                index: index.config.name.clone(),
                                key: new_key.clone(),
                            });
                        }
                    }
                }
            }
        }

        for (index, rekey) in self.indexes.iter_mut().zip(rekeys) {
            if let Some((old_key, new_key)) = rekey {
                if old_key == new_key {
                    continue;
                }
                if let Some(old_key) = old_key {
                    index.remove(&old_key, entity.id());
                }
                if let Some(new_key) = new_key {
                    index.insert(new_key, entity.id());
                }
            }
        }

        self.entities.insert(entity.id().to_string(), entity);
        Ok(change)
    }

    /// Removes an entity by id, returning the DELETE change.
    pub fn remove_one(&mut self, entity_id: &str) -> CoreResult<Change> {
        let entity = self
            .entities
            .remove(entity_id)
            .ok_or_else(|| CoreError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })?;

        for index in &mut self.indexes {
            if let Some(key) = index.key_for(&entity, &self.registry) {
                index.remove(&key, entity_id);
            }
        }

        Ok(Change::delete(&entity))
    }

    /// Finds entities matching the filter.
    ///
    /// The planner picks the covered index with the lowest estimated
    /// selectivity and falls back to a full scan over the id index.
    /// Matches are yielded lazily as deep copies.
    pub fn find<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> CoreResult<impl Iterator<Item = Entity> + 'a> {
        for value in filter.fields().values() {
            validate_value_depth(value, 1)?;
        }

        let candidates = self.plan(filter);
        Ok(candidates.into_iter().filter_map(move |id| {
            let entity = self.entities.get(&id)?;
            self.matches(entity, filter).then(|| entity.clone())
        }))
    }

    /// Returns the first entity matching the filter, if any.
    pub fn find_one(&self, filter: &Filter) -> CoreResult<Option<Entity>> {
        Ok(self.find(filter)?.next())
    }

    /// Picks candidate ids via the best covered index.
    fn plan(&self, filter: &Filter) -> Vec<String> {
        let mut best: Option<(usize, String, usize)> = None;
        for (pos, index) in self.indexes.iter().enumerate() {
            if let Some(key) = index.key_for_filter(filter) {
                let selectivity = index.selectivity(&key);
                let better = match &best {
                    None => true,
                    Some((_, _, current)) => selectivity < *current,
                };
                if better {
                    best = Some((pos, key, selectivity));
                }
            }
        }

        match best {
            Some((pos, key, _)) => {
                debug!(index = %self.indexes[pos].config.name, "index lookup");
                self.indexes[pos].ids(&key).to_vec()
            }
            None => {
                debug!("full scan over the id index");
                self.indexes[self.id_index]
                    .all_ids()
                    .cloned()
                    .collect()
            }
        }
    }

    /// Applies the full filter to an entity.
    ///
    /// The type constraint is strict name equality. Values were depth
    /// validated on the way in, so comparison cannot overflow.
    fn matches(&self, entity: &Entity, filter: &Filter) -> bool {
        if let Some(type_name) = filter.type_name() {
            if entity.type_name() != type_name {
                return false;
            }
        }
        filter.fields().iter().all(|(name, wanted)| {
            if name == TYPE_NAME_KEY {
                return entity.type_name() == wanted.as_str().unwrap_or_default();
            }
            let live = entity.property(name);
            deep_equal(live.as_ref(), Some(wanted)).unwrap_or(false)
        })
    }

    /// Materializes a delta against the current store state.
    ///
    /// Applied changes are rolled back if a later change fails, so the
    /// store is untouched on error.
    pub fn apply_delta(&mut self, delta: &Delta) -> CoreResult<Vec<Change>> {
        let mut applied = Vec::with_capacity(delta.len());
        for change in delta {
            match self.apply_change(change) {
                Ok(applied_change) => applied.push(applied_change),
                Err(e) => {
                    for done in applied.iter().rev() {
                        let _ = self.apply_change(&done.reversed());
                    }
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    fn apply_change(&mut self, change: &Change) -> CoreResult<Change> {
        match change.kind() {
            crate::change::ChangeKind::Empty => Ok(change.clone()),
            crate::change::ChangeKind::Create => {
                let entity = Entity::from_dict(change.forward(), &self.registry)?;
                self.insert_one(entity)
            }
            crate::change::ChangeKind::Update => {
                let mut entity = self.get(change.entity_id()).ok_or_else(|| {
                    CoreError::EntityNotFound {
                        entity_id: change.entity_id().to_string(),
                    }
                })?;
                entity.apply_fields(change.forward())?;
                self.update_one(entity)
            }
            crate::change::ChangeKind::Delete => self.remove_one(change.entity_id()),
        }
    }
}
