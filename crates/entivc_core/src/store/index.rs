//! Index configurations and bucket maintenance.

use crate::entity::{Entity, EntityRegistry};
use crate::error::{CoreError, CoreResult};
use crate::store::Filter;
use serde_json::Value;
use std::collections::HashMap;

/// One field of an index key.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexField {
    /// A named entity property (`id`, `parent_id`, or a payload field).
    Property(String),
    /// The synthetic `__type__` field.
    ///
    /// The entity maps to the first whitelisted type it is an instance
    /// of; an entity matching none is not indexed by this config.
    Type {
        /// Whitelisted type names, in priority order.
        allowed_types: Vec<String>,
    },
}

/// Configuration of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Index name, unique within a store.
    pub name: String,
    /// Key fields, in key order.
    pub fields: Vec<IndexField>,
    /// Whether a key may hold at most one entity.
    pub unique: bool,
}

impl IndexConfig {
    /// The mandatory unique index over entity ids.
    #[must_use]
    pub fn id_index() -> Self {
        Self {
            name: "id".into(),
            fields: vec![IndexField::Property("id".into())],
            unique: true,
        }
    }

    /// Builds an index over named properties.
    #[must_use]
    pub fn property_index(name: impl Into<String>, fields: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .iter()
                .map(|f| IndexField::Property((*f).to_string()))
                .collect(),
            unique,
        }
    }

    /// Builds a `__type__` index with a type whitelist.
    #[must_use]
    pub fn type_index(name: impl Into<String>, allowed_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: vec![IndexField::Type {
                allowed_types: allowed_types.iter().map(|t| (*t).to_string()).collect(),
            }],
            unique: false,
        }
    }

    /// Returns true if this is a unique index over exactly `[id]`.
    #[must_use]
    pub fn is_id_index(&self) -> bool {
        self.unique
            && self.fields.len() == 1
            && matches!(&self.fields[0], IndexField::Property(p) if p == "id")
    }

    fn property_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| match f {
            IndexField::Property(p) => Some(p.as_str()),
            IndexField::Type { .. } => None,
        })
    }

    /// Returns true if an update touching `changed` (or switching the
    /// resolved type bucket) affects this index's keys.
    pub(crate) fn affected_by(
        &self,
        changed: &entivc_protocol::FieldMap,
        old: &Entity,
        new: &Entity,
        registry: &EntityRegistry,
    ) -> bool {
        if self.property_names().any(|p| changed.contains_key(p)) {
            return true;
        }
        self.fields.iter().any(|f| match f {
            IndexField::Type { allowed_types } => {
                resolve_type(old, allowed_types, registry)
                    != resolve_type(new, allowed_types, registry)
            }
            IndexField::Property(_) => false,
        })
    }
}

/// Maps an entity to the first whitelisted type it is an instance of.
fn resolve_type<'a>(
    entity: &Entity,
    allowed_types: &'a [String],
    registry: &EntityRegistry,
) -> Option<&'a str> {
    allowed_types
        .iter()
        .find(|t| registry.is_instance_of(entity.type_name(), t))
        .map(String::as_str)
}

/// Renders one value as a key component.
fn key_component(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One live index: a config plus its key buckets.
#[derive(Debug)]
pub(crate) struct Index {
    pub config: IndexConfig,
    buckets: HashMap<String, Vec<String>>,
}

impl Index {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
        }
    }

    /// Computes the key an entity files under, or `None` when a field
    /// is absent or no whitelisted type matches.
    pub fn key_for(&self, entity: &Entity, registry: &EntityRegistry) -> Option<String> {
        let mut components = Vec::with_capacity(self.config.fields.len());
        for field in &self.config.fields {
            match field {
                IndexField::Property(name) => {
                    components.push(key_component(&entity.property(name)?));
                }
                IndexField::Type { allowed_types } => {
                    components.push(resolve_type(entity, allowed_types, registry)?.to_string());
                }
            }
        }
        Some(components.join("|"))
    }

    /// Computes the lookup key for a filter, or `None` when the filter
    /// does not cover every field.
    ///
    /// A `__type__` field is covered only when the filter's type
    /// strictly equals one of the whitelisted names.
    pub fn key_for_filter(&self, filter: &Filter) -> Option<String> {
        let mut components = Vec::with_capacity(self.config.fields.len());
        for field in &self.config.fields {
            match field {
                IndexField::Property(name) => {
                    components.push(key_component(filter.field(name)?));
                }
                IndexField::Type { allowed_types } => {
                    let wanted = filter.type_name()?;
                    if !allowed_types.iter().any(|t| t == wanted) {
                        return None;
                    }
                    components.push(wanted.to_string());
                }
            }
        }
        Some(components.join("|"))
    }

    /// Estimated result size of a key lookup.
    pub fn selectivity(&self, key: &str) -> usize {
        match self.buckets.get(key) {
            None => 0,
            Some(bucket) if self.config.unique => usize::from(!bucket.is_empty()),
            Some(bucket) => bucket.len(),
        }
    }

    pub fn ids(&self, key: &str) -> &[String] {
        self.buckets.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.buckets.values().flatten()
    }

    /// Returns the id already holding a key on a unique index.
    pub fn unique_holder(&self, key: &str) -> Option<&str> {
        if !self.config.unique {
            return None;
        }
        self.buckets
            .get(key)
            .and_then(|b| b.first())
            .map(String::as_str)
    }

    pub fn insert(&mut self, key: String, entity_id: &str) {
        self.buckets
            .entry(key)
            .or_default()
            .push(entity_id.to_string());
    }

    pub fn remove(&mut self, key: &str, entity_id: &str) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.retain(|id| id != entity_id);
            if bucket.is_empty() {
                self.buckets.remove(key);
            }
        }
    }
}
