//! Entity type registry.
//!
//! Type names are registered once at process start and resolved during
//! deserialization. A registered type may name a parent type, which
//! gives `__type__` indexes an instance-of relation to bucket by.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Registry of entity type names.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    types: RwLock<HashMap<String, Option<String>>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a root type.
    pub fn register(&self, name: &str) -> CoreResult<()> {
        self.register_inner(name, None)
    }

    /// Registers a type with a parent type.
    ///
    /// The parent must already be registered.
    pub fn register_subtype(&self, name: &str, parent: &str) -> CoreResult<()> {
        if !self.is_registered(parent) {
            return Err(CoreError::UnknownEntityType {
                type_name: parent.to_string(),
            });
        }
        self.register_inner(name, Some(parent.to_string()))
    }

    fn register_inner(&self, name: &str, parent: Option<String>) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::invalid_entity("type name must not be empty"));
        }
        let mut types = self.types.write();
        if types.contains_key(name) {
            return Err(CoreError::DuplicateType {
                type_name: name.to_string(),
            });
        }
        types.insert(name.to_string(), parent);
        Ok(())
    }

    /// Returns true if the type name is registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Returns true if `type_name` is `candidate` or inherits from it.
    #[must_use]
    pub fn is_instance_of(&self, type_name: &str, candidate: &str) -> bool {
        let types = self.types.read();
        let mut current = type_name;
        loop {
            if current == candidate {
                return true;
            }
            match types.get(current) {
                Some(Some(parent)) => current = parent,
                _ => return false,
            }
        }
    }
}
