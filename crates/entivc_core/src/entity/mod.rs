//! Entity records.
//!
//! An entity is a record with an immutable string id, a parent id
//! (empty for root-parented entities), a registered type name, and a
//! payload of named fields. Identity is the id; equality is id plus
//! serialized payload.

mod registry;

pub use registry::EntityRegistry;

use crate::canonical::validate_value_depth;
use crate::error::{CoreError, CoreResult};
use entivc_protocol::{new_id, FieldMap};
use serde_json::Value;

/// Serialized-form key of the entity id.
pub const ID_KEY: &str = "id";
/// Serialized-form key of the parent id.
pub const PARENT_ID_KEY: &str = "parent_id";
/// Serialized-form key of the type name.
pub const TYPE_NAME_KEY: &str = "type_name";

/// A typed entity record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: String,
    parent_id: String,
    type_name: String,
    fields: FieldMap,
}

impl Entity {
    /// Creates a root-parented entity with a fresh id.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            parent_id: String::new(),
            type_name: type_name.into(),
            fields: FieldMap::new(),
        }
    }

    /// Creates an entity with an explicit id.
    #[must_use]
    pub fn with_id(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: String::new(),
            type_name: type_name.into(),
            fields: FieldMap::new(),
        }
    }

    /// Sets the parent id, builder-style.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    /// Sets a payload field, builder-style.
    ///
    /// Null values are dropped; an absent field and a null field are the
    /// same thing in the serialized form.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Returns the entity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the parent entity id, empty for root-parented entities.
    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Returns the registered type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the payload fields.
    #[must_use]
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Returns a payload field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets or removes a payload field.
    ///
    /// A null value removes the field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if value.is_null() {
            self.fields.remove(&name);
        } else {
            self.fields.insert(name, value);
        }
    }

    /// Sets the parent id.
    pub fn set_parent_id(&mut self, parent_id: impl Into<String>) {
        self.parent_id = parent_id.into();
    }

    /// Returns a named property: `id`, `parent_id`, `type_name`, or a
    /// payload field.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        match name {
            ID_KEY => Some(Value::String(self.id.clone())),
            PARENT_ID_KEY => Some(Value::String(self.parent_id.clone())),
            TYPE_NAME_KEY => Some(Value::String(self.type_name.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Returns the serialized form: payload fields plus the `id`,
    /// `parent_id` and `type_name` keys.
    #[must_use]
    pub fn to_dict(&self) -> FieldMap {
        let mut dict = self.fields.clone();
        dict.insert(ID_KEY.into(), Value::String(self.id.clone()));
        dict.insert(PARENT_ID_KEY.into(), Value::String(self.parent_id.clone()));
        dict.insert(TYPE_NAME_KEY.into(), Value::String(self.type_name.clone()));
        dict
    }

    /// Rebuilds an entity from its serialized form.
    ///
    /// The type name must be registered. Null field values are dropped.
    pub fn from_dict(dict: &FieldMap, registry: &EntityRegistry) -> CoreResult<Self> {
        let id = match dict.get(ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(CoreError::invalid_entity("missing or empty id")),
        };
        let parent_id = match dict.get(PARENT_ID_KEY) {
            Some(Value::String(p)) => p.clone(),
            None => String::new(),
            Some(_) => return Err(CoreError::invalid_entity("parent_id must be a string")),
        };
        let type_name = match dict.get(TYPE_NAME_KEY) {
            Some(Value::String(t)) => t.clone(),
            Some(_) => return Err(CoreError::NonStringTypeName),
            None => return Err(CoreError::invalid_entity("missing type_name")),
        };
        if !registry.is_registered(&type_name) {
            return Err(CoreError::UnknownEntityType { type_name });
        }

        let mut fields = FieldMap::new();
        for (key, value) in dict {
            if key == ID_KEY || key == PARENT_ID_KEY || key == TYPE_NAME_KEY {
                continue;
            }
            if value.is_null() {
                continue;
            }
            validate_value_depth(value, 1)?;
            fields.insert(key.clone(), value.clone());
        }

        Ok(Self {
            id,
            parent_id,
            type_name,
            fields,
        })
    }

    /// Overlays a change's field map onto this entity.
    ///
    /// An `id` key must match the current id; a null value removes the
    /// field.
    pub fn apply_fields(&mut self, map: &FieldMap) -> CoreResult<()> {
        for (key, value) in map {
            match key.as_str() {
                ID_KEY => match value {
                    Value::String(id) if id == &self.id => {}
                    _ => {
                        return Err(CoreError::ImmutableId {
                            entity_id: self.id.clone(),
                        })
                    }
                },
                PARENT_ID_KEY => match value {
                    Value::String(p) => self.parent_id = p.clone(),
                    Value::Null => self.parent_id = String::new(),
                    _ => return Err(CoreError::invalid_entity("parent_id must be a string")),
                },
                TYPE_NAME_KEY => match value {
                    Value::String(t) => self.type_name = t.clone(),
                    _ => return Err(CoreError::NonStringTypeName),
                },
                _ => {
                    if value.is_null() {
                        self.fields.remove(key);
                    } else {
                        validate_value_depth(value, 1)?;
                        self.fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}
