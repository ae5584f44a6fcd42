//! Property-based test generators using proptest.

use entivc_core::{Change, Delta, Entity};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for scalar payload values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z0-9 ]{0,16}".prop_map(Value::from),
    ]
}

/// Strategy for flat field maps with lowercase keys.
pub fn field_map_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(("[a-z]{1,8}", scalar_strategy()), 0..5)
}

/// Strategy for deltas that create distinct root-parented pages.
///
/// Entity ids are derived from the index, so every generated delta is
/// internally consistent.
pub fn delta_of_creates_strategy() -> impl Strategy<Value = Delta> {
    prop::collection::vec(field_map_strategy(), 1..6).prop_map(|entities| {
        let changes = entities.into_iter().enumerate().map(|(i, fields)| {
            let mut entity = Entity::with_id("Page", format!("page{i}"));
            for (key, value) in fields {
                entity.set_field(key, value);
            }
            Change::create(&entity)
        });
        Delta::from_changes(changes).expect("distinct ids cannot be irrational")
    })
}
