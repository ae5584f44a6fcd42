//! Property-based coverage of the serialization and delta algebra
//! round trips.

use entivc_core::{Change, Delta, Entity, EntityStore, IndexConfig};
use entivc_testkit::{delta_of_creates_strategy, field_map_strategy, test_registry};
use proptest::prelude::*;

fn entity_from_fields(fields: Vec<(String, serde_json::Value)>) -> Entity {
    let mut entity = Entity::with_id("Page", "p1");
    for (key, value) in fields {
        entity.set_field(key, value);
    }
    entity
}

proptest! {
    #[test]
    fn serialized_entities_round_trip(fields in field_map_strategy()) {
        let registry = test_registry();
        let entity = entity_from_fields(fields);

        let once = Entity::from_dict(&entity.to_dict(), &registry).unwrap();
        let twice = Entity::from_dict(&once.to_dict(), &registry).unwrap();

        prop_assert_eq!(&once, &entity);
        prop_assert_eq!(&twice, &once);
    }

    #[test]
    fn change_reversal_is_involutive(
        old_fields in field_map_strategy(),
        new_fields in field_map_strategy(),
    ) {
        let old = entity_from_fields(old_fields);
        let new = entity_from_fields(new_fields);

        let change = Change::update(&old, &new).unwrap();
        prop_assert_eq!(change.reversed().reversed(), change);
    }

    #[test]
    fn applying_a_change_and_its_reverse_is_a_no_op(
        old_fields in field_map_strategy(),
        new_fields in field_map_strategy(),
    ) {
        let registry = test_registry();
        let mut store =
            EntityStore::new(registry, vec![IndexConfig::id_index()]).unwrap();

        let old = entity_from_fields(old_fields);
        let new = entity_from_fields(new_fields);
        store.insert_one(old.clone()).unwrap();

        let change = Change::update(&old, &new).unwrap();
        store.apply_delta(&Delta::from_changes([change.clone()]).unwrap()).unwrap();
        store.apply_delta(&Delta::from_changes([change.reversed()]).unwrap()).unwrap();

        prop_assert_eq!(store.get("p1").unwrap(), old);
    }

    #[test]
    fn squish_of_delta_and_reverse_is_a_state_no_op(delta in delta_of_creates_strategy()) {
        let registry = test_registry();
        let mut store =
            EntityStore::new(registry, vec![IndexConfig::id_index()]).unwrap();

        let net = Delta::squish([delta.clone(), delta.reversed()]).unwrap();
        store.apply_delta(&net).unwrap();

        prop_assert!(store.is_empty());
    }

    #[test]
    fn delta_reversal_round_trips_through_storage(delta in delta_of_creates_strategy()) {
        let decoded = Delta::from_data(&delta.to_data()).unwrap();
        prop_assert_eq!(&decoded, &delta);
        prop_assert_eq!(decoded.reversed().reversed(), delta);
    }
}
