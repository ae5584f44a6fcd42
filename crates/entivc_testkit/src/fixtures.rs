//! Test fixtures: registries, entities and wired repositories.

use entivc_core::{
    Entity, EntityRegistry, IndexConfig, Repository, RepositoryConfig,
};
use entivc_protocol::{reset_id_counter, set_deterministic_ids};
use entivc_storage::MemoryAdapter;
use std::sync::Arc;

/// Enables deterministic ids for the lifetime of the guard.
///
/// The id counter is process-wide; tests that assert on concrete id
/// values should hold one of these.
pub struct DeterministicIds;

impl DeterministicIds {
    /// Switches id generation to a zeroed counter.
    #[must_use]
    pub fn enable() -> Self {
        set_deterministic_ids(true);
        reset_id_counter();
        Self
    }
}

impl Drop for DeterministicIds {
    fn drop(&mut self) {
        set_deterministic_ids(false);
    }
}

/// A registry with the standard test types: `Page`, `Note` and the
/// `Note` subtype `TextNote`.
#[must_use]
pub fn test_registry() -> Arc<EntityRegistry> {
    let registry = EntityRegistry::new();
    registry.register("Page").expect("fresh registry");
    registry.register("Note").expect("fresh registry");
    registry
        .register_subtype("TextNote", "Note")
        .expect("fresh registry");
    Arc::new(registry)
}

/// A repository config on the given branch with the standard indexes:
/// unique `id`, `parent_id`, and a `__type__` index over Page/Note.
#[must_use]
pub fn test_config(branch: &str) -> RepositoryConfig {
    RepositoryConfig::new(branch)
        .with_index(IndexConfig::property_index("by_parent", &["parent_id"], false))
        .with_index(IndexConfig::type_index("by_type", &["Page", "Note"]))
}

/// A page entity with a name field.
#[must_use]
pub fn page(id: &str, name: &str) -> Entity {
    Entity::with_id("Page", id).with_field("name", name)
}

/// A note entity under a page.
#[must_use]
pub fn note(id: &str, parent_id: &str, text: &str) -> Entity {
    Entity::with_id("Note", id)
        .with_parent(parent_id)
        .with_field("text", text)
}

/// A fresh repository on the given branch over its own memory adapter.
#[must_use]
pub fn repo_on(branch: &str) -> Repository {
    Repository::create(
        Arc::new(MemoryAdapter::new()),
        test_registry(),
        test_config(branch),
    )
    .expect("fresh repository")
}

/// Two repositories on the same branch sharing one memory adapter,
/// the way two tabs share a device store.
#[must_use]
pub fn repo_pair_shared(branch: &str) -> (Repository, Repository) {
    let adapter = MemoryAdapter::new();
    let registry = test_registry();

    let first = Repository::create(
        Arc::new(adapter.clone_handle()),
        Arc::clone(&registry),
        test_config(branch),
    )
    .expect("fresh repository");
    let second = Repository::open(
        Arc::new(adapter),
        registry,
        test_config(branch),
    )
    .expect("open over shared adapter");
    (first, second)
}
