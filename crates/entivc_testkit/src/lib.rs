//! # entivc Testkit
//!
//! Shared fixtures and property-test strategies for the entivc
//! workspace.

#![deny(unsafe_code)]

mod fixtures;
mod generators;

pub use fixtures::{
    note, page, repo_on, repo_pair_shared, test_config, test_registry, DeterministicIds,
};
pub use generators::{delta_of_creates_strategy, field_map_strategy, scalar_strategy};
