//! # entivc Core
//!
//! Core engine for entivc, a client-embedded, branch-based
//! version-control engine for structured entity data.
//!
//! This crate provides:
//! - Entity records with a process-start type registry
//! - The Change/Delta algebra (merge-with-priority, squish, reversal)
//! - An indexed in-memory entity store with a selectivity-based planner
//! - A parent-child hash tree yielding a deterministic snapshot digest
//! - The commit graph and the repository tying head state, commits and
//!   hash tree together
//! - Deterministic auto-merge of concurrent branches by seniority

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod change;
pub mod delta;
pub mod entity;
mod error;
pub mod graph;
pub mod repo;
pub mod store;
pub mod tree;

pub use change::{Change, ChangeKind};
pub use delta::Delta;
pub use entity::{Entity, EntityRegistry};
pub use error::{CoreError, CoreResult};
pub use graph::{CommitGraph, GraphDiff};
pub use repo::{Repository, RepositoryConfig};
pub use store::{EntityStore, Filter, IndexConfig, IndexField};
pub use tree::HashTree;

pub use entivc_protocol::{
    new_id, timestamp_now, Branch, ChangeData, Commit, CommitGraphData, CommitMetadata,
    DeltaData, FieldMap, InternalRepoUpdate, RepoUpdate,
};
