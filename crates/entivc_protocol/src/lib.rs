//! # entivc Protocol
//!
//! Record types shared across the entivc engine layers.
//!
//! This crate provides:
//! - `Commit` / `CommitMetadata` for version history records
//! - `Branch` and `CommitGraphData` for the per-device branch model
//! - `InternalRepoUpdate` for atomic storage-adapter updates
//! - `RepoUpdateMessage` for the cross-replica broadcast channel
//! - Id and timestamp helpers used by every layer
//!
//! This is a pure record crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod graph;
mod update;
mod util;

pub use commit::{ChangeData, Commit, CommitMetadata, DeltaData, FieldMap};
pub use graph::{Branch, CommitGraphData};
pub use update::{InternalRepoUpdate, RepoUpdate, RepoUpdateMessage};
pub use util::{new_id, reset_id_counter, set_deterministic_ids, timestamp_now, ID_LEN};
