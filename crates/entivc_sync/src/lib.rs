//! # entivc Sync
//!
//! Cross-replica coordination for the entivc engine.
//!
//! This crate provides:
//! - A named broadcast channel registry for repo-update messages
//! - A storage operation queue serializing commits, pulls and resets
//!   within a replica
//! - The replica itself: reference-counted project loads and
//!   pull-on-notification reconciliation
//!
//! Replicas never acknowledge messages; they reconcile by pulling from
//! their own adapter, so lost or reordered messages are harmless.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod queue;
mod replica;

pub use channel::{Channel, ChannelRegistry, SubscriptionId};
pub use error::{SyncError, SyncResult};
pub use queue::OpQueue;
pub use replica::{Replica, REPO_UPDATES_CHANNEL};
