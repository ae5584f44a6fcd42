//! # entivc Storage
//!
//! Storage adapter trait and implementations for the entivc engine.
//!
//! The storage adapter is the engine's only required boundary. The
//! repository treats the adapter as the source of truth and its own
//! cache as derived state.
//!
//! ## Design Principles
//!
//! - Adapters store commit graphs and commit bodies; they never
//!   interpret deltas or entity payloads
//! - Updates apply atomically: a partially applied update is a
//!   correctness bug
//! - Must be `Send + Sync`; replicas serialize their own writes
//!
//! ## Available Adapters
//!
//! - [`MemoryAdapter`] - For testing and in-process replica pairs
//! - [`FileAdapter`] - Embedded persistent storage for production clients
//! - [`RemoteAdapter`] - Wrapper delegating to a [`RemoteService`]
//!
//! The companion [`MediaStore`] holds content-addressed blobs per
//! project, independent of the commit history.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod file;
mod media;
mod memory;
mod remote;

pub use adapter::StorageAdapter;
pub use error::{AdapterError, AdapterResult};
pub use file::FileAdapter;
pub use media::{MediaItem, MediaStore, MemoryMediaStore};
pub use memory::MemoryAdapter;
pub use remote::{LocalService, RemoteAdapter, RemoteService};
