//! In-memory storage adapter for testing.

use crate::adapter::{StorageAdapter, StoredState};
use crate::error::{AdapterError, AdapterResult};
use entivc_protocol::{Commit, CommitGraphData, InternalRepoUpdate};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory storage adapter.
///
/// Suitable for unit tests, integration tests, and ephemeral projects.
/// [`MemoryAdapter::clone_handle`] returns a second handle over the same
/// stored state, which lets two repositories in one process share an
/// adapter the way two tabs share a device store.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: Arc<RwLock<StoredState>>,
    closed: Arc<AtomicBool>,
}

impl MemoryAdapter {
    /// Creates a new empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle sharing this adapter's stored state.
    #[must_use]
    pub fn clone_handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
        }
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        Ok(())
    }
}

impl StorageAdapter for MemoryAdapter {
    fn commit_graph(&self) -> AdapterResult<CommitGraphData> {
        self.check_open()?;
        Ok(self.state.read().graph_data())
    }

    fn commits(&self, ids: &[String]) -> AdapterResult<Vec<Commit>> {
        self.check_open()?;
        Ok(self.state.read().commits_by_ids(ids))
    }

    fn apply_update(&self, update: &InternalRepoUpdate) -> AdapterResult<()> {
        self.check_open()?;
        let mut state = self.state.write();
        let mut next = state.clone();
        next.apply(update)?;
        *state = next;
        Ok(())
    }

    fn close(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn erase_storage(&self) -> AdapterResult<()> {
        self.check_open()?;
        *self.state.write() = StoredState::default();
        Ok(())
    }
}
