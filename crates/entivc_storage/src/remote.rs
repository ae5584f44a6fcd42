//! Remote-service adapter wrapper.

use crate::adapter::{StorageAdapter, StoredState};
use crate::error::{AdapterError, AdapterResult};
use entivc_protocol::{Commit, CommitGraphData, InternalRepoUpdate};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A remote commit-graph service.
///
/// This trait abstracts the transport, so the same adapter works over
/// HTTP, a message bus, or an in-process test double. Implementations
/// must apply pushed updates atomically on their side.
pub trait RemoteService: Send + Sync {
    /// Fetches the commit graph held by the service.
    fn fetch_graph(&self) -> AdapterResult<CommitGraphData>;

    /// Fetches full commits for the given ids.
    fn fetch_commits(&self, ids: &[String]) -> AdapterResult<Vec<Commit>>;

    /// Pushes an update to the service.
    fn push_update(&self, update: &InternalRepoUpdate) -> AdapterResult<()>;

    /// Erases the project on the service.
    fn erase(&self) -> AdapterResult<()>;
}

/// A storage adapter backed by a [`RemoteService`].
///
/// The wrapper adds only the closed-state bookkeeping; consistency is
/// the service's concern.
pub struct RemoteAdapter {
    service: Arc<dyn RemoteService>,
    closed: AtomicBool,
}

impl RemoteAdapter {
    /// Creates an adapter over the given service.
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self {
            service,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        Ok(())
    }
}

impl StorageAdapter for RemoteAdapter {
    fn commit_graph(&self) -> AdapterResult<CommitGraphData> {
        self.check_open()?;
        self.service.fetch_graph()
    }

    fn commits(&self, ids: &[String]) -> AdapterResult<Vec<Commit>> {
        self.check_open()?;
        self.service.fetch_commits(ids)
    }

    fn apply_update(&self, update: &InternalRepoUpdate) -> AdapterResult<()> {
        self.check_open()?;
        self.service.push_update(update)
    }

    fn close(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn erase_storage(&self) -> AdapterResult<()> {
        self.check_open()?;
        self.service.erase()
    }
}

/// An in-process [`RemoteService`] for tests.
#[derive(Debug, Default)]
pub struct LocalService {
    state: RwLock<StoredState>,
}

impl LocalService {
    /// Creates a new empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteService for LocalService {
    fn fetch_graph(&self) -> AdapterResult<CommitGraphData> {
        Ok(self.state.read().graph_data())
    }

    fn fetch_commits(&self, ids: &[String]) -> AdapterResult<Vec<Commit>> {
        Ok(self.state.read().commits_by_ids(ids))
    }

    fn push_update(&self, update: &InternalRepoUpdate) -> AdapterResult<()> {
        let mut state = self.state.write();
        let mut next = state.clone();
        next.apply(update)?;
        *state = next;
        Ok(())
    }

    fn erase(&self) -> AdapterResult<()> {
        *self.state.write() = StoredState::default();
        Ok(())
    }
}
