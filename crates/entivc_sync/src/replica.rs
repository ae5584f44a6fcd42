//! The replica: one engine instance per process/tab/device.
//!
//! A replica loads projects with reference counting, serializes its
//! storage operations through an [`OpQueue`], publishes repo updates
//! on the broadcast channel, and pulls from its own adapter whenever a
//! foreign replica announces a change. Every pull is followed by the
//! seniority auto-merge, so divergent device branches reconcile without
//! anyone asking.

use crate::channel::{ChannelRegistry, SubscriptionId};
use crate::error::{SyncError, SyncResult};
use crate::queue::OpQueue;
use entivc_core::{Delta, EntityRegistry, Repository, RepositoryConfig};
use entivc_protocol::{new_id, RepoUpdateMessage};
use entivc_storage::StorageAdapter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Channel name carrying repo-update messages.
pub const REPO_UPDATES_CHANNEL: &str = "repo-updates";

struct ProjectHandle {
    refcount: usize,
    repo: Arc<Mutex<Repository>>,
    queue: Arc<OpQueue>,
    subscription: SubscriptionId,
}

/// One engine replica.
pub struct Replica {
    id: String,
    channels: Arc<ChannelRegistry>,
    projects: Mutex<HashMap<String, ProjectHandle>>,
}

impl Replica {
    /// Creates a replica with a fresh id over a channel registry.
    #[must_use]
    pub fn new(channels: Arc<ChannelRegistry>) -> Self {
        Self::with_id(new_id(), channels)
    }

    /// Creates a replica with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            id: id.into(),
            channels,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Returns this replica's id.
    #[must_use]
    pub fn replica_id(&self) -> &str {
        &self.id
    }

    /// Returns true if the project is currently loaded.
    #[must_use]
    pub fn is_loaded(&self, project_id: &str) -> bool {
        self.projects.lock().contains_key(project_id)
    }

    /// Loads a project, opening the adapter and hydrating the cache on
    /// first load; later loads only bump the reference count.
    pub fn load_project(
        &self,
        project_id: &str,
        adapter: Arc<dyn StorageAdapter>,
        registry: Arc<EntityRegistry>,
        config: RepositoryConfig,
    ) -> SyncResult<()> {
        let mut projects = self.projects.lock();
        if let Some(handle) = projects.get_mut(project_id) {
            handle.refcount += 1;
            return Ok(());
        }

        let mut repo = Repository::open(Arc::clone(&adapter), registry, config)?;

        let channel = self.channels.channel(REPO_UPDATES_CHANNEL);
        let sink_channel = Arc::clone(&channel);
        let sink_project = project_id.to_string();
        let sink_origin = self.id.clone();
        repo.set_update_sink(move |update| {
            let message = RepoUpdateMessage {
                project_id: sink_project.clone(),
                origin_replica_id: sink_origin.clone(),
                update,
            };
            if let Err(e) = sink_channel.push(&message) {
                warn!(error = %e, "failed to publish repo update");
            }
        });

        let repo = Arc::new(Mutex::new(repo));
        let queue = Arc::new(OpQueue::new());

        // A foreign update means the adapter moved ahead of the cache;
        // reconcile by pulling from our own adapter.
        let own_id = self.id.clone();
        let pull_repo = Arc::clone(&repo);
        let pull_adapter = Arc::clone(&adapter);
        let pull_queue = Arc::clone(&queue);
        let subscription = channel.subscribe(Some(project_id.to_string()), move |message| {
            if message.origin_replica_id == own_id {
                return;
            }
            let repo = Arc::clone(&pull_repo);
            let adapter = Arc::clone(&pull_adapter);
            pull_queue.enqueue("pull", move || {
                let mut repo = repo.lock();
                repo.pull(adapter.as_ref())?;
                repo.auto_merge()?;
                Ok(())
            });
        });

        debug!(project = project_id, replica = %self.id, "project loaded");
        projects.insert(
            project_id.to_string(),
            ProjectHandle {
                refcount: 1,
                repo,
                queue,
                subscription,
            },
        );
        Ok(())
    }

    /// Drops one reference to a project; the last unload drains the
    /// queue, unsubscribes and closes the adapter.
    pub fn unload_project(&self, project_id: &str) -> SyncResult<()> {
        let mut projects = self.projects.lock();
        let handle = projects
            .get_mut(project_id)
            .ok_or_else(|| SyncError::ProjectNotLoaded {
                project_id: project_id.to_string(),
            })?;

        handle.refcount -= 1;
        if handle.refcount > 0 {
            return Ok(());
        }

        let Some(handle) = projects.remove(project_id) else {
            return Ok(());
        };
        drop(projects);

        handle.queue.drain();
        self.channels
            .channel(REPO_UPDATES_CHANNEL)
            .unsubscribe(handle.subscription);
        if let Err(e) = handle.repo.lock().close() {
            warn!(project = project_id, error = %e, "closing adapter failed");
        }
        debug!(project = project_id, replica = %self.id, "project unloaded");
        Ok(())
    }

    /// Runs a closure with exclusive access to a project's repository.
    pub fn with_repo<R>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut Repository) -> R,
    ) -> SyncResult<R> {
        let repo = self.project_repo(project_id)?;
        let mut repo = repo.lock();
        Ok(f(&mut repo))
    }

    /// Queues a commit of the given delta.
    pub fn enqueue_commit(
        &self,
        project_id: &str,
        delta: Delta,
        message: impl Into<String>,
    ) -> SyncResult<()> {
        let repo = self.project_repo(project_id)?;
        let message = message.into();
        self.project_queue(project_id)?.enqueue("commit", move || {
            repo.lock().commit(delta, &message)?;
            Ok(())
        });
        Ok(())
    }

    /// Queues a pull from the replica's own adapter, followed by the
    /// seniority auto-merge.
    pub fn enqueue_pull(&self, project_id: &str) -> SyncResult<()> {
        let repo = self.project_repo(project_id)?;
        self.project_queue(project_id)?.enqueue("pull", move || {
            let mut repo = repo.lock();
            let adapter = Arc::clone(repo.adapter());
            repo.pull(adapter.as_ref())?;
            repo.auto_merge()?;
            Ok(())
        });
        Ok(())
    }

    /// Queues a reset of the current branch.
    pub fn enqueue_reset(&self, project_id: &str, relative_to_head: i64) -> SyncResult<()> {
        let repo = self.project_repo(project_id)?;
        self.project_queue(project_id)?.enqueue("reset", move || {
            repo.lock().reset(relative_to_head)?;
            Ok(())
        });
        Ok(())
    }

    /// Drains the project's operation queue, returning the number of
    /// operations run.
    pub fn drain(&self, project_id: &str) -> SyncResult<usize> {
        Ok(self.project_queue(project_id)?.drain())
    }

    fn project_repo(&self, project_id: &str) -> SyncResult<Arc<Mutex<Repository>>> {
        self.projects
            .lock()
            .get(project_id)
            .map(|h| Arc::clone(&h.repo))
            .ok_or_else(|| SyncError::ProjectNotLoaded {
                project_id: project_id.to_string(),
            })
    }

    fn project_queue(&self, project_id: &str) -> SyncResult<Arc<OpQueue>> {
        self.projects
            .lock()
            .get(project_id)
            .map(|h| Arc::clone(&h.queue))
            .ok_or_else(|| SyncError::ProjectNotLoaded {
                project_id: project_id.to_string(),
            })
    }
}
