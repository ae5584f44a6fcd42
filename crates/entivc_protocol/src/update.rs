//! Repository update records.

use crate::commit::{Commit, CommitMetadata};
use crate::graph::{Branch, CommitGraphData};
use serde::{Deserialize, Serialize};

/// The unit of change a storage adapter applies.
///
/// Adapters must apply an update atomically: either every listed change
/// lands, or none does. Removals are applied before additions, so an
/// update may rewrite a commit by listing it in both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalRepoUpdate {
    /// Full commits to insert (or rewrite).
    #[serde(default)]
    pub added_commits: Vec<Commit>,
    /// Commits to remove, as metadata.
    #[serde(default)]
    pub removed_commits: Vec<CommitMetadata>,
    /// Branches to create.
    #[serde(default)]
    pub added_branches: Vec<Branch>,
    /// Branches whose head pointer changed.
    #[serde(default)]
    pub updated_branches: Vec<Branch>,
    /// Names of branches to delete.
    #[serde(default)]
    pub removed_branches: Vec<String>,
}

impl InternalRepoUpdate {
    /// Returns true if the update carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_commits.is_empty()
            && self.removed_commits.is_empty()
            && self.added_branches.is_empty()
            && self.updated_branches.is_empty()
            && self.removed_branches.is_empty()
    }
}

/// The payload a repository publishes after it changes state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoUpdate {
    /// The full commit graph after the change.
    pub commit_graph: CommitGraphData,
    /// Commits added by the change, with delta payloads.
    pub new_commits: Vec<Commit>,
}

/// A broadcast-channel message announcing a repository update.
///
/// Replicas that receive a message with a foreign `origin_replica_id`
/// for a project they have loaded pull from their own adapter; the
/// adapter is the authority, so lost or reordered messages are harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoUpdateMessage {
    /// The project the update belongs to.
    pub project_id: String,
    /// The replica that produced the update.
    pub origin_replica_id: String,
    /// The update payload.
    pub update: RepoUpdate,
}
