//! Storage adapter trait definition.

use crate::error::{AdapterError, AdapterResult};
use entivc_protocol::{Branch, Commit, CommitGraphData, InternalRepoUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persistence boundary of the engine.
///
/// An adapter stores the commit graph and the commit bodies for one
/// project. The repository persists every change through the adapter
/// before mirroring it into its own cache, so the adapter's state is
/// authoritative at all times.
///
/// # Invariants
///
/// - `apply_update` is atomic: on error, stored state is unchanged
/// - `commits` returns one full commit per requested id that exists
/// - After `close`, every operation fails with [`AdapterError::Closed`]
/// - `erase_storage` discards all stored state for the project
pub trait StorageAdapter: Send + Sync {
    /// Returns the stored commit graph.
    fn commit_graph(&self) -> AdapterResult<CommitGraphData>;

    /// Returns full commits (with delta payloads) for the given ids.
    ///
    /// Unknown ids are skipped; callers that require full coverage
    /// check the result length themselves.
    fn commits(&self, ids: &[String]) -> AdapterResult<Vec<Commit>>;

    /// Applies an update atomically.
    ///
    /// Removals are applied before additions. An update that references
    /// a missing branch or would create a duplicate is rejected without
    /// touching stored state.
    fn apply_update(&self, update: &InternalRepoUpdate) -> AdapterResult<()>;

    /// Closes the adapter. Further operations fail.
    fn close(&self) -> AdapterResult<()>;

    /// Removes all stored state for the project.
    fn erase_storage(&self) -> AdapterResult<()>;
}

/// Stored adapter state shared by the in-process implementations.
///
/// Kept as plain data so the file adapter can serialize it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoredState {
    pub branches: Vec<Branch>,
    pub commits: BTreeMap<String, Commit>,
}

impl StoredState {
    pub fn graph_data(&self) -> CommitGraphData {
        CommitGraphData {
            branches: self.branches.clone(),
            commits: self.commits.values().map(Commit::metadata).collect(),
        }
    }

    pub fn commits_by_ids(&self, ids: &[String]) -> Vec<Commit> {
        ids.iter()
            .filter_map(|id| self.commits.get(id))
            .cloned()
            .collect()
    }

    /// Applies an update to a clone-and-swap copy of the state.
    ///
    /// Callers clone first; on error the original is untouched, which
    /// gives every in-process adapter its atomicity for free.
    pub fn apply(&mut self, update: &InternalRepoUpdate) -> AdapterResult<()> {
        for removed in &update.removed_commits {
            self.commits.remove(&removed.id);
        }

        for commit in &update.added_commits {
            // Re-adding an existing id rewrites the commit; pulls replay
            // updates the adapter may already hold.
            self.commits.insert(commit.id.clone(), commit.clone());
        }

        for name in &update.removed_branches {
            let before = self.branches.len();
            self.branches.retain(|b| &b.name != name);
            if self.branches.len() == before {
                return Err(AdapterError::rejected(format!(
                    "cannot remove unknown branch '{name}'"
                )));
            }
        }

        for branch in &update.added_branches {
            match self.branches.iter().find(|b| b.name == branch.name) {
                None => self.branches.push(branch.clone()),
                Some(existing) if existing == branch => {}
                Some(_) => {
                    return Err(AdapterError::rejected(format!(
                        "branch '{}' already exists with a different head",
                        branch.name
                    )))
                }
            }
        }

        for branch in &update.updated_branches {
            match self.branches.iter_mut().find(|b| b.name == branch.name) {
                Some(existing) => existing.head_commit_id = branch.head_commit_id.clone(),
                None => {
                    return Err(AdapterError::rejected(format!(
                        "cannot update unknown branch '{}'",
                        branch.name
                    )))
                }
            }
        }

        Ok(())
    }
}
