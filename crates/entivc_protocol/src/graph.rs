//! Branch and commit-graph records.

use crate::commit::CommitMetadata;
use serde::{Deserialize, Serialize};

/// A named branch with an optional head commit.
///
/// Branch position in the graph's branch list is the branch's seniority
/// rank: a lower index is more senior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name (typically one per device).
    pub name: String,
    /// Head commit id, or `None` for a branch with no commits yet.
    pub head_commit_id: Option<String>,
}

impl Branch {
    /// Creates an empty branch.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            head_commit_id: None,
        }
    }

    /// Creates a branch pointing at a head commit.
    #[must_use]
    pub fn with_head(name: impl Into<String>, head_commit_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            head_commit_id: Some(head_commit_id.into()),
        }
    }
}

/// Serialized form of a commit graph: the seniority-ordered branch list
/// plus commit metadata records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitGraphData {
    /// Branches in seniority order.
    pub branches: Vec<Branch>,
    /// Commit metadata for every commit reachable from the branches.
    pub commits: Vec<CommitMetadata>,
}

impl CommitGraphData {
    /// Returns the branch with the given name, if present.
    #[must_use]
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// Returns true if the graph has no branches and no commits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.commits.is_empty()
    }
}
