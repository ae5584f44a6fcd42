//! The commit graph: seniority-ordered branches plus commit metadata.

use crate::error::{CoreError, CoreResult};
use entivc_protocol::{Branch, Commit, CommitGraphData, CommitMetadata, InternalRepoUpdate};
use std::collections::{HashMap, HashSet};

/// The in-memory commit graph of one project.
///
/// Branch order is seniority: a lower index is more senior. The list
/// is kept in branch-name order, so every replica converges on the
/// same ranking no matter in which order branches arrive. Commits are
/// held as metadata; full commits (with deltas) live in the repository
/// cache or behind the adapter.
#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    branches: Vec<Branch>,
    commits: HashMap<String, CommitMetadata>,
}

impl CommitGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from its serialized form.
    ///
    /// Every branch head must be present in the commit set.
    pub fn from_data(data: CommitGraphData) -> CoreResult<Self> {
        let commits: HashMap<String, CommitMetadata> = data
            .commits
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        for branch in &data.branches {
            if let Some(head) = &branch.head_commit_id {
                if !commits.contains_key(head) {
                    return Err(CoreError::protocol(format!(
                        "branch '{}' heads missing commit '{head}'",
                        branch.name
                    )));
                }
            }
        }

        let mut branches = data.branches;
        branches.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self { branches, commits })
    }

    /// Returns the serialized form, commits ordered by id.
    #[must_use]
    pub fn to_data(&self) -> CommitGraphData {
        let mut commits: Vec<CommitMetadata> = self.commits.values().cloned().collect();
        commits.sort_by(|a, b| a.id.cmp(&b.id));
        CommitGraphData {
            branches: self.branches.clone(),
            commits,
        }
    }

    /// Returns the branches in seniority order.
    #[must_use]
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Returns a branch by name.
    #[must_use]
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// Appends a new empty branch.
    pub fn create_branch(&mut self, name: &str) -> CoreResult<()> {
        self.add_branch(Branch::new(name))
    }

    /// Appends a branch record.
    ///
    /// Re-adding an identical branch is a no-op; a conflicting record
    /// is a protocol error.
    pub fn add_branch(&mut self, branch: Branch) -> CoreResult<()> {
        match self.branch(&branch.name) {
            None => {
                let pos = self
                    .branches
                    .binary_search_by(|b| b.name.cmp(&branch.name))
                    .unwrap_or_else(|p| p);
                self.branches.insert(pos, branch);
                Ok(())
            }
            Some(existing) if *existing == branch => Ok(()),
            Some(_) => Err(CoreError::protocol(format!(
                "branch '{}' already exists",
                branch.name
            ))),
        }
    }

    /// Moves a branch head.
    pub fn set_branch_head(&mut self, name: &str, head: Option<String>) -> CoreResult<()> {
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| CoreError::MissingBranch {
                name: name.to_string(),
            })?;
        branch.head_commit_id = head;
        Ok(())
    }

    /// Deletes a branch.
    pub fn remove_branch(&mut self, name: &str) -> CoreResult<()> {
        let before = self.branches.len();
        self.branches.retain(|b| b.name != name);
        if self.branches.len() == before {
            return Err(CoreError::MissingBranch {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Inserts or rewrites a commit record.
    pub fn insert_commit(&mut self, metadata: CommitMetadata) {
        self.commits.insert(metadata.id.clone(), metadata);
    }

    /// Removes a commit record.
    pub fn remove_commit(&mut self, commit_id: &str) {
        self.commits.remove(commit_id);
    }

    /// Returns a commit's metadata.
    #[must_use]
    pub fn commit(&self, commit_id: &str) -> Option<&CommitMetadata> {
        self.commits.get(commit_id)
    }

    /// Returns true if the commit is present.
    #[must_use]
    pub fn has_commit(&self, commit_id: &str) -> bool {
        self.commits.contains_key(commit_id)
    }

    /// Returns the number of commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    /// Returns a branch's commits in chronological order.
    ///
    /// Chronological order is the reverse parent walk from the head;
    /// a cycle or a dangling parent is a protocol error.
    pub fn commits_on_branch(&self, name: &str) -> CoreResult<Vec<CommitMetadata>> {
        let branch = self.branch(name).ok_or_else(|| CoreError::MissingBranch {
            name: name.to_string(),
        })?;

        match &branch.head_commit_id {
            None => Ok(Vec::new()),
            Some(head) => self.walk_to_root(head),
        }
    }

    /// Returns the commits behind `from_head` on the path to `to_head`:
    /// everything after `from_head` (exclusive) up to `to_head`
    /// (inclusive), in chronological order.
    ///
    /// `from_head` of `None` means the walk runs all the way to the
    /// first commit. A `from_head` that is not an ancestor of `to_head`
    /// is a protocol error.
    pub fn commits_behind(
        &self,
        from_head: Option<&str>,
        to_head: &str,
    ) -> CoreResult<Vec<CommitMetadata>> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut current = to_head.to_string();

        loop {
            if Some(current.as_str()) == from_head {
                break;
            }
            if current.is_empty() {
                if from_head.is_some() {
                    return Err(CoreError::protocol(format!(
                        "commit '{}' is not an ancestor of '{to_head}'",
                        from_head.unwrap_or_default()
                    )));
                }
                break;
            }
            if !visited.insert(current.clone()) {
                return Err(CoreError::protocol(format!(
                    "commit graph cycle through '{current}'"
                )));
            }
            let meta = self.commits.get(&current).ok_or_else(|| {
                CoreError::protocol(format!("commit graph is missing commit '{current}'"))
            })?;
            path.push(meta.clone());
            current = meta.parent_id.clone();
        }

        path.reverse();
        Ok(path)
    }

    fn walk_to_root(&self, head: &str) -> CoreResult<Vec<CommitMetadata>> {
        self.commits_behind(None, head)
    }

    /// Mirrors an accepted adapter update into this graph.
    pub fn apply_update(&mut self, update: &InternalRepoUpdate) -> CoreResult<()> {
        for removed in &update.removed_commits {
            self.remove_commit(&removed.id);
        }
        for commit in &update.added_commits {
            self.insert_commit(commit.metadata());
        }
        for name in &update.removed_branches {
            self.remove_branch(name)?;
        }
        for branch in &update.added_branches {
            self.add_branch(branch.clone())?;
        }
        for branch in &update.updated_branches {
            self.set_branch_head(&branch.name, branch.head_commit_id.clone())?;
        }
        Ok(())
    }
}

/// The slim difference between a local graph and a remote one.
#[derive(Debug, Clone, Default)]
pub struct GraphDiff {
    /// Commits the remote has and the local graph lacks.
    pub added_commits: Vec<CommitMetadata>,
    /// Commits the local graph holds and the remote dropped.
    pub removed_commits: Vec<CommitMetadata>,
    /// Branches the remote has and the local graph lacks.
    pub added_branches: Vec<Branch>,
    /// Branches present on both sides with differing heads.
    pub updated_branches: Vec<Branch>,
    /// Branch names the remote dropped.
    pub removed_branches: Vec<String>,
}

impl GraphDiff {
    /// Diffs against an authoritative remote (the replica's own
    /// adapter): plain set differences on commits and branches.
    #[must_use]
    pub fn between(local: &CommitGraph, remote: &CommitGraphData) -> Self {
        let remote_ids: HashSet<&str> = remote.commits.iter().map(|c| c.id.as_str()).collect();

        let mut diff = Self {
            added_commits: remote
                .commits
                .iter()
                .filter(|c| {
                    local.commit(&c.id).map_or(true, |existing| existing != *c)
                })
                .cloned()
                .collect(),
            removed_commits: local
                .commits
                .values()
                .filter(|c| !remote_ids.contains(c.id.as_str()))
                .cloned()
                .collect(),
            ..Self::default()
        };

        for branch in &remote.branches {
            match local.branch(&branch.name) {
                None => diff.added_branches.push(branch.clone()),
                Some(existing) if existing.head_commit_id != branch.head_commit_id => {
                    diff.updated_branches.push(branch.clone());
                }
                Some(_) => {}
            }
        }
        for branch in local.branches() {
            if remote.branch(&branch.name).is_none() {
                diff.removed_branches.push(branch.name.clone());
            }
        }

        diff.sort();
        diff
    }

    /// Diffs against a peer repository.
    ///
    /// A peer not knowing a branch is no evidence of deletion, so
    /// branches are never removed. A peer's *stale* knowledge of a
    /// shared branch (its head sits inside our chain) is ignored
    /// entirely: neither the head nor our commits regress. Shared
    /// branches whose remote state is newer (or rewritten under the
    /// same head, the squish case) contribute head updates and commit
    /// removals.
    pub fn between_peers(local: &CommitGraph, remote: &CommitGraphData) -> CoreResult<Self> {
        let remote_ids: HashSet<&str> = remote.commits.iter().map(|c| c.id.as_str()).collect();

        let mut updated_branches = Vec::new();
        let mut removable: HashSet<String> = HashSet::new();
        for branch in local.branches() {
            let Some(remote_branch) = remote.branch(&branch.name) else {
                continue;
            };
            let local_head = branch.head_commit_id.as_deref();
            let remote_head = remote_branch.head_commit_id.as_deref();

            let heads_equal = local_head == remote_head;
            let remote_newer =
                !heads_equal && peer_head_is_newer(local, local_head, remote_head)?;

            if remote_newer {
                updated_branches.push(remote_branch.clone());
            }
            if heads_equal || remote_newer {
                for meta in local.commits_on_branch(&branch.name)? {
                    removable.insert(meta.id);
                }
            }
        }

        let mut diff = Self {
            added_commits: remote
                .commits
                .iter()
                .filter(|c| {
                    local.commit(&c.id).map_or(true, |existing| existing != *c)
                })
                .cloned()
                .collect(),
            removed_commits: local
                .commits
                .values()
                .filter(|c| {
                    removable.contains(&c.id) && !remote_ids.contains(c.id.as_str())
                })
                .cloned()
                .collect(),
            updated_branches,
            ..Self::default()
        };

        for branch in &remote.branches {
            if local.branch(&branch.name).is_none() {
                diff.added_branches.push(branch.clone());
            }
        }

        diff.sort();
        Ok(diff)
    }

    fn sort(&mut self) {
        self.added_commits.sort_by(|a, b| a.id.cmp(&b.id));
        self.removed_commits.sort_by(|a, b| a.id.cmp(&b.id));
    }

    /// Returns true if the diff carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_commits.is_empty()
            && self.removed_commits.is_empty()
            && self.added_branches.is_empty()
            && self.updated_branches.is_empty()
            && self.removed_branches.is_empty()
    }

    /// Ids of the commits to hydrate.
    #[must_use]
    pub fn added_ids(&self) -> Vec<String> {
        self.added_commits.iter().map(|c| c.id.clone()).collect()
    }

    /// Builds the adapter update from hydrated commits.
    ///
    /// The hydrated list must cover every added id; a gap means the
    /// remote could not supply a required delta.
    pub fn into_update(self, hydrated: Vec<Commit>) -> CoreResult<InternalRepoUpdate> {
        let have: HashSet<&str> = hydrated.iter().map(|c| c.id.as_str()).collect();
        for meta in &self.added_commits {
            if !have.contains(meta.id.as_str()) {
                return Err(CoreError::MissingCommitDelta {
                    commit_id: meta.id.clone(),
                });
            }
        }

        Ok(InternalRepoUpdate {
            added_commits: hydrated,
            removed_commits: self.removed_commits,
            added_branches: self.added_branches,
            updated_branches: self.updated_branches,
            removed_branches: self.removed_branches,
        })
    }
}

/// Returns true if a peer's head for a shared branch carries news.
///
/// A remote head found inside the local chain is stale knowledge; a
/// remote head the local graph cannot reach is ahead (or rewritten)
/// and worth adopting.
fn peer_head_is_newer(
    local: &CommitGraph,
    local_head: Option<&str>,
    remote_head: Option<&str>,
) -> CoreResult<bool> {
    let Some(remote_head) = remote_head else {
        return Ok(false);
    };
    let Some(local_head) = local_head else {
        return Ok(true);
    };
    let chain = local.commits_behind(None, local_head)?;
    Ok(!chain.iter().any(|c| c.id == remote_head))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, parent_id: &str) -> CommitMetadata {
        CommitMetadata {
            id: id.into(),
            parent_id: parent_id.into(),
            snapshot_hash: format!("hash-{id}"),
            timestamp: 0,
            message: String::new(),
        }
    }

    fn chain_graph() -> CommitGraph {
        let mut graph = CommitGraph::new();
        graph.create_branch("dev1").unwrap();
        graph.insert_commit(meta("c1", ""));
        graph.insert_commit(meta("c2", "c1"));
        graph.insert_commit(meta("c3", "c2"));
        graph.set_branch_head("dev1", Some("c3".into())).unwrap();
        graph
    }

    #[test]
    fn chronological_order_is_the_reverse_parent_walk() {
        let graph = chain_graph();
        let commits = graph.commits_on_branch("dev1").unwrap();
        let ids: Vec<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn branch_order_is_name_sorted_seniority() {
        let mut graph = CommitGraph::new();
        graph.create_branch("dev2").unwrap();
        graph.create_branch("dev1").unwrap();

        let names: Vec<&str> = graph.branches().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["dev1", "dev2"]);
    }

    #[test]
    fn empty_branch_has_no_commits() {
        let mut graph = CommitGraph::new();
        graph.create_branch("dev1").unwrap();
        assert!(graph.commits_on_branch("dev1").unwrap().is_empty());
    }

    #[test]
    fn commits_behind_is_exclusive_inclusive() {
        let graph = chain_graph();

        let behind = graph.commits_behind(Some("c1"), "c3").unwrap();
        let ids: Vec<&str> = behind.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);

        let all = graph.commits_behind(None, "c3").unwrap();
        assert_eq!(all.len(), 3);

        let none = graph.commits_behind(Some("c3"), "c3").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn non_ancestor_is_a_protocol_error() {
        let mut graph = chain_graph();
        graph.insert_commit(meta("x1", ""));
        assert!(graph.commits_behind(Some("x1"), "c3").is_err());
    }

    #[test]
    fn cycles_are_detected() {
        let mut graph = CommitGraph::new();
        graph.create_branch("dev1").unwrap();
        graph.insert_commit(meta("c1", "c2"));
        graph.insert_commit(meta("c2", "c1"));
        graph.set_branch_head("dev1", Some("c2".into())).unwrap();
        assert!(graph.commits_on_branch("dev1").is_err());
    }

    #[test]
    fn from_data_validates_heads() {
        let data = CommitGraphData {
            branches: vec![Branch::with_head("dev1", "ghost")],
            commits: Vec::new(),
        };
        assert!(CommitGraph::from_data(data).is_err());
    }

    #[test]
    fn data_roundtrip() {
        let graph = chain_graph();
        let rebuilt = CommitGraph::from_data(graph.to_data()).unwrap();
        assert_eq!(rebuilt.to_data(), graph.to_data());
    }

    #[test]
    fn diff_finds_added_and_removed() {
        let local = chain_graph();

        let mut remote = local.clone();
        remote.remove_commit("c3");
        remote.insert_commit(meta("c4", "c2"));
        remote.set_branch_head("dev1", Some("c4".into())).unwrap();

        let diff = GraphDiff::between(&local, &remote.to_data());
        assert_eq!(diff.added_ids(), vec!["c4".to_string()]);
        assert_eq!(diff.removed_commits.len(), 1);
        assert_eq!(diff.removed_commits[0].id, "c3");
        assert_eq!(diff.updated_branches.len(), 1);
    }

    #[test]
    fn authority_diff_removes_unknown_branches() {
        let local = chain_graph();
        let remote = CommitGraphData::default();

        let diff = GraphDiff::between(&local, &remote);
        assert_eq!(diff.removed_branches, vec!["dev1".to_string()]);
    }

    #[test]
    fn peer_diff_keeps_local_only_branches() {
        let local = chain_graph();
        let remote = CommitGraphData::default();

        let diff = GraphDiff::between_peers(&local, &remote).unwrap();
        assert!(diff.removed_branches.is_empty());
        assert!(diff.removed_commits.is_empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn peer_diff_ignores_stale_peer_knowledge() {
        let local = chain_graph();

        // The peer last saw this branch at c1; it must not drag the
        // local head backwards or remove newer commits.
        let mut remote = CommitGraph::new();
        remote.create_branch("dev1").unwrap();
        remote.insert_commit(meta("c1", ""));
        remote.set_branch_head("dev1", Some("c1".into())).unwrap();

        let diff = GraphDiff::between_peers(&local, &remote.to_data()).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn peer_diff_adopts_newer_shared_heads() {
        let mut local = CommitGraph::new();
        local.create_branch("dev1").unwrap();
        local.insert_commit(meta("c1", ""));
        local.set_branch_head("dev1", Some("c1".into())).unwrap();

        let remote = chain_graph();

        let diff = GraphDiff::between_peers(&local, &remote.to_data()).unwrap();
        assert_eq!(diff.added_ids(), vec!["c2".to_string(), "c3".to_string()]);
        assert_eq!(diff.updated_branches.len(), 1);
        assert_eq!(
            diff.updated_branches[0].head_commit_id.as_deref(),
            Some("c3")
        );
        assert!(diff.removed_commits.is_empty());
    }

    #[test]
    fn peer_diff_adopts_squished_shared_branches() {
        let local = chain_graph();

        // The peer squished c1..c2 into s1 on the shared branch.
        let mut remote = CommitGraph::new();
        remote.create_branch("dev1").unwrap();
        remote.insert_commit(meta("s1", ""));
        remote.insert_commit(meta("c3", "s1"));
        remote.set_branch_head("dev1", Some("c3".into())).unwrap();

        let diff = GraphDiff::between_peers(&local, &remote.to_data()).unwrap();
        let removed: Vec<&str> = diff.removed_commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(removed, vec!["c1", "c2"]);
        assert!(diff.added_ids().contains(&"s1".to_string()));
    }

    #[test]
    fn into_update_requires_full_coverage() {
        let local = CommitGraph::new();
        let mut remote = CommitGraph::new();
        remote.create_branch("dev1").unwrap();
        remote.insert_commit(meta("c1", ""));
        remote.set_branch_head("dev1", Some("c1".into())).unwrap();

        let diff = GraphDiff::between(&local, &remote.to_data());
        assert!(matches!(
            diff.into_update(Vec::new()),
            Err(CoreError::MissingCommitDelta { .. })
        ));
    }
}
