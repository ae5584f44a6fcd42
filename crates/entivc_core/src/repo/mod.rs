//! The repository: head store, commit graph and hash tree, coordinated
//! over a storage adapter.
//!
//! The adapter is the source of truth; every mutation is persisted
//! there before the in-memory cache mirrors it, so a failed persist
//! leaves the cache unchanged. Integrity failures (snapshot hash
//! mismatches) leave the cache untrusted; the recovery is to re-open
//! from the adapter.

mod merge;

use crate::delta::Delta;
use crate::entity::EntityRegistry;
use crate::error::{CoreError, CoreResult};
use crate::graph::{CommitGraph, GraphDiff};
use crate::store::{EntityStore, IndexConfig};
use crate::tree::HashTree;
use entivc_protocol::{
    new_id, timestamp_now, Branch, Commit, CommitGraphData, InternalRepoUpdate, RepoUpdate,
};
use entivc_storage::StorageAdapter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Commits an eligible branch prefix may grow to before the repository
/// folds it on its own.
const DEFAULT_SQUISH_THRESHOLD: usize = 32;

/// Configuration of a repository instance.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// The branch this replica commits to.
    pub branch: String,
    /// Index configurations for the head store.
    pub index_configs: Vec<IndexConfig>,
    /// Whether head state and hash tree are maintained in memory.
    pub caching: bool,
    /// Eligible-prefix length at which commits and pulls fold history
    /// opportunistically. Zero disables the automatic fold;
    /// [`Repository::squish_history`] stays available either way.
    pub squish_threshold: usize,
}

impl RepositoryConfig {
    /// Creates a caching configuration with the mandatory id index.
    #[must_use]
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            index_configs: vec![IndexConfig::id_index()],
            caching: true,
            squish_threshold: DEFAULT_SQUISH_THRESHOLD,
        }
    }

    /// Adds an index configuration, builder-style.
    #[must_use]
    pub fn with_index(mut self, config: IndexConfig) -> Self {
        self.index_configs.push(config);
        self
    }

    /// Overrides the opportunistic squish threshold, builder-style.
    #[must_use]
    pub fn with_squish_threshold(mut self, threshold: usize) -> Self {
        self.squish_threshold = threshold;
        self
    }
}

type UpdateSink = Box<dyn Fn(RepoUpdate) + Send + Sync>;

/// A cached repository over one project's storage adapter.
pub struct Repository {
    registry: Arc<EntityRegistry>,
    adapter: Arc<dyn StorageAdapter>,
    config: RepositoryConfig,
    head_store: EntityStore,
    tree: HashTree,
    graph: CommitGraph,
    commit_cache: HashMap<String, Commit>,
    update_sink: Option<UpdateSink>,
}

impl Repository {
    /// Initializes a fresh project: empty head state, the configured
    /// branch created on the adapter.
    pub fn create(
        adapter: Arc<dyn StorageAdapter>,
        registry: Arc<EntityRegistry>,
        config: RepositoryConfig,
    ) -> CoreResult<Self> {
        let head_store = EntityStore::new(Arc::clone(&registry), config.index_configs.clone())?;

        adapter.apply_update(&InternalRepoUpdate {
            added_branches: vec![Branch::new(&config.branch)],
            ..Default::default()
        })?;

        let mut graph = CommitGraph::new();
        graph.create_branch(&config.branch)?;

        Ok(Self {
            registry,
            adapter,
            config,
            head_store,
            tree: HashTree::new(),
            graph,
            commit_cache: HashMap::new(),
            update_sink: None,
        })
    }

    /// Opens an existing project from the adapter, hydrating head
    /// state for the configured branch.
    ///
    /// A branch unknown to the adapter is created (a device joining an
    /// existing project starts its own branch).
    pub fn open(
        adapter: Arc<dyn StorageAdapter>,
        registry: Arc<EntityRegistry>,
        config: RepositoryConfig,
    ) -> CoreResult<Self> {
        let graph_data = adapter.commit_graph()?;
        let mut graph = CommitGraph::from_data(graph_data)?;

        if graph.branch(&config.branch).is_none() {
            adapter.apply_update(&InternalRepoUpdate {
                added_branches: vec![Branch::new(&config.branch)],
                ..Default::default()
            })?;
            graph.create_branch(&config.branch)?;
        }

        let head_store = EntityStore::new(Arc::clone(&registry), config.index_configs.clone())?;
        let mut repo = Self {
            registry,
            adapter,
            config,
            head_store,
            tree: HashTree::new(),
            graph,
            commit_cache: HashMap::new(),
            update_sink: None,
        };

        if repo.config.caching {
            let head = repo.head_commit_id();
            repo.rebuild_head_state(head.as_deref())?;
        }
        Ok(repo)
    }

    /// Registers the sink repo-update notifications are pushed to.
    pub fn set_update_sink(&mut self, sink: impl Fn(RepoUpdate) + Send + Sync + 'static) {
        self.update_sink = Some(Box::new(sink));
    }

    /// Returns the storage adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Returns the head store.
    #[must_use]
    pub fn head_store(&self) -> &EntityStore {
        &self.head_store
    }

    /// Returns the branch this replica commits to.
    #[must_use]
    pub fn current_branch(&self) -> &str {
        &self.config.branch
    }

    /// Returns the current branch's head commit id.
    #[must_use]
    pub fn head_commit_id(&self) -> Option<String> {
        self.graph
            .branch(&self.config.branch)
            .and_then(|b| b.head_commit_id.clone())
    }

    /// Returns the serialized commit graph.
    #[must_use]
    pub fn graph_data(&self) -> CommitGraphData {
        self.graph.to_data()
    }

    /// Returns the current snapshot digest.
    pub fn root_hash(&mut self) -> CoreResult<String> {
        self.tree.update_root_hash()
    }

    /// Closes the underlying adapter.
    pub fn close(&self) -> CoreResult<()> {
        self.adapter.close()?;
        Ok(())
    }

    /// Applies a delta as a new commit on the current branch.
    pub fn commit(&mut self, delta: Delta, message: &str) -> CoreResult<Commit> {
        let commit = self.apply_commit(delta, message)?;
        self.maybe_squish();
        Ok(commit)
    }

    /// The commit path without the opportunistic squish; the merge
    /// rebase re-commits through this so its lockstep positions stay
    /// valid.
    pub(crate) fn apply_commit(&mut self, delta: Delta, message: &str) -> CoreResult<Commit> {
        self.ensure_caching()?;
        let branch_name = self.config.branch.clone();
        let head = self
            .graph
            .branch(&branch_name)
            .ok_or_else(|| CoreError::MissingBranch {
                name: branch_name.clone(),
            })?
            .head_commit_id
            .clone();

        self.head_store.apply_delta(&delta)?;
        let root = match self.tree.update_from_delta(&self.head_store, &delta) {
            Ok(root) => root,
            Err(e) => {
                let _ = self.head_store.apply_delta(&delta.reversed());
                return Err(e);
            }
        };

        let commit = Commit {
            id: new_id(),
            parent_id: head.unwrap_or_default(),
            snapshot_hash: root,
            timestamp: timestamp_now(),
            message: message.to_string(),
            delta_data: delta.to_data(),
        };

        let update = InternalRepoUpdate {
            added_commits: vec![commit.clone()],
            updated_branches: vec![Branch::with_head(&branch_name, &commit.id)],
            ..Default::default()
        };
        if let Err(e) = self.adapter.apply_update(&update) {
            // The adapter rejected the write; undo the head mutation so
            // the cache still mirrors the adapter.
            let reversed = delta.reversed();
            let _ = self.head_store.apply_delta(&reversed);
            let _ = self.tree.update_from_delta(&self.head_store, &reversed);
            return Err(e.into());
        }

        self.graph.insert_commit(commit.metadata());
        self.graph
            .set_branch_head(&branch_name, Some(commit.id.clone()))?;
        self.commit_cache.insert(commit.id.clone(), commit.clone());

        debug!(commit = %commit.id, branch = %branch_name, "committed");
        self.emit(vec![commit.clone()]);
        Ok(commit)
    }

    /// Steps the current branch back by `-relative_to_head` commits.
    ///
    /// Only negative offsets are supported. The trailing commits are
    /// undone against the head store, removed from the graph and the
    /// adapter, and the restored snapshot digest is verified against
    /// the target commit.
    pub fn reset(&mut self, relative_to_head: i64) -> CoreResult<()> {
        self.ensure_caching()?;
        if relative_to_head >= 0 {
            return Err(CoreError::ResetForwardUnsupported);
        }
        let count = relative_to_head.unsigned_abs() as usize;
        let branch_name = self.config.branch.clone();
        let chain = self.graph.commits_on_branch(&branch_name)?;
        if count > chain.len() {
            return Err(CoreError::ResetPastRoot {
                requested: count,
                available: chain.len(),
            });
        }

        let cut = chain.len() - count;
        let trailing = chain[cut..].to_vec();
        let target = if cut == 0 {
            None
        } else {
            Some(chain[cut - 1].clone())
        };

        let ids: Vec<String> = trailing.iter().map(|c| c.id.clone()).collect();
        let full = self.hydrate_commits(&ids)?;
        let reversed_deltas = full
            .iter()
            .rev()
            .map(|c| Delta::from_data(&c.delta_data).map(|d| d.reversed()))
            .collect::<CoreResult<Vec<_>>>()?;
        let net = Delta::squish(reversed_deltas)?;

        self.adapter.apply_update(&InternalRepoUpdate {
            removed_commits: trailing.clone(),
            updated_branches: vec![Branch {
                name: branch_name.clone(),
                head_commit_id: target.as_ref().map(|c| c.id.clone()),
            }],
            ..Default::default()
        })?;

        self.head_store.apply_delta(&net)?;
        let root = self.tree.update_from_delta(&self.head_store, &net)?;

        for meta in &trailing {
            self.graph.remove_commit(&meta.id);
            self.commit_cache.remove(&meta.id);
        }
        self.graph
            .set_branch_head(&branch_name, target.as_ref().map(|c| c.id.clone()))?;

        let expected = target
            .map(|c| c.snapshot_hash)
            .unwrap_or_else(HashTree::empty_root_hash);
        if root != expected {
            return Err(CoreError::hash_mismatch("reset", expected, root));
        }

        self.emit(Vec::new());
        Ok(())
    }

    /// Pulls from a storage adapter, treating it as the authority.
    pub fn pull(&mut self, remote: &dyn StorageAdapter) -> CoreResult<()> {
        let remote_graph = remote.commit_graph()?;
        self.pull_graph(remote_graph, remote, false)
    }

    /// Pulls from a peer repository.
    ///
    /// A peer not knowing one of our branches is no evidence of
    /// deletion, so peer pulls never remove branches.
    pub fn pull_from(&mut self, other: &Repository) -> CoreResult<()> {
        self.pull_graph(other.graph.to_data(), other.adapter.as_ref(), true)
    }

    fn pull_graph(
        &mut self,
        remote_graph: CommitGraphData,
        source: &dyn StorageAdapter,
        peer: bool,
    ) -> CoreResult<()> {
        let diff = if peer {
            GraphDiff::between_peers(&self.graph, &remote_graph)?
        } else {
            GraphDiff::between(&self.graph, &remote_graph)
        };
        if diff.is_empty() {
            return Ok(());
        }
        if diff
            .removed_branches
            .iter()
            .any(|name| name == &self.config.branch)
        {
            return Err(CoreError::protocol("cannot remove the current branch"));
        }

        let hydrated = source.commits(&diff.added_ids())?;
        let update = diff.into_update(hydrated)?;
        self.adapter.apply_update(&update)?;

        if self.config.caching {
            self.mirror_update(&update)?;
        }

        self.emit(update.added_commits);
        self.maybe_squish();
        Ok(())
    }

    /// Mirrors an accepted pull update into the cache: commits first,
    /// then the current branch's head state, then the branch set.
    fn mirror_update(&mut self, update: &InternalRepoUpdate) -> CoreResult<()> {
        let branch_name = self.config.branch.clone();
        let old_head = self.head_commit_id();

        for removed in &update.removed_commits {
            self.graph.remove_commit(&removed.id);
            self.commit_cache.remove(&removed.id);
        }
        for commit in &update.added_commits {
            self.graph.insert_commit(commit.metadata());
            self.commit_cache.insert(commit.id.clone(), commit.clone());
        }

        let moved = update
            .updated_branches
            .iter()
            .find(|b| b.name == branch_name)
            .map(|b| b.head_commit_id.clone());
        if let Some(new_head) = moved {
            if new_head != old_head {
                match new_head {
                    Some(to_head) => {
                        let old_head_gone = old_head
                            .as_ref()
                            .is_some_and(|h| !self.graph.has_commit(h));
                        if old_head_gone {
                            // The old head was squished away upstream;
                            // rebuild from scratch.
                            self.rebuild_head_state(Some(&to_head))?;
                        } else {
                            self.fast_forward(old_head.as_deref(), &to_head)?;
                        }
                    }
                    None => self.rebuild_head_state(None)?,
                }
            }
        }

        for branch in &update.added_branches {
            self.graph.add_branch(branch.clone())?;
        }
        for branch in &update.updated_branches {
            self.graph
                .set_branch_head(&branch.name, branch.head_commit_id.clone())?;
        }
        for name in &update.removed_branches {
            self.graph.remove_branch(name)?;
        }
        Ok(())
    }

    /// Applies the commits between the old and new head to the cached
    /// head state and verifies the resulting digest.
    fn fast_forward(&mut self, old_head: Option<&str>, to_head: &str) -> CoreResult<()> {
        let behind = self.graph.commits_behind(old_head, to_head)?;
        let ids: Vec<String> = behind.iter().map(|c| c.id.clone()).collect();
        let full = self.hydrate_commits(&ids)?;
        let deltas = full
            .iter()
            .map(|c| Delta::from_data(&c.delta_data))
            .collect::<CoreResult<Vec<_>>>()?;
        let net = Delta::squish(deltas)?;

        self.head_store.apply_delta(&net)?;
        let root = self.tree.update_from_delta(&self.head_store, &net)?;

        let expected = self
            .graph
            .commit(to_head)
            .map(|c| c.snapshot_hash.clone())
            .ok_or_else(|| {
                CoreError::protocol(format!("pulled head '{to_head}' missing from graph"))
            })?;
        if root != expected {
            return Err(CoreError::hash_mismatch("pull", expected, root));
        }
        Ok(())
    }

    /// Rebuilds head store and hash tree from scratch up to a commit.
    fn rebuild_head_state(&mut self, head: Option<&str>) -> CoreResult<()> {
        self.head_store = EntityStore::new(
            Arc::clone(&self.registry),
            self.config.index_configs.clone(),
        )?;
        self.tree = HashTree::new();

        let Some(head) = head else {
            return Ok(());
        };

        let chain = self.graph.commits_behind(None, head)?;
        let ids: Vec<String> = chain.iter().map(|c| c.id.clone()).collect();
        let full = self.hydrate_commits(&ids)?;
        let deltas = full
            .iter()
            .map(|c| Delta::from_data(&c.delta_data))
            .collect::<CoreResult<Vec<_>>>()?;
        let net = Delta::squish(deltas)?;

        self.head_store.apply_delta(&net)?;
        self.tree = HashTree::build_from_store(&self.head_store)?;
        let root = self.tree.update_root_hash()?;

        let expected = chain
            .last()
            .map(|c| c.snapshot_hash.clone())
            .unwrap_or_else(HashTree::empty_root_hash);
        if root != expected {
            return Err(CoreError::hash_mismatch("open", expected, root));
        }
        Ok(())
    }

    /// Length of the current branch's squish-eligible prefix.
    ///
    /// Eligible means: no branch head inside the prefix (the head
    /// itself included), and no commit outside the chain hanging off
    /// an interior prefix commit, so divergence points survive.
    fn eligible_prefix_len(&self) -> CoreResult<usize> {
        let chain = self.graph.commits_on_branch(&self.config.branch)?;

        let heads: HashSet<String> = self
            .graph
            .branches()
            .iter()
            .filter_map(|b| b.head_commit_id.clone())
            .collect();

        let graph_data = self.graph.to_data();
        let mut prefix_len = 0;
        for (i, meta) in chain.iter().enumerate() {
            if heads.contains(&meta.id) {
                break;
            }
            let next_in_chain = chain.get(i + 1).map(|c| c.id.as_str());
            let has_external_child = graph_data.commits.iter().any(|other| {
                other.parent_id == meta.id && Some(other.id.as_str()) != next_in_chain
            });
            if has_external_child {
                break;
            }
            prefix_len = i + 1;
        }
        Ok(prefix_len)
    }

    /// Folds the branch prefix once it outgrows the configured
    /// threshold. Squishing is an optimization; a failure here is
    /// logged and never fails the operation that triggered it.
    fn maybe_squish(&mut self) {
        if self.config.squish_threshold == 0 || !self.config.caching {
            return;
        }
        match self.eligible_prefix_len() {
            Ok(len) if len >= self.config.squish_threshold => {
                if let Err(e) = self.squish_history() {
                    warn!(error = %e, "opportunistic history squish failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "squish eligibility check failed"),
        }
    }

    /// Folds the eligible prefix of the current branch into a single
    /// commit.
    ///
    /// Runs opportunistically after commits and pulls once the prefix
    /// reaches the configured threshold, and may be invoked directly
    /// to compact at any time. The squished commit gets a fresh id;
    /// successors are re-parented onto it. Head state is untouched.
    pub fn squish_history(&mut self) -> CoreResult<()> {
        self.ensure_caching()?;
        let branch_name = self.config.branch.clone();

        let prefix_len = self.eligible_prefix_len()?;
        if prefix_len < 2 {
            return Ok(());
        }

        let chain = self.graph.commits_on_branch(&branch_name)?;
        let prefix = chain[..prefix_len].to_vec();
        let successor_meta = chain[prefix_len].clone();

        let ids: Vec<String> = prefix.iter().map(|c| c.id.clone()).collect();
        let full = self.hydrate_commits(&ids)?;
        let deltas = full
            .iter()
            .map(|c| Delta::from_data(&c.delta_data))
            .collect::<CoreResult<Vec<_>>>()?;
        let net = Delta::squish(deltas)?;

        let Some(last) = prefix.last() else {
            return Ok(());
        };
        let squished = Commit {
            id: new_id(),
            parent_id: String::new(),
            snapshot_hash: last.snapshot_hash.clone(),
            timestamp: last.timestamp,
            message: format!("squish of {prefix_len} commits"),
            delta_data: net.to_data(),
        };

        let mut successor = self
            .hydrate_commits(std::slice::from_ref(&successor_meta.id))?
            .pop()
            .ok_or_else(|| CoreError::MissingCommitDelta {
                commit_id: successor_meta.id.clone(),
            })?;
        successor.parent_id = squished.id.clone();

        let update = InternalRepoUpdate {
            removed_commits: prefix
                .iter()
                .cloned()
                .chain([successor_meta])
                .collect(),
            added_commits: vec![squished.clone(), successor.clone()],
            ..Default::default()
        };
        self.adapter.apply_update(&update)?;

        for meta in &prefix {
            self.graph.remove_commit(&meta.id);
            self.commit_cache.remove(&meta.id);
        }
        self.graph.insert_commit(squished.metadata());
        self.graph.insert_commit(successor.metadata());
        self.commit_cache
            .insert(squished.id.clone(), squished.clone());
        self.commit_cache
            .insert(successor.id.clone(), successor.clone());

        debug!(branch = %branch_name, folded = prefix_len, "squished history prefix");
        self.emit(vec![squished, successor]);
        Ok(())
    }

    /// Loads full commits, preferring the cache over the adapter.
    pub(crate) fn hydrate_commits(&mut self, ids: &[String]) -> CoreResult<Vec<Commit>> {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !self.commit_cache.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            for commit in self.adapter.commits(&missing)? {
                self.commit_cache.insert(commit.id.clone(), commit);
            }
        }

        ids.iter()
            .map(|id| {
                self.commit_cache.get(id).cloned().ok_or_else(|| {
                    CoreError::MissingCommitDelta {
                        commit_id: id.clone(),
                    }
                })
            })
            .collect()
    }

    pub(crate) fn ensure_caching(&self) -> CoreResult<()> {
        if !self.config.caching {
            return Err(CoreError::protocol(
                "operation requires a caching repository",
            ));
        }
        Ok(())
    }

    fn emit(&self, new_commits: Vec<Commit>) {
        if let Some(sink) = &self.update_sink {
            sink(RepoUpdate {
                commit_graph: self.graph.to_data(),
                new_commits,
            });
        }
    }
}
