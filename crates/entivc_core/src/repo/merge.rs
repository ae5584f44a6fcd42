//! Deterministic reconciliation of concurrent branches.
//!
//! Every device commits only to its own branch; pulls exchange the
//! commit graph. Concurrent commits (two branches continuing from the
//! same parent) are resolved by seniority: the branch earlier in the
//! graph's branch list wins, and the junior branch rebases. The walk
//! is deterministic, so replicas converge regardless of pull order.

use super::Repository;
use crate::change::{Change, ChangeKind};
use crate::delta::Delta;
use crate::error::{CoreError, CoreResult};
use entivc_protocol::{Branch, CommitMetadata, FieldMap, InternalRepoUpdate};
use std::collections::HashMap;
use tracing::debug;

impl Repository {
    /// Reconciles the current branch against the other branches.
    ///
    /// Walks commit positions in lockstep across the other branches,
    /// senior-first. A divergence resolves by seniority: under a more
    /// senior branch's commit the local tail is rebased (reset, the
    /// dominant commit applied, each local commit re-committed with
    /// its delta filtered against the dominant delta); against junior
    /// branches the local commit stands and the juniors rebase on
    /// their own devices. Extensions of the local chain are adopted
    /// as-is.
    pub fn auto_merge(&mut self) -> CoreResult<()> {
        self.ensure_caching()?;
        let local_name = self.config.branch.clone();
        let local_rank = self.branch_rank(&local_name)?;

        let mut alive: Vec<String> = self
            .graph
            .branches()
            .iter()
            .map(|b| b.name.clone())
            .filter(|name| name != &local_name)
            .collect();

        let mut position = 0usize;
        while !alive.is_empty() {
            let mut chains: HashMap<String, Vec<CommitMetadata>> = HashMap::new();
            for name in &alive {
                chains.insert(name.clone(), self.graph.commits_on_branch(name)?);
            }

            alive.retain(|name| chains[name].len() > position);
            if alive.is_empty() {
                break;
            }

            let dominant = chains[&alive[0]][position].clone();
            let dominant_rank = self.branch_rank(&alive[0])?;
            let local_chain = self.graph.commits_on_branch(&local_name)?;

            match local_chain.get(position) {
                Some(local_commit) if local_commit.id == dominant.id => {
                    alive.retain(|name| chains[name][position].id == dominant.id);
                }
                Some(local_commit) if dominant_rank > local_rank => {
                    // We are the senior side of this divergence: keep
                    // our commit and let the juniors rebase on their
                    // own devices.
                    let local_id = local_commit.id.clone();
                    alive.retain(|name| chains[name][position].id == local_id);
                }
                Some(_) => {
                    debug!(
                        position,
                        dominant = %dominant.id,
                        "rebasing local branch under senior commit"
                    );
                    alive.retain(|name| chains[name][position].id == dominant.id);
                    self.rebase_onto(&dominant, position, &local_chain)?;
                }
                None => {
                    // The remaining branches extend our chain; adopt
                    // the most senior extension as-is.
                    alive.retain(|name| chains[name][position].id == dominant.id);
                    self.rebase_onto(&dominant, position, &local_chain)?;
                }
            }
            position += 1;
        }
        Ok(())
    }

    fn branch_rank(&self, name: &str) -> CoreResult<usize> {
        self.graph
            .branches()
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| CoreError::MissingBranch {
                name: name.to_string(),
            })
    }

    /// Rebases the local tail from `position` onward under a dominant
    /// commit.
    fn rebase_onto(
        &mut self,
        dominant: &CommitMetadata,
        position: usize,
        local_chain: &[CommitMetadata],
    ) -> CoreResult<()> {
        let local_name = self.config.branch.clone();
        let ahead = &local_chain[position.min(local_chain.len())..];

        // Hydrate before the reset drops these commits.
        let ahead_ids: Vec<String> = ahead.iter().map(|c| c.id.clone()).collect();
        let ahead_full = self.hydrate_commits(&ahead_ids)?;

        if !ahead.is_empty() {
            self.reset(-(ahead.len() as i64))?;
        }

        let dominant_full = self
            .hydrate_commits(std::slice::from_ref(&dominant.id))?
            .pop()
            .ok_or_else(|| CoreError::MissingCommitDelta {
                commit_id: dominant.id.clone(),
            })?;
        let dominant_delta = Delta::from_data(&dominant_full.delta_data)?;

        self.head_store.apply_delta(&dominant_delta)?;
        let root = self.tree.update_from_delta(&self.head_store, &dominant_delta)?;
        if root != dominant.snapshot_hash {
            return Err(CoreError::hash_mismatch(
                "merge",
                dominant.snapshot_hash.clone(),
                root,
            ));
        }

        self.adapter.apply_update(&InternalRepoUpdate {
            updated_branches: vec![Branch::with_head(&local_name, &dominant.id)],
            ..Default::default()
        })?;
        self.graph
            .set_branch_head(&local_name, Some(dominant.id.clone()))?;

        for commit in ahead_full {
            let local_delta = Delta::from_data(&commit.delta_data)?;
            let filtered = filter_delta(&local_delta, &dominant_delta)?;
            if filtered.is_empty() {
                debug!(commit = %commit.id, "local commit fully superseded; dropped");
                continue;
            }
            self.apply_commit(filtered, &commit.message)?;
        }
        Ok(())
    }
}

/// Filters a junior delta against the dominant one.
///
/// The junior yields both ordering and overlapping writes: entities the
/// dominant created or deleted lose their junior change entirely; for
/// entities both updated, the junior keeps only the keys the dominant
/// left untouched. A junior create or delete colliding with a dominant
/// update is dropped as a whole.
pub(crate) fn filter_delta(local: &Delta, dominant: &Delta) -> CoreResult<Delta> {
    let mut kept = Vec::new();
    for change in local {
        let Some(dominant_change) = dominant.get(change.entity_id()) else {
            kept.push(change.clone());
            continue;
        };
        match dominant_change.kind() {
            ChangeKind::Empty => kept.push(change.clone()),
            ChangeKind::Create | ChangeKind::Delete => {}
            ChangeKind::Update => {
                if change.kind() != ChangeKind::Update {
                    continue;
                }
                let mut forward = FieldMap::new();
                let mut reverse = FieldMap::new();
                for (key, value) in change.forward() {
                    if dominant_change.forward().contains_key(key) {
                        continue;
                    }
                    forward.insert(key.clone(), value.clone());
                    if let Some(old) = change.reverse().get(key) {
                        reverse.insert(key.clone(), old.clone());
                    }
                }
                if !forward.is_empty() {
                    kept.push(Change::from_maps(change.entity_id(), reverse, forward));
                }
            }
        }
    }
    Delta::from_changes(kept)
}
