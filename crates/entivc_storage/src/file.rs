//! File-backed storage adapter.

use crate::adapter::{StorageAdapter, StoredState};
use crate::error::{AdapterError, AdapterResult};
use entivc_protocol::{Commit, CommitGraphData, InternalRepoUpdate};
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// A persistent storage adapter backed by a single JSON document.
///
/// The whole project state (branch list plus commit bodies) lives in one
/// file. Every update rewrites the document through a temp file in the
/// same directory followed by a rename, so a crash mid-write leaves the
/// previous document intact and the atomicity contract holds.
#[derive(Debug)]
pub struct FileAdapter {
    path: PathBuf,
    state: RwLock<StoredState>,
    closed: AtomicBool,
}

impl FileAdapter {
    /// Opens the adapter, loading existing state or starting empty.
    pub fn open(path: impl Into<PathBuf>) -> AdapterResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = fs::read(&path)?;
            serde_json::from_slice(&contents)
                .map_err(|e| AdapterError::corrupted(format!("{}: {e}", path.display())))?
        } else {
            StoredState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        Ok(())
    }

    fn persist(&self, state: &StoredState) -> AdapterResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let contents = serde_json::to_vec(state)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StorageAdapter for FileAdapter {
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
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn close(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn erase_storage(&self) -> AdapterResult<()> {
        self.check_open()?;
        let mut state = self.state.write();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *state = StoredState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entivc_protocol::Branch;
    use tempfile::TempDir;

    fn commit(id: &str) -> Commit {
        Commit {
            id: id.into(),
            parent_id: String::new(),
            snapshot_hash: "h".into(),
            timestamp: 0,
            message: "m".into(),
            delta_data: Vec::new(),
        }
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");

        {
            let adapter = FileAdapter::open(&path).unwrap();
            adapter
                .apply_update(&InternalRepoUpdate {
                    added_commits: vec![commit("c1")],
                    added_branches: vec![Branch::with_head("dev1", "c1")],
                    ..Default::default()
                })
                .unwrap();
        }

        let reopened = FileAdapter::open(&path).unwrap();
        let graph = reopened.commit_graph().unwrap();
        assert_eq!(graph.branch("dev1").unwrap().head_commit_id.as_deref(), Some("c1"));
        assert_eq!(reopened.commits(&["c1".into()]).unwrap().len(), 1);
    }

    #[test]
    fn rejected_update_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        let adapter = FileAdapter::open(&path).unwrap();

        let result = adapter.apply_update(&InternalRepoUpdate {
            updated_branches: vec![Branch::with_head("dev1", "c1")],
            ..Default::default()
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn erase_removes_the_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        let adapter = FileAdapter::open(&path).unwrap();

        adapter
            .apply_update(&InternalRepoUpdate {
                added_branches: vec![Branch::new("dev1")],
                ..Default::default()
            })
            .unwrap();
        assert!(path.exists());

        adapter.erase_storage().unwrap();
        assert!(!path.exists());
        assert!(adapter.commit_graph().unwrap().is_empty());
    }

    #[test]
    fn corrupted_document_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            FileAdapter::open(&path),
            Err(AdapterError::Corrupted(_))
        ));
    }
}
