//! Commit records and their delta payloads.

use serde::{Deserialize, Serialize};

/// A mapping from field name to JSON value.
///
/// Entity payloads and change field maps use this form. The underlying
/// map keeps keys sorted, which makes serialization deterministic.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Serialized form of a single per-entity change.
///
/// Classification follows from map emptiness: both empty is EMPTY, only
/// `forward` set is CREATE, only `reverse` set is DELETE, both set is
/// UPDATE. CREATE's forward and DELETE's reverse hold the full serialized
/// entity; UPDATE maps hold only the fields that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeData {
    /// Id of the entity this change targets.
    pub entity_id: String,
    /// Field values before the change.
    #[serde(default)]
    pub reverse: FieldMap,
    /// Field values after the change.
    #[serde(default)]
    pub forward: FieldMap,
}

/// Serialized form of a delta: changes in insertion order, at most one
/// per entity id.
pub type DeltaData = Vec<ChangeData>;

/// Commit metadata without the delta payload.
///
/// This is the form kept in commit graphs and listed in update removals;
/// full commits are hydrated separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// Commit id. Fresh random string, never content-derived.
    pub id: String,
    /// Parent commit id; empty only for the first commit on a branch.
    pub parent_id: String,
    /// Root digest of the head state after applying this commit.
    pub snapshot_hash: String,
    /// Wall-clock creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Commit message.
    pub message: String,
}

/// A full commit: metadata plus the delta payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit id.
    pub id: String,
    /// Parent commit id; empty only for the first commit on a branch.
    pub parent_id: String,
    /// Root digest of the head state after applying this commit.
    pub snapshot_hash: String,
    /// Wall-clock creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Commit message.
    pub message: String,
    /// The serialized delta this commit applies.
    pub delta_data: DeltaData,
}

impl Commit {
    /// Returns the metadata view of this commit.
    #[must_use]
    pub fn metadata(&self) -> CommitMetadata {
        CommitMetadata {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            snapshot_hash: self.snapshot_hash.clone(),
            timestamp: self.timestamp,
            message: self.message.clone(),
        }
    }

    /// Rebuilds a full commit from metadata and a delta payload.
    #[must_use]
    pub fn from_metadata(metadata: CommitMetadata, delta_data: DeltaData) -> Self {
        Self {
            id: metadata.id,
            parent_id: metadata.parent_id,
            snapshot_hash: metadata.snapshot_hash,
            timestamp: metadata.timestamp,
            message: metadata.message,
            delta_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_commit() -> Commit {
        Commit {
            id: "c1".into(),
            parent_id: String::new(),
            snapshot_hash: "abc".into(),
            timestamp: 1,
            message: "init".into(),
            delta_data: vec![ChangeData {
                entity_id: "e1".into(),
                reverse: FieldMap::new(),
                forward: {
                    let mut m = FieldMap::new();
                    m.insert("id".into(), "e1".into());
                    m
                },
            }],
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let commit = sample_commit();
        let meta = commit.metadata();
        let rebuilt = Commit::from_metadata(meta, commit.delta_data.clone());
        assert_eq!(rebuilt, commit);
    }

    #[test]
    fn serde_roundtrip() {
        let commit = sample_commit();
        let json = serde_json::to_string(&commit).unwrap();
        let decoded: Commit = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn change_data_maps_default_to_empty() {
        let decoded: ChangeData =
            serde_json::from_str(r#"{"entity_id":"e1"}"#).unwrap();
        assert!(decoded.reverse.is_empty());
        assert!(decoded.forward.is_empty());
    }
}
