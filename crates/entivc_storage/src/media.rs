//! Content-addressed media blob storage.
//!
//! Media blobs live beside the commit history, one store per project.
//! They are not versioned; commits reference them by id and content
//! hash.

use crate::error::{AdapterError, AdapterResult};
use entivc_protocol::new_id;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Length of a media content hash in hex characters.
pub const CONTENT_HASH_LEN: usize = 32;

/// Metadata describing a stored media blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Media item id.
    pub id: String,
    /// Storage path of the blob, unique within the store.
    pub path: String,
    /// Id of the entity the blob belongs to.
    pub parent_id: String,
    /// Truncated SHA-256 of the blob contents.
    pub content_hash: String,
}

/// Computes the truncated content hash of a blob.
#[must_use]
pub(crate) fn content_hash(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    let mut hex = String::with_capacity(CONTENT_HASH_LEN);
    for byte in digest.iter().take(CONTENT_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Media blob storage for one project.
pub trait MediaStore: Send + Sync {
    /// Stores a blob and returns its item record.
    ///
    /// If `path` is taken, `_n` suffixes are appended before the
    /// extension until the path is unique.
    fn add_media(&self, blob: Vec<u8>, path: &str, parent_id: &str) -> AdapterResult<MediaItem>;

    /// Returns the blob for an item.
    fn get_media(&self, id: &str, content_hash: &str) -> AdapterResult<Vec<u8>>;

    /// Removes an item permanently.
    fn remove_media(&self, id: &str, content_hash: &str) -> AdapterResult<()>;

    /// Moves an item into the trash, keeping its blob recoverable.
    fn move_media_to_trash(&self, id: &str, content_hash: &str) -> AdapterResult<()>;

    /// Deletes every trashed blob.
    fn clean_trash(&self) -> AdapterResult<()>;
}

#[derive(Debug)]
struct StoredMedia {
    item: MediaItem,
    blob: Vec<u8>,
}

#[derive(Debug, Default)]
struct MediaState {
    items: HashMap<(String, String), StoredMedia>,
    trash: HashMap<(String, String), StoredMedia>,
}

impl MediaState {
    fn path_taken(&self, path: &str) -> bool {
        self.items.values().any(|m| m.item.path == path)
    }
}

/// An in-memory media store.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    state: RwLock<MediaState>,
}

impl MemoryMediaStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (non-trashed) items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    /// Returns true if the store holds no live items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MediaStore for MemoryMediaStore {
    fn add_media(&self, blob: Vec<u8>, path: &str, parent_id: &str) -> AdapterResult<MediaItem> {
        let mut state = self.state.write();

        let mut unique_path = path.to_string();
        let mut n = 1;
        while state.path_taken(&unique_path) {
            unique_path = suffix_path(path, n);
            n += 1;
        }

        let item = MediaItem {
            id: new_id(),
            path: unique_path,
            parent_id: parent_id.to_string(),
            content_hash: content_hash(&blob),
        };

        state.items.insert(
            (item.id.clone(), item.content_hash.clone()),
            StoredMedia {
                item: item.clone(),
                blob,
            },
        );
        Ok(item)
    }

    fn get_media(&self, id: &str, content_hash: &str) -> AdapterResult<Vec<u8>> {
        let key = (id.to_string(), content_hash.to_string());
        self.state
            .read()
            .items
            .get(&key)
            .map(|m| m.blob.clone())
            .ok_or_else(|| AdapterError::MediaNotFound {
                id: id.to_string(),
                content_hash: content_hash.to_string(),
            })
    }

    fn remove_media(&self, id: &str, content_hash: &str) -> AdapterResult<()> {
        let key = (id.to_string(), content_hash.to_string());
        let mut state = self.state.write();
        if state.items.remove(&key).is_none() && state.trash.remove(&key).is_none() {
            return Err(AdapterError::MediaNotFound {
                id: id.to_string(),
                content_hash: content_hash.to_string(),
            });
        }
        Ok(())
    }

    fn move_media_to_trash(&self, id: &str, content_hash: &str) -> AdapterResult<()> {
        let key = (id.to_string(), content_hash.to_string());
        let mut state = self.state.write();
        match state.items.remove(&key) {
            Some(media) => {
                state.trash.insert(key, media);
                Ok(())
            }
            None => Err(AdapterError::MediaNotFound {
                id: id.to_string(),
                content_hash: content_hash.to_string(),
            }),
        }
    }

    fn clean_trash(&self) -> AdapterResult<()> {
        self.state.write().trash.clear();
        Ok(())
    }
}

/// Inserts `_n` before the path's extension.
fn suffix_path(path: &str, n: usize) -> String {
    match path.rfind('.') {
        Some(dot) if dot > path.rfind('/').map_or(0, |s| s + 1) => {
            format!("{}_{n}{}", &path[..dot], &path[dot..])
        }
        _ => format!("{path}_{n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_truncated_sha256() {
        let hash = content_hash(b"some bytes");
        assert_eq!(hash.len(), CONTENT_HASH_LEN);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        // Same input, same hash.
        assert_eq!(hash, content_hash(b"some bytes"));
        assert_ne!(hash, content_hash(b"other bytes"));
    }

    #[test]
    fn add_and_get() {
        let store = MemoryMediaStore::new();
        let item = store
            .add_media(vec![1, 2, 3], "images/cat.png", "page1")
            .unwrap();

        assert_eq!(item.path, "images/cat.png");
        assert_eq!(item.parent_id, "page1");
        assert_eq!(store.get_media(&item.id, &item.content_hash).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_paths_get_suffixed() {
        let store = MemoryMediaStore::new();
        let first = store.add_media(vec![1], "images/cat.png", "p").unwrap();
        let second = store.add_media(vec![2], "images/cat.png", "p").unwrap();
        let third = store.add_media(vec![3], "images/cat.png", "p").unwrap();

        assert_eq!(first.path, "images/cat.png");
        assert_eq!(second.path, "images/cat_1.png");
        assert_eq!(third.path, "images/cat_2.png");
    }

    #[test]
    fn suffix_without_extension() {
        assert_eq!(suffix_path("notes/readme", 1), "notes/readme_1");
        assert_eq!(suffix_path("archive.tar", 2), "archive_2.tar");
    }

    #[test]
    fn trash_lifecycle() {
        let store = MemoryMediaStore::new();
        let item = store.add_media(vec![1], "a.png", "p").unwrap();

        store.move_media_to_trash(&item.id, &item.content_hash).unwrap();
        assert!(store.get_media(&item.id, &item.content_hash).is_err());
        assert!(store.is_empty());

        // Trashed blobs survive until the trash is cleaned.
        store.clean_trash().unwrap();
        assert!(store
            .remove_media(&item.id, &item.content_hash)
            .is_err());
    }

    #[test]
    fn remove_unknown_item_fails() {
        let store = MemoryMediaStore::new();
        assert!(matches!(
            store.remove_media("x", "y"),
            Err(AdapterError::MediaNotFound { .. })
        ));
    }
}
