//! Blob storage boundary. Document bodies live outside the row tables, keyed
//! by resource id; the repository keeps the blob set in step with creates,
//! copies and deletes. `MemoryContentStore` is the in-process implementation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RepoError, RepoResult};

pub trait ContentStore: Send + Sync {
    /// Store or replace the blob for a resource id.
    fn write(&self, id: i64, content: &[u8]) -> RepoResult<()>;

    /// Read the blob for a resource id.
    fn read(&self, id: i64) -> RepoResult<Vec<u8>>;

    /// Duplicate a blob under a new id (copy operations re-assign ids).
    fn copy(&self, from: i64, to: i64) -> RepoResult<()>;

    /// Drop the blob for a resource id. Removing an absent blob is fine.
    fn remove(&self, id: i64) -> RepoResult<()>;
}

/// Shared in-memory blob map; clones see the same blobs.
#[derive(Debug, Default, Clone)]
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<i64, Vec<u8>>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self { Self::default() }

    pub fn blob_count(&self) -> usize { self.blobs.read().len() }
}

impl ContentStore for MemoryContentStore {
    fn write(&self, id: i64, content: &[u8]) -> RepoResult<()> {
        self.blobs.write().insert(id, content.to_vec());
        Ok(())
    }

    fn read(&self, id: i64) -> RepoResult<Vec<u8>> {
        self.blobs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("content_not_found", format!("no content stored for id {id}")))
    }

    fn copy(&self, from: i64, to: i64) -> RepoResult<()> {
        let mut blobs = self.blobs.write();
        let Some(bytes) = blobs.get(&from).cloned() else {
            return Err(RepoError::not_found("content_not_found", format!("no content stored for id {from}")));
        };
        blobs.insert(to, bytes);
        Ok(())
    }

    fn remove(&self, id: i64) -> RepoResult<()> {
        self.blobs.write().remove(&id);
        Ok(())
    }
}
