use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::{MapekError, MapekResult};

/// Content-addressed blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `data` and returns its content id.
    async fn add(&self, data: &str) -> MapekResult<String>;

    /// Fetches content by id.
    async fn get(&self, cid: &str) -> MapekResult<String>;

    /// Pins content so it survives garbage collection.
    async fn pin(&self, cid: &str) -> MapekResult<bool>;
}

/// Content id: `Qm` followed by the first 16 hex chars of SHA-256(data).
#[must_use]
pub fn content_id(data: &str) -> String {
    let digest = hex::encode(Sha256::digest(data.as_bytes()));
    format!("Qm{}", &digest[..16])
}

/// In-memory content store.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, String>>,
    pinned: RwLock<HashSet<String>>,
}

impl MemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cid` has been pinned.
    #[must_use]
    pub fn is_pinned(&self, cid: &str) -> bool {
        self.pinned.read().contains(cid)
    }

    /// Blobs stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn add(&self, data: &str) -> MapekResult<String> {
        let cid = content_id(data);
        self.blobs.write().insert(cid.clone(), data.to_owned());
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> MapekResult<String> {
        self.blobs
            .read()
            .get(cid)
            .cloned()
            .ok_or_else(|| MapekError::ContentNotFound(cid.to_owned()))
    }

    async fn pin(&self, cid: &str) -> MapekResult<bool> {
        self.pinned.write().insert(cid.to_owned());
        Ok(true)
    }
}
