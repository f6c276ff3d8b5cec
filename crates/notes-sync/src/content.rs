//! ContentStore trait: fetch and publish snapshots by content id.
//!
//! Implementations:
//! - `MemoryContentStore` - For testing
//! - `FsContentStore` (in notes-cli) - Blob directory on local disk
//! - `HttpContentStore` (in notes-cli) - Relay in front of a pinning service
//!
//! Failures are surfaced to the caller; nothing here retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Content not found: {0}")]
    NotFound(ContentId),

    #[error("Content store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// Opaque, content-derived address of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Content id derived from the SHA-256 of the bytes (hex encoded).
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Content-addressable snapshot storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch snapshot bytes by content id
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Publish snapshot bytes, returning the new content id
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId>;
}

/// In-memory content store for testing
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes directly, bypassing counters and failure switches
    pub fn insert(&self, bytes: Vec<u8>) -> ContentId {
        let id = ContentId::for_bytes(&bytes);
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), bytes);
        id
    }

    /// Number of successful publishes
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of fetch attempts
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(ContentError::Unavailable("gateway timeout".into()));
        }
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(id.clone()))
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ContentError::Unavailable("pinning service refused upload".into()));
        }
        let id = self.insert(bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }
}
