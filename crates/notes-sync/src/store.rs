//! LocalStore trait: durable persistence for the working set.
//!
//! Two keyed blobs are persisted, each overwritten as a whole on every change:
//! - the document working set
//! - the historical edit session map
//!
//! Implementations:
//! - `MemoryStore` - For testing and ephemeral use
//! - `JsonFileStore` (in notes-cli) - JSON files in a data directory

use crate::document::Document;
use crate::session::SessionMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt local state: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Synchronous key-value persistence for local state.
///
/// Reads and writes are expected to be effectively instantaneous; the engine
/// calls them while holding its state lock.
pub trait LocalStore: Send + Sync {
    /// Load the document working set (empty if nothing was stored yet)
    fn load_documents(&self) -> Result<Vec<Document>>;

    /// Overwrite the document working set
    fn save_documents(&self, documents: &[Document]) -> Result<()>;

    /// Load the historical edit session map (empty if nothing was stored yet)
    fn load_sessions(&self) -> Result<SessionMap>;

    /// Overwrite the historical edit session map
    fn save_sessions(&self, sessions: &SessionMap) -> Result<()>;
}

/// In-memory store for testing
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<Document>>,
    sessions: RwLock<SessionMap>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing working set
    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
            ..Self::default()
        }
    }

    /// Number of successful writes (documents and sessions combined)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail, for exercising error paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("write refused".into()));
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn load_documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save_documents(&self, documents: &[Document]) -> Result<()> {
        self.check_writable()?;
        *self.documents.write().unwrap_or_else(|e| e.into_inner()) = documents.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_sessions(&self) -> Result<SessionMap> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save_sessions(&self, sessions: &SessionMap) -> Result<()> {
        self.check_writable()?;
        *self.sessions.write().unwrap_or_else(|e| e.into_inner()) = sessions.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
