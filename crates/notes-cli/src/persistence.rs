//! On-disk persistence for the local working set.
//!
//! Everything lives in the data directory as JSON:
//! - `notes.json` - the document working set
//! - `notes_historical.json` - open historical edit sessions, keyed by note id
//! - `sync_state.json` - which published snapshot each identity last merged
//!
//! Files are overwritten whole on every change.

use anyhow::Result;
use notes_sync::store::{self, LocalStore, StoreError};
use notes_sync::{Address, ContentId, Document, SessionMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DOCUMENTS_FILE: &str = "notes.json";
pub const SESSIONS_FILE: &str = "notes_historical.json";
pub const SYNC_STATE_FILE: &str = "sync_state.json";

/// Read a JSON file, treating a missing file as the default value.
fn read_json<T: DeserializeOwned + Default>(path: &Path) -> store::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let contents =
        fs::read_to_string(path).map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
}

/// Overwrite a JSON file, creating its directory as needed.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> store::Result<()> {
    let io_error = |e: std::io::Error| StoreError::Io(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;

    // Write beside the target then rename, so readers never see half a file
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(io_error)?;
    fs::rename(&tmp, path).map_err(io_error)
}

/// `LocalStore` backed by JSON files in a data directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LocalStore for JsonFileStore {
    fn load_documents(&self) -> store::Result<Vec<Document>> {
        read_json(&self.dir.join(DOCUMENTS_FILE))
    }

    fn save_documents(&self, documents: &[Document]) -> store::Result<()> {
        write_json(&self.dir.join(DOCUMENTS_FILE), documents)
    }

    fn load_sessions(&self) -> store::Result<SessionMap> {
        read_json(&self.dir.join(SESSIONS_FILE))
    }

    fn save_sessions(&self, sessions: &SessionMap) -> store::Result<()> {
        write_json(&self.dir.join(SESSIONS_FILE), sessions)
    }
}

/// Last snapshot each identity's working set was merged with or saved as.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncMarkers {
    #[serde(default)]
    pub merged: BTreeMap<Address, ContentId>,
}

/// Storage for sync markers.
pub struct SyncStateStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory cache.
    markers: SyncMarkers,
}

impl SyncStateStorage {
    /// Open `sync_state.json` in the data directory.
    ///
    /// An unreadable file is treated as empty; the next pull rewrites it.
    pub fn new(data_dir: &Path) -> Self {
        let path = data_dir.join(SYNC_STATE_FILE);
        let markers = read_json(&path).unwrap_or_default();
        Self { path, markers }
    }

    /// Snapshot the identity's working set last matched.
    pub fn merged(&self, identity: &Address) -> Option<&ContentId> {
        self.markers.merged.get(identity)
    }

    /// Record that the identity's working set now matches `content_id`.
    pub fn record(&mut self, identity: Address, content_id: ContentId) -> Result<()> {
        self.markers.merged.insert(identity, content_id);
        write_json(&self.path, &self.markers)?;
        Ok(())
    }
}
