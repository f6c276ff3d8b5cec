//! Content store on the native filesystem using tokio::fs.
//!
//! Snapshots are stored as `blobs/<content id>` under the data directory,
//! addressed by the SHA-256 of their bytes.

use async_trait::async_trait;
use notes_sync::content::{ContentError, ContentId, ContentStore, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

pub const BLOB_DIR: &str = "blobs";

/// Content store keeping snapshot blobs in a local directory
pub struct FsContentStore {
    base_path: PathBuf,
}

impl FsContentStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn blob_path(&self, id: &ContentId) -> Option<PathBuf> {
        // Ids become file names; anything but plain alphanumerics could escape the directory
        let valid = !id.as_str().is_empty() && id.as_str().chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| self.base_path.join(id.as_str()))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        let path = self
            .blob_path(id)
            .ok_or_else(|| ContentError::NotFound(id.clone()))?;

        fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ContentError::NotFound(id.clone()),
            _ => ContentError::Unavailable(e.to_string()),
        })
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId> {
        let id = ContentId::for_bytes(&bytes);
        let path = self.base_path.join(id.as_str());

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Blob {} already stored", id);
            return Ok(id);
        }

        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;

        Ok(id)
    }
}
