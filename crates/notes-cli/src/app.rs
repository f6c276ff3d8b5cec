//! App: one command-line invocation's view of the data directory.
//!
//! Each invocation opens a fresh engine over the persisted working set.
//! Before publishing, the engine needs the snapshot the ledger points at as
//! its base for history:
//!
//! - If this data directory already merged (or saved) that snapshot, it is
//!   only tracked, so unsaved local edits survive
//! - If the pointer moved since (another device saved), it is merged in,
//!   published copies winning over local ones

use crate::config::load_engine_config;
use crate::http::HttpContentStore;
use crate::ledger::{FileLedger, LEDGER_FILE};
use crate::native_fs::{FsContentStore, BLOB_DIR};
use crate::persistence::{JsonFileStore, SyncStateStorage};

use anyhow::{anyhow, bail, Result};
use ed25519_dalek::SigningKey;
use notes_sync::{
    Address, Collaborators, Connection, ContentId, ContentStore, Document, EventBus, KeypairSigner,
    LedgerPointer, Permissions, PointerValue, SyncEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where state lives and which identity to act for.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub data_dir: PathBuf,
    /// Defaults to the key's own address
    pub identity: Option<Address>,
    /// Relay base URL; snapshots stay in the data directory when unset
    pub relay: Option<String>,
}

pub struct App {
    identity: Address,
    signer: Arc<KeypairSigner>,
    connection: Connection,
    engine: Arc<SyncEngine>,
    ledger: Arc<FileLedger>,
    markers: SyncStateStorage,
}

impl App {
    pub fn open(options: &AppOptions, key: SigningKey) -> Result<Self> {
        let data_dir = &options.data_dir;
        let signer = Arc::new(KeypairSigner::new(key));
        let identity = options.identity.unwrap_or_else(|| signer.address());

        let ledger = Arc::new(FileLedger::new(data_dir.join(LEDGER_FILE)));
        let content: Arc<dyn ContentStore> = match &options.relay {
            Some(url) => {
                info!("Using content relay at {}", url);
                Arc::new(HttpContentStore::new(url)?)
            }
            None => Arc::new(FsContentStore::new(data_dir.join(BLOB_DIR))),
        };
        let collaborators = Collaborators {
            store: Arc::new(JsonFileStore::new(data_dir)),
            content,
            ledger: ledger.clone(),
            registry: ledger.clone(),
        };

        let connection = Connection::new(
            collaborators,
            load_engine_config(data_dir)?,
            Arc::new(EventBus::new()),
        );
        let engine = connection.open(identity, signer.clone())?;

        Ok(Self {
            identity,
            signer,
            connection,
            engine,
            ledger,
            markers: SyncStateStorage::new(data_dir),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Address controlled by the loaded key.
    pub fn key_address(&self) -> Address {
        self.signer.address()
    }

    pub async fn pointer(&self) -> Result<Option<PointerValue>> {
        Ok(self.ledger.read(&self.identity).await?)
    }

    /// Verify, then merge the published notes into the working set.
    pub async fn pull(&mut self) -> Result<usize> {
        let engine = self
            .connection
            .connect(self.identity, self.signer.clone())
            .await?;
        self.record_published()?;
        Ok(engine.documents().len())
    }

    fn record_published(&mut self) -> Result<()> {
        if let Some(content_id) = self.engine.current_content_id() {
            self.markers.record(self.identity, content_id)?;
        }
        Ok(())
    }

    /// Verify and establish the published snapshot the next save builds on.
    async fn prepare_publish(&mut self) -> Result<()> {
        self.engine.verify().await?;

        let Some(pointer) = self.ledger.read(&self.identity).await? else {
            return Ok(());
        };
        let published = pointer.content_id();

        if self.markers.merged(&self.identity) == Some(&published) {
            self.engine.track_published().await?;
        } else {
            info!("Published notes changed since last sync, merging {}", published);
            self.engine.load().await?;
            self.record_published()?;
        }
        Ok(())
    }

    /// Publish the working set with `id`'s live content as the saved edit.
    pub async fn save(&mut self, id: &str) -> Result<ContentId> {
        let doc = self.live_document(id)?;
        self.prepare_publish().await?;
        let content_id = self.engine.save_document(id, &doc.title, &doc.body).await?;
        self.record_published()?;
        Ok(content_id)
    }

    /// Publish everything, flushing pending deletions once `confirm` approves them.
    pub async fn save_all(
        &mut self,
        select: Option<&str>,
        confirm: impl FnOnce(&[Document]) -> bool + Send,
    ) -> Result<ContentId> {
        if let Some(id) = select {
            self.engine.select(Some(id))?;
        }
        self.prepare_publish().await?;
        let content_id = self.engine.save_all(confirm).await?;
        self.record_published()?;
        Ok(content_id)
    }

    pub async fn restore(&mut self, id: &str, version: &ContentId) -> Result<()> {
        self.engine.restore_version(id, version).await?;
        Ok(())
    }

    pub async fn apply(&mut self, id: &str) -> Result<ContentId> {
        if self.engine.session(id).is_none() {
            bail!("No historical version is open for {}", id);
        }
        self.prepare_publish().await?;
        let content_id = self.engine.apply_historical_version(id).await?;
        self.record_published()?;
        Ok(content_id)
    }

    /// Register `controller` on the identity. Only the identity's own key may do so.
    pub async fn grant(&self, controller: Address, permissions: Permissions) -> Result<()> {
        if self.key_address() != self.identity {
            bail!(
                "Key {} is not the owner of {}; only the owner can grant permissions",
                self.key_address(),
                self.identity
            );
        }
        self.ledger.grant(self.identity, controller, permissions).await?;
        Ok(())
    }

    fn live_document(&self, id: &str) -> Result<Document> {
        self.engine
            .document(id)
            .ok_or_else(|| anyhow!("No note with id {}", id))
    }
}
