//! Connection: owns the engine for whichever identity is currently connected.
//!
//! One `SyncEngine` exists per connected identity. It is built on connect and
//! dropped on disconnect, so cached verification and the "already loaded"
//! marker never leak from one identity to the next.

use crate::address::Address;
use crate::config::EngineConfig;
use crate::engine::{Collaborators, Result, SyncEngine, SyncError};
use crate::events::EventBus;
use crate::signer::Signer;

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub struct Connection {
    collaborators: Collaborators,
    config: EngineConfig,
    events: Arc<EventBus>,
    engine: Mutex<Option<Arc<SyncEngine>>>,
}

impl Connection {
    pub fn new(collaborators: Collaborators, config: EngineConfig, events: Arc<EventBus>) -> Self {
        Self {
            collaborators,
            config,
            events,
            engine: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<SyncEngine>>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build (or reuse) the engine for `identity` without verifying or loading.
    ///
    /// Local edits work offline; remote operations verify on first use.
    /// Opening the identity that is already connected reuses its engine and
    /// ignores `signer`. Opening a different identity tears the previous one down.
    pub fn open(&self, identity: Address, signer: Arc<dyn Signer>) -> Result<Arc<SyncEngine>> {
        let mut slot = self.slot();
        if let Some(engine) = slot.as_ref() {
            if *engine.identity() == identity {
                return Ok(Arc::clone(engine));
            }
            info!(
                "Identity changed from {} to {}",
                engine.identity().fmt_short(),
                identity.fmt_short()
            );
            engine.verifier().reset();
        }

        let engine = Arc::new(SyncEngine::new(
            identity,
            signer,
            self.collaborators.clone(),
            self.config.clone(),
            Arc::clone(&self.events),
        )?);
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Connect `identity`, verify it and load its published notes once.
    ///
    /// Reconnecting a verified identity neither prompts again nor reloads.
    pub async fn connect(&self, identity: Address, signer: Arc<dyn Signer>) -> Result<Arc<SyncEngine>> {
        let engine = self.open(identity, signer)?;
        engine.verify().await?;
        engine.load_if_needed().await?;
        Ok(engine)
    }

    /// Drop the connected engine, if any.
    pub fn disconnect(&self) {
        if let Some(engine) = self.slot().take() {
            engine.verifier().reset();
            info!("Disconnected {}", engine.identity().fmt_short());
        }
    }

    pub fn engine(&self) -> Option<Arc<SyncEngine>> {
        self.slot().clone()
    }

    /// The connected engine, or `NotConnected`.
    pub fn require(&self) -> Result<Arc<SyncEngine>> {
        self.engine().ok_or(SyncError::NotConnected)
    }

    pub fn identity(&self) -> Option<Address> {
        self.slot().as_ref().map(|engine| *engine.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentStore;
    use crate::ledger::MemoryLedger;
    use crate::signer::KeypairSigner;
    use crate::store::MemoryStore;

    fn connection(ledger: Arc<MemoryLedger>) -> Connection {
        let collaborators = Collaborators {
            store: Arc::new(MemoryStore::new()),
            content: Arc::new(MemoryContentStore::new()),
            ledger: ledger.clone(),
            registry: ledger,
        };
        Connection::new(collaborators, EngineConfig::default(), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_require_without_identity() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        assert!(matches!(conn.require(), Err(SyncError::NotConnected)));
        assert_eq!(conn.identity(), None);
    }

    #[tokio::test]
    async fn test_connect_verifies_and_loads() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        let signer = Arc::new(KeypairSigner::generate());
        let identity = signer.address();

        let engine = conn.connect(identity, signer).await.unwrap();
        assert!(engine.verifier().is_verified());
        assert!(engine.is_loaded());
        assert_eq!(conn.identity(), Some(identity));
    }

    #[tokio::test]
    async fn test_reconnect_same_identity_reuses_engine() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        let signer = Arc::new(KeypairSigner::generate());
        let identity = signer.address();

        let first = conn.connect(identity, signer.clone()).await.unwrap();
        let second = conn.connect(identity, signer).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_identity_change_replaces_engine() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        let a = Arc::new(KeypairSigner::generate());
        let b = Arc::new(KeypairSigner::generate());

        let first = conn.connect(a.address(), a.clone()).await.unwrap();
        let second = conn.connect(b.address(), b.clone()).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.verifier().is_verified());
        assert_eq!(conn.identity(), Some(b.address()));
    }

    #[tokio::test]
    async fn test_open_works_offline() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_fail_reads(true);
        let conn = connection(ledger);
        let signer = Arc::new(KeypairSigner::generate());

        let engine = conn.open(signer.address(), signer).unwrap();
        engine.create_document().unwrap();
        assert!(!engine.verifier().is_verified());
        assert!(!engine.is_loaded());
        assert_eq!(engine.documents().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_resets_verification() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        let signer = Arc::new(KeypairSigner::generate());
        let engine = conn.connect(signer.address(), signer.clone()).await.unwrap();

        conn.disconnect();
        assert!(!engine.verifier().is_verified());
        assert!(conn.engine().is_none());
    }

    #[tokio::test]
    async fn test_denied_identity_stays_unloaded() {
        let conn = connection(Arc::new(MemoryLedger::new()));
        let signer = Arc::new(KeypairSigner::generate());
        // Signer controls a different address and holds no permissions
        let identity = Address::from_bytes([7; 20]);

        let result = conn.connect(identity, signer).await;
        assert!(matches!(result, Err(SyncError::VerificationDenied { .. })));
        assert!(!conn.require().unwrap().is_loaded());
    }
}
