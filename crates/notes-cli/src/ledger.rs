//! File-backed ledger for running without a chain.
//!
//! `ledger.json` in the data directory holds each identity's pointer and its
//! registered controllers:
//!
//! ```json
//! {
//!   "pointers": { "0x…": { "url": "ipfs://…", "hash": "…" } },
//!   "controllers": { "0x…": [ { "address": "0x…", "permissions": "0x…" } ] }
//! }
//! ```

use async_trait::async_trait;
use notes_sync::ledger::{LedgerError, LedgerPointer, PermissionRegistry, Permissions, PointerValue, Result};
use notes_sync::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

pub const LEDGER_FILE: &str = "ledger.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ControllerEntry {
    address: Address,
    /// 32-byte permission value, `0x` hex
    permissions: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    pointers: BTreeMap<Address, PointerValue>,
    #[serde(default)]
    controllers: BTreeMap<Address, Vec<ControllerEntry>>,
}

pub struct FileLedger {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn read_file(&self) -> Result<LedgerFile> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| LedgerError::Unavailable(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(e) => Err(LedgerError::Unavailable(e.to_string())),
        }
    }

    async fn write_file(&self, ledger: &LedgerFile) -> Result<()> {
        let rejected = |e: std::io::Error| LedgerError::Rejected(e.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(rejected)?;
        }
        let contents =
            serde_json::to_string_pretty(ledger).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).await.map_err(rejected)?;
        fs::rename(&tmp, &self.path).await.map_err(rejected)
    }

    /// Register `controller` on `identity` with the given permissions,
    /// replacing any previous grant.
    pub async fn grant(&self, identity: Address, controller: Address, permissions: Permissions) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.read_file().await?;

        let entries = ledger.controllers.entry(identity).or_default();
        entries.retain(|entry| entry.address != controller);
        entries.push(ControllerEntry {
            address: controller,
            permissions: permissions.to_hex(),
        });

        self.write_file(&ledger).await?;
        info!(
            "Granted {} to {} on {}",
            permissions.to_hex(),
            controller.fmt_short(),
            identity.fmt_short()
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerPointer for FileLedger {
    async fn read(&self, identity: &Address) -> Result<Option<PointerValue>> {
        Ok(self.read_file().await?.pointers.remove(identity))
    }

    async fn write(&self, identity: &Address, value: PointerValue) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.read_file().await?;
        ledger.pointers.insert(*identity, value);
        self.write_file(&ledger).await
    }
}

#[async_trait]
impl PermissionRegistry for FileLedger {
    async fn controllers(&self, identity: &Address) -> Result<Vec<Address>> {
        Ok(self
            .read_file()
            .await?
            .controllers
            .remove(identity)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.address)
            .collect())
    }

    async fn permissions(&self, identity: &Address, controller: &Address) -> Result<Option<Vec<u8>>> {
        let ledger = self.read_file().await?;
        let Some(entry) = ledger
            .controllers
            .get(identity)
            .and_then(|entries| entries.iter().find(|entry| entry.address == *controller))
        else {
            return Ok(None);
        };

        let digits = entry
            .permissions
            .strip_prefix("0x")
            .unwrap_or(&entry.permissions);
        hex::decode(digits)
            .map(Some)
            .map_err(|e| LedgerError::Unavailable(format!("bad permission value: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notes_sync::ContentId;
    use tempfile::TempDir;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedger::new(temp_dir.path().join(LEDGER_FILE));

        assert_eq!(ledger.read(&addr(1)).await.unwrap(), None);
        assert!(ledger.controllers(&addr(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pointer_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(LEDGER_FILE);
        let id = ContentId::for_bytes(b"[]");

        FileLedger::new(path.clone())
            .write(&addr(1), PointerValue::for_snapshot(&id, b"[]"))
            .await
            .unwrap();

        let reopened = FileLedger::new(path);
        let pointer = reopened.read(&addr(1)).await.unwrap().unwrap();
        assert_eq!(pointer.content_id(), id);
        assert!(pointer.verify(b"[]"));
        assert_eq!(reopened.read(&addr(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_grant_replaces_previous_entry() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedger::new(temp_dir.path().join(LEDGER_FILE));

        ledger.grant(addr(1), addr(2), Permissions::SET_DATA).await.unwrap();
        ledger.grant(addr(1), addr(2), Permissions::SIGN).await.unwrap();

        assert_eq!(ledger.controllers(&addr(1)).await.unwrap(), vec![addr(2)]);
        let raw = ledger.permissions(&addr(1), &addr(2)).await.unwrap().unwrap();
        assert_eq!(Permissions::decode(&raw), Some(Permissions::SIGN));
        assert!(ledger.permissions(&addr(1), &addr(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(LEDGER_FILE);
        std::fs::write(&path, "[").unwrap();

        let ledger = FileLedger::new(path);
        assert!(matches!(
            ledger.read(&addr(1)).await,
            Err(LedgerError::Unavailable(_))
        ));
    }
}
