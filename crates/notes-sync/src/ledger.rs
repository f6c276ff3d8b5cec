//! Ledger abstractions: the per-identity snapshot pointer and controller permissions.
//!
//! The ledger holds exactly one pointer value per identity. It references the
//! most recently published snapshot as a verifiable URI: the snapshot's
//! location plus a digest of its bytes.
//!
//! Implementations:
//! - `MemoryLedger` - For testing
//! - `FileLedger` (in notes-cli) - JSON file on local disk

use crate::address::Address;
use crate::content::ContentId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// URL scheme used for snapshot locations.
pub const POINTER_SCHEME: &str = "ipfs://";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger write rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Pointer to a snapshot, with a digest for verifying fetched bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerValue {
    /// Snapshot location, e.g. `ipfs://<cid>`
    pub url: String,
    /// Hex SHA-256 of the snapshot bytes (absent on legacy pointers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl PointerValue {
    /// Build a pointer to a freshly published snapshot.
    pub fn for_snapshot(id: &ContentId, bytes: &[u8]) -> Self {
        Self {
            url: format!("{}{}", POINTER_SCHEME, id),
            hash: Some(hex::encode(Sha256::digest(bytes))),
        }
    }

    /// Pointer without a digest (legacy values carried only a URL).
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hash: None,
        }
    }

    /// Content id referenced by this pointer.
    pub fn content_id(&self) -> ContentId {
        ContentId::new(self.url.strip_prefix(POINTER_SCHEME).unwrap_or(&self.url))
    }

    /// Check fetched bytes against the recorded digest.
    ///
    /// Pointers without a digest accept any bytes.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        match &self.hash {
            Some(expected) => expected.eq_ignore_ascii_case(&hex::encode(Sha256::digest(bytes))),
            None => true,
        }
    }
}

/// Single-valued, per-identity pointer storage on the ledger.
#[async_trait]
pub trait LedgerPointer: Send + Sync {
    /// Read the current pointer (None if the identity never published)
    async fn read(&self, identity: &Address) -> Result<Option<PointerValue>>;

    /// Replace the pointer
    async fn write(&self, identity: &Address, value: PointerValue) -> Result<()>;
}

/// 256-bit permission bitset granted to a controller, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions([u8; 32]);

impl Permissions {
    pub const NONE: Permissions = Permissions::from_u64(0);
    /// May change data keys on the identity (includes the pointer)
    pub const SET_DATA: Permissions = Permissions::from_u64(0x40000);
    /// May sign messages on behalf of the identity
    pub const SIGN: Permissions = Permissions::from_u64(0x200000);

    pub const fn from_u64(bits: u64) -> Self {
        let be = bits.to_be_bytes();
        let mut bytes = [0u8; 32];
        let mut i = 0;
        while i < 8 {
            bytes[24 + i] = be[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Decode a raw 32-byte permission value as stored on the ledger.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = raw.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// All bits of `other` are set in `self`.
    pub fn contains(&self, other: Permissions) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(mine, wanted)| mine & wanted == *wanted)
    }

    pub fn union(self, other: Permissions) -> Self {
        let mut bytes = self.0;
        for (b, o) in bytes.iter_mut().zip(other.0.iter()) {
            *b |= o;
        }
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits).ok()?;
        Self::decode(&raw)
    }
}

/// Lookup of controllers registered against an identity and their permissions.
#[async_trait]
pub trait PermissionRegistry: Send + Sync {
    /// Controller addresses registered for the identity
    async fn controllers(&self, identity: &Address) -> Result<Vec<Address>>;

    /// Raw permission value for one controller (None if unset)
    async fn permissions(&self, identity: &Address, controller: &Address) -> Result<Option<Vec<u8>>>;
}

/// In-memory ledger for testing
#[derive(Default)]
pub struct MemoryLedger {
    pointers: RwLock<HashMap<Address, PointerValue>>,
    controllers: RwLock<HashMap<Address, Vec<(Address, Vec<u8>)>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller for an identity with the given permissions
    pub fn grant(&self, identity: Address, controller: Address, permissions: Permissions) {
        self.grant_raw(identity, controller, permissions.encode());
    }

    /// Register a controller with an arbitrary raw permission value
    pub fn grant_raw(&self, identity: Address, controller: Address, raw: Vec<u8>) {
        let mut controllers = self.controllers.write().unwrap_or_else(|e| e.into_inner());
        let entries = controllers.entry(identity).or_default();
        entries.retain(|(c, _)| *c != controller);
        entries.push((controller, raw));
    }

    /// Current pointer without going through the trait
    pub fn pointer(&self, identity: &Address) -> Option<PointerValue> {
        self.pointers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    /// Number of successful pointer writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerPointer for MemoryLedger {
    async fn read(&self, identity: &Address) -> Result<Option<PointerValue>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("rpc endpoint unreachable".into()));
        }
        Ok(self.pointer(identity))
    }

    async fn write(&self, identity: &Address, value: PointerValue) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Rejected("transaction reverted".into()));
        }
        self.pointers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*identity, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PermissionRegistry for MemoryLedger {
    async fn controllers(&self, identity: &Address) -> Result<Vec<Address>> {
        Ok(self
            .controllers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .map(|entries| entries.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default())
    }

    async fn permissions(&self, identity: &Address, controller: &Address) -> Result<Option<Vec<u8>>> {
        Ok(self
            .controllers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .and_then(|entries| entries.iter().find(|(c, _)| c == controller))
            .map(|(_, raw)| raw.clone()))
    }
}
