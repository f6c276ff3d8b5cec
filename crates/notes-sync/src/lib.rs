//! notes-sync: Synchronization and versioning engine for ledger-anchored notes.
//!
//! This crate provides the core functionality for:
//! - Keeping a working set of notes in a local store, edited offline
//! - Publishing the whole set as one content-addressed snapshot
//! - Pointing an identity's ledger entry at the latest snapshot
//! - Verifying that the connected key controls the identity
//! - Previewing, editing and re-applying historical versions
//! - LocalStore, ContentStore, LedgerPointer and Signer trait abstractions

pub mod address;
pub mod config;
pub mod connection;
pub mod content;
pub mod document;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod session;
pub mod signer;
pub mod store;
pub mod verifier;

pub use address::{Address, AddressError};
pub use config::EngineConfig;
pub use connection::Connection;
pub use content::{ContentError, ContentId, ContentStore, MemoryContentStore};
pub use document::{Document, DocumentId, FormatError, VersionRef};
pub use engine::{Collaborators, DocumentView, SyncEngine, SyncError};
pub use events::{EventBus, Subscription, SyncEvent};
pub use ledger::{LedgerError, LedgerPointer, MemoryLedger, PermissionRegistry, Permissions, PointerValue};
pub use session::{HistoricalEditSession, OriginalVersion, SessionMap};
pub use signer::{KeypairSigner, SignError, SignedMessage, Signer};
pub use store::{LocalStore, MemoryStore, StoreError};
pub use verifier::{DenialReason, OwnershipVerifier, VerificationResult};
