//! notes-cli library: native collaborators for notes-sync.
//!
//! Exposes the file-backed store, content stores, and local ledger so
//! integration tests can drive the same pieces the `notes` binary uses.

pub mod app;
pub mod config;
pub mod http;
pub mod keys;
pub mod ledger;
pub mod native_fs;
pub mod persistence;

// Re-export key types for convenience
pub use app::{App, AppOptions};
pub use config::load_engine_config;
pub use http::HttpContentStore;
pub use ledger::FileLedger;
pub use native_fs::FsContentStore;
pub use persistence::{JsonFileStore, SyncStateStorage};
