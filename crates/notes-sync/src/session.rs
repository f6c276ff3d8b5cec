//! Historical edit sessions.
//!
//! A session holds a historical version of one document that the user is
//! previewing or editing. Sessions live in a single map keyed by document id;
//! which session is "being viewed" is derived from the current selection.

use crate::document::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Live title/body captured when the session was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalVersion {
    pub title: String,
    #[serde(rename = "content")]
    pub body: String,
}

/// A historical version of one document, possibly edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalEditSession {
    #[serde(rename = "noteId")]
    pub document_id: DocumentId,
    pub title: String,
    #[serde(rename = "content")]
    pub body: String,
    #[serde(rename = "originalVersion")]
    pub original: OriginalVersion,
}

impl HistoricalEditSession {
    /// Whether the session content differs from the live document it was opened over.
    pub fn differs_from_original(&self) -> bool {
        self.title != self.original.title || self.body != self.original.body
    }
}

/// All open sessions, at most one per document.
pub type SessionMap = BTreeMap<DocumentId, HistoricalEditSession>;
