//! Document: a single note and the snapshot format it is published in.
//!
//! Field names follow the published snapshot format so that snapshots written
//! by older clients stay readable:
//! - `content` holds the serialized rich-text body
//! - `previousVersions` holds the per-document history
//! - `isDeleted` is omitted unless the note is tombstoned

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use web_time::{SystemTime, UNIX_EPOCH};

/// Stable, client-allocated document identifier (UUID v4 string).
pub type DocumentId = String;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecognized snapshot shape: expected a note array, a single note, or {{\"notes\": [...]}}")]
    UnrecognizedShape,
}

/// A reference to a prior published state of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    /// Content id of the snapshot that held this version
    pub cid: String,
    /// When the version was superseded, in milliseconds since Unix epoch
    pub timestamp: u64,
    /// Title the document had in that snapshot
    pub title: String,
}

/// A note in the working set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    /// Serialized rich-content body
    #[serde(rename = "content", default, deserialize_with = "body_text")]
    pub body: String,
    #[serde(default)]
    pub last_modified: u64,
    /// The current body is published and reachable from the ledger pointer
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// Append-only, oldest first
    #[serde(rename = "previousVersions", default)]
    pub history: Vec<VersionRef>,
    /// Tombstone; dropped on the next successful save
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_deleted: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Bodies are normally a string of serialized rich text; a structured body is
/// kept as its JSON text.
fn body_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Document {
    /// Create a new, unpublished document with a fresh id.
    pub fn new(title: &str, body: &str) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            body: body.to_string(),
            last_modified: now,
            is_pinned: false,
            created_at: Some(now),
            history: Vec::new(),
            is_deleted: false,
        }
    }
}

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Normalize a fetched snapshot into a list of documents.
///
/// Accepts the three shapes found in published snapshots:
/// - a bare array of notes (current format)
/// - a single note object (must carry `id` and `title`)
/// - an object with a `notes` array
pub fn normalize_snapshot(bytes: &[u8]) -> Result<Vec<Document>, FormatError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let is_single_note = matches!(
        &value,
        serde_json::Value::Object(map) if map.contains_key("id") && map.contains_key("title")
    );

    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(_) if is_single_note => Ok(vec![serde_json::from_value(value)?]),
        serde_json::Value::Object(mut map) => match map.remove("notes") {
            Some(notes @ serde_json::Value::Array(_)) => Ok(serde_json::from_value(notes)?),
            _ => Err(FormatError::UnrecognizedShape),
        },
        _ => Err(FormatError::UnrecognizedShape),
    }
}

/// Encode a publish set as a snapshot (bare JSON array).
pub fn encode_snapshot(documents: &[Document]) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec(documents)?)
}
