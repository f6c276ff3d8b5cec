//! SyncEngine: the working set of notes and its publication to the ledger.
//!
//! Local edits go straight to the `LocalStore` and never touch remote state.
//! Saving works as follows:
//!
//! 1. Verify ownership of the identity (cached after the first grant)
//! 2. Apply the edit to the target document locally
//! 3. Build the publish set: every non-tombstoned document, with the target's
//!    previously published version appended to its history
//! 4. Put the set to the content store as one snapshot
//! 5. Point the ledger at the new snapshot
//! 6. Mark the published documents pinned and purge tombstones
//!
//! Nothing from step 6 happens unless step 5 succeeds, so pinned state always
//! reflects what the ledger points at.

use crate::address::Address;
use crate::config::EngineConfig;
use crate::content::{ContentError, ContentId, ContentStore};
use crate::document::{self, Document, DocumentId, FormatError, VersionRef};
use crate::events::{EventBus, SyncEvent};
use crate::ledger::{LedgerError, LedgerPointer, PermissionRegistry, PointerValue};
use crate::session::{HistoricalEditSession, OriginalVersion, SessionMap};
use crate::signer::Signer;
use crate::store::{LocalStore, StoreError};
use crate::verifier::{DenialReason, OwnershipVerifier, VerificationResult};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Verification denied: {reason}")]
    VerificationDenied { reason: DenialReason },

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Local storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("No identity connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<ContentError> for SyncError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::NotFound(id) => SyncError::NotFound(format!("snapshot {}", id)),
            ContentError::Unavailable(msg) => SyncError::RemoteUnavailable(msg),
        }
    }
}

impl From<LedgerError> for SyncError {
    fn from(e: LedgerError) -> Self {
        SyncError::RemoteUnavailable(e.to_string())
    }
}

impl From<FormatError> for SyncError {
    fn from(e: FormatError) -> Self {
        SyncError::Format(e.to_string())
    }
}

fn note_not_found(id: &str) -> SyncError {
    SyncError::NotFound(format!("note {}", id))
}

/// Local and remote collaborators shared by every engine.
///
/// The signer is not part of this set; it belongs to the connected identity.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn LocalStore>,
    pub content: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn LedgerPointer>,
    pub registry: Arc<dyn PermissionRegistry>,
}

/// What the editor should display for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentView {
    pub id: DocumentId,
    pub title: String,
    pub body: String,
    /// Showing an open historical edit session instead of the live document
    pub historical: bool,
}

/// Title and body a document had in the last snapshot the ledger pointed at.
#[derive(Debug, Clone)]
struct Published {
    title: String,
    body: String,
}

#[derive(Default)]
struct Workspace {
    documents: Vec<Document>,
    sessions: SessionMap,
    selected: Option<DocumentId>,
    /// Snapshot the ledger currently points at, as far as this engine knows
    current: Option<ContentId>,
    published: HashMap<DocumentId, Published>,
    loaded: bool,
}

/// Whether the live document should receive the edit before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalEdit {
    Apply,
    /// The payload comes from a historical session; the live document is only
    /// replaced once the ledger write succeeds.
    Defer,
}

/// Synchronization engine for one connected identity.
pub struct SyncEngine {
    identity: Address,
    config: EngineConfig,
    store: Arc<dyn LocalStore>,
    content: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerPointer>,
    verifier: OwnershipVerifier,
    events: Arc<EventBus>,
    state: Mutex<Workspace>,
    /// Serializes load, save and restore
    remote: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Create an engine over the working set already held in the local store.
    pub fn new(
        identity: Address,
        signer: Arc<dyn Signer>,
        collaborators: Collaborators,
        config: EngineConfig,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let documents = collaborators.store.load_documents()?;
        let sessions = collaborators.store.load_sessions()?;
        debug!(
            "Opened working set for {}: {} notes, {} open versions",
            identity.fmt_short(),
            documents.len(),
            sessions.len()
        );

        Ok(Self {
            identity,
            config,
            verifier: OwnershipVerifier::new(identity, signer, collaborators.registry),
            store: collaborators.store,
            content: collaborators.content,
            ledger: collaborators.ledger,
            events,
            state: Mutex::new(Workspace {
                documents,
                sessions,
                ..Workspace::default()
            }),
            remote: tokio::sync::Mutex::new(()),
        })
    }

    pub fn identity(&self) -> &Address {
        &self.identity
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn verifier(&self) -> &OwnershipVerifier {
        &self.verifier
    }

    fn state(&self) -> MutexGuard<'_, Workspace> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist then install a new working set.
    fn commit_documents(&self, ws: &mut Workspace, documents: Vec<Document>) -> Result<()> {
        self.store.save_documents(&documents)?;
        ws.documents = documents;
        Ok(())
    }

    /// Persist then install a new session map.
    fn commit_sessions(&self, ws: &mut Workspace, sessions: SessionMap) -> Result<()> {
        self.store.save_sessions(&sessions)?;
        ws.sessions = sessions;
        Ok(())
    }

    // ===== Verification =====

    /// Verify ownership of the identity, emitting a notification on denial.
    pub async fn verify(&self) -> Result<()> {
        match self.verifier.verify().await {
            VerificationResult::Granted => Ok(()),
            VerificationResult::Denied(reason) => {
                warn!(
                    "Verification denied for {}: {}",
                    self.identity.fmt_short(),
                    reason
                );
                self.events.emit(SyncEvent::VerificationDenied {
                    reason: reason.to_string(),
                });
                match reason {
                    DenialReason::LookupFailed(msg) => Err(SyncError::RemoteUnavailable(msg)),
                    reason => Err(SyncError::VerificationDenied { reason }),
                }
            }
        }
    }

    // ===== Load =====

    /// Fetch the published snapshot and merge it into the working set.
    ///
    /// Returns the number of published documents.
    pub async fn load(&self) -> Result<usize> {
        let _remote = self.remote.lock().await;
        self.load_locked().await
    }

    /// Load unless this engine already loaded once. Returns whether it loaded.
    pub async fn load_if_needed(&self) -> Result<bool> {
        let _remote = self.remote.lock().await;
        let loaded = self.state().loaded;
        if loaded {
            return Ok(false);
        }
        self.load_locked().await.map(|_| true)
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    async fn load_locked(&self) -> Result<usize> {
        match self.fetch_and_merge().await {
            Ok((count, content_id)) => {
                info!(
                    "Loaded {} published notes for {}",
                    count,
                    self.identity.fmt_short()
                );
                self.events.emit(SyncEvent::Loaded {
                    count,
                    content_id: content_id.map(|id| id.to_string()),
                });
                Ok(count)
            }
            Err(e) => {
                warn!("Load failed for {}: {}", self.identity.fmt_short(), e);
                self.events.emit(SyncEvent::LoadFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Read the pointer and fetch the snapshot it references.
    async fn fetch_published(&self) -> Result<Option<(ContentId, Vec<Document>)>> {
        let Some(pointer) = self.ledger.read(&self.identity).await? else {
            debug!("No snapshot published for {}", self.identity.fmt_short());
            return Ok(None);
        };

        let content_id = pointer.content_id();
        let bytes = self.content.get(&content_id).await?;
        if !pointer.verify(&bytes) {
            return Err(SyncError::Format(format!(
                "snapshot {} does not match the digest recorded on the ledger",
                content_id
            )));
        }

        let documents = document::normalize_snapshot(&bytes)?;
        Ok(Some((content_id, documents)))
    }

    async fn fetch_and_merge(&self) -> Result<(usize, Option<ContentId>)> {
        let Some((content_id, mut fetched)) = self.fetch_published().await? else {
            self.state().loaded = true;
            return Ok((0, None));
        };

        for doc in &mut fetched {
            doc.is_pinned = true;
        }
        let count = fetched.len();
        let published = published_state(&fetched);

        let mut ws = self.state();
        let local_only: Vec<Document> = {
            let fetched_ids: HashSet<&str> = fetched.iter().map(|d| d.id.as_str()).collect();
            ws.documents
                .iter()
                .filter(|d| !fetched_ids.contains(d.id.as_str()))
                .cloned()
                .collect()
        };
        debug!(
            "Merging {} published notes with {} local-only notes",
            count,
            local_only.len()
        );

        let mut merged = fetched;
        merged.extend(local_only);
        self.commit_documents(&mut ws, merged)?;
        ws.current = Some(content_id.clone());
        ws.published = published;
        ws.loaded = true;

        Ok((count, Some(content_id)))
    }

    /// Adopt the snapshot the ledger points at as the base for history
    /// without merging its documents into the working set.
    ///
    /// For a working set that already reflects that snapshot, e.g. one
    /// persisted by an earlier process that loaded or saved it.
    pub async fn track_published(&self) -> Result<Option<ContentId>> {
        let _remote = self.remote.lock().await;
        let Some((content_id, documents)) = self.fetch_published().await? else {
            return Ok(None);
        };

        let mut ws = self.state();
        ws.current = Some(content_id.clone());
        ws.published = published_state(&documents);
        debug!("Tracking published snapshot {}", content_id);
        Ok(Some(content_id))
    }

    // ===== Queries =====

    /// The working set, tombstoned documents included.
    pub fn documents(&self) -> Vec<Document> {
        self.state().documents.clone()
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.state().documents.iter().find(|d| d.id == id).cloned()
    }

    pub fn selected(&self) -> Option<DocumentId> {
        self.state().selected.clone()
    }

    /// Select a document (or clear the selection with `None`).
    pub fn select(&self, id: Option<&str>) -> Result<()> {
        let mut ws = self.state();
        match id {
            None => ws.selected = None,
            Some(id) => {
                if !ws.documents.iter().any(|d| d.id == id && !d.is_deleted) {
                    return Err(note_not_found(id));
                }
                ws.selected = Some(id.to_string());
            }
        }
        Ok(())
    }

    /// Snapshot the ledger points at, if known.
    pub fn current_content_id(&self) -> Option<ContentId> {
        self.state().current.clone()
    }

    /// Versions superseded by saves, oldest first.
    pub fn history(&self, id: &str) -> Result<Vec<VersionRef>> {
        self.state()
            .documents
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.history.clone())
            .ok_or_else(|| note_not_found(id))
    }

    pub fn session(&self, id: &str) -> Option<HistoricalEditSession> {
        self.state().sessions.get(id).cloned()
    }

    /// What to display for a document: its open session if any, else the live copy.
    pub fn view(&self, id: &str) -> Option<DocumentView> {
        let ws = self.state();
        view_of(&ws, id)
    }

    /// View of the selected document.
    pub fn current_view(&self) -> Option<DocumentView> {
        let ws = self.state();
        let id = ws.selected.as_deref()?;
        view_of(&ws, id)
    }

    /// Whether a document differs from what the ledger points at.
    pub fn is_modified(&self, id: &str) -> bool {
        let ws = self.state();
        ws.documents
            .iter()
            .find(|d| d.id == id)
            .is_some_and(|d| is_modified_in(&ws, d))
    }

    /// Whether any document has changes a save would publish.
    pub fn has_unsaved_changes(&self) -> bool {
        let ws = self.state();
        ws.documents.iter().any(|d| is_modified_in(&ws, d))
    }

    // ===== Local edits =====

    /// Create an empty document at the top of the working set and select it.
    pub fn create_document(&self) -> Result<DocumentId> {
        let doc = Document::new(&self.config.default_title, &self.config.default_body);
        let id = doc.id.clone();

        let mut ws = self.state();
        let mut documents = Vec::with_capacity(ws.documents.len() + 1);
        documents.push(doc);
        documents.extend(ws.documents.iter().cloned());
        self.commit_documents(&mut ws, documents)?;
        ws.selected = Some(id.clone());

        debug!("Created note {}", id);
        Ok(id)
    }

    /// Replace title and body. Routed into the open session if there is one.
    pub fn update_document(&self, id: &str, title: &str, body: &str) -> Result<()> {
        self.apply_edit(id, Some(title), Some(body))
    }

    pub fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.apply_edit(id, Some(title), None)
    }

    pub fn update_body(&self, id: &str, body: &str) -> Result<()> {
        self.apply_edit(id, None, Some(body))
    }

    fn apply_edit(&self, id: &str, title: Option<&str>, body: Option<&str>) -> Result<()> {
        let mut ws = self.state();

        if ws.sessions.contains_key(id) {
            let mut sessions = ws.sessions.clone();
            if let Some(session) = sessions.get_mut(id) {
                if let Some(title) = title {
                    session.title = title.to_string();
                }
                if let Some(body) = body {
                    session.body = body.to_string();
                }
            }
            return self.commit_sessions(&mut ws, sessions);
        }

        let mut documents = ws.documents.clone();
        let doc = documents
            .iter_mut()
            .find(|d| d.id == id && !d.is_deleted)
            .ok_or_else(|| note_not_found(id))?;
        if let Some(title) = title {
            doc.title = title.to_string();
        }
        if let Some(body) = body {
            doc.body = body.to_string();
        }
        doc.last_modified = document::now_millis();
        self.commit_documents(&mut ws, documents)
    }

    /// Tombstone a document after `confirm` approves it.
    ///
    /// The document stays in the working set until the next successful save.
    pub fn delete_document(&self, id: &str, confirm: impl FnOnce(&Document) -> bool) -> Result<()> {
        let target = self.document(id).ok_or_else(|| note_not_found(id))?;
        if target.is_deleted {
            return Ok(());
        }
        if !confirm(&target) {
            debug!("Deletion of {} cancelled", id);
            return Err(SyncError::UserCancelled);
        }

        {
            let mut ws = self.state();
            let mut documents = ws.documents.clone();
            let doc = documents
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| note_not_found(id))?;
            doc.is_deleted = true;
            self.commit_documents(&mut ws, documents)?;
            if ws.selected.as_deref() == Some(id) {
                ws.selected = None;
            }
        }

        info!("Marked {} for deletion", id);
        self.events.emit(SyncEvent::MarkedForDeletion {
            id: id.to_string(),
            title: target.title,
        });
        Ok(())
    }

    // ===== Save =====

    /// Save one document and publish the whole working set.
    pub async fn save_document(&self, id: &str, title: &str, body: &str) -> Result<ContentId> {
        let _remote = self.remote.lock().await;
        self.publish(id, title, body, LocalEdit::Apply).await
    }

    /// Save the selected document, or failing that the first one, flushing
    /// all pending deletions. `confirm` is asked to approve the tombstoned
    /// documents about to be purged.
    pub async fn save_all(
        &self,
        confirm: impl FnOnce(&[Document]) -> bool + Send,
    ) -> Result<ContentId> {
        let tombstoned: Vec<Document> = self
            .state()
            .documents
            .iter()
            .filter(|d| d.is_deleted)
            .cloned()
            .collect();
        if !tombstoned.is_empty() && !confirm(&tombstoned) {
            debug!("Save cancelled at deletion confirmation");
            return Err(SyncError::UserCancelled);
        }

        let (id, title, body) = {
            let ws = self.state();
            let target = ws
                .selected
                .as_deref()
                .and_then(|s| ws.documents.iter().find(|d| d.id == s && !d.is_deleted))
                .or_else(|| ws.documents.iter().find(|d| !d.is_deleted))
                .or_else(|| ws.documents.first())
                .ok_or_else(|| SyncError::NotFound("no notes to save".into()))?;
            (target.id.clone(), target.title.clone(), target.body.clone())
        };

        self.save_document(&id, &title, &body).await
    }

    /// Verify then publish. Caller holds the remote lock.
    ///
    /// An engine that has neither loaded nor tracked the published snapshot
    /// loads it first, so the publish set includes published notes this
    /// working set has never seen.
    async fn publish(&self, id: &str, title: &str, body: &str, edit: LocalEdit) -> Result<ContentId> {
        self.verify().await?;

        let needs_base = {
            let ws = self.state();
            !ws.loaded && ws.current.is_none()
        };
        if needs_base {
            debug!("Loading published notes before first save of {}", id);
            self.load_locked().await?;
        }

        let result = self.publish_verified(id, title, body, edit).await;
        if let Err(e) = &result {
            warn!("Save of {} failed: {}", id, e);
            self.events.emit(SyncEvent::SaveFailed {
                id: id.to_string(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn publish_verified(
        &self,
        id: &str,
        title: &str,
        body: &str,
        edit: LocalEdit,
    ) -> Result<ContentId> {
        let now = document::now_millis();

        let snapshot = {
            let mut ws = self.state();
            let index = ws
                .documents
                .iter()
                .position(|d| d.id == id)
                .ok_or_else(|| note_not_found(id))?;

            if edit == LocalEdit::Apply && !ws.documents[index].is_deleted {
                let mut documents = ws.documents.clone();
                let doc = &mut documents[index];
                doc.title = title.to_string();
                doc.body = body.to_string();
                doc.last_modified = now;
                self.commit_documents(&mut ws, documents)?;
            }

            build_publish_set(&ws, id, title, body, now)
        };

        let bytes = document::encode_snapshot(&snapshot)?;
        let content_id = self.content.put(bytes.clone()).await?;
        debug!(
            "Published snapshot {} with {} notes",
            content_id,
            snapshot.len()
        );

        let pointer = PointerValue::for_snapshot(&content_id, &bytes);
        if let Err(e) = self.ledger.write(&self.identity, pointer).await {
            warn!(
                "Pointer write failed, snapshot {} left unreferenced: {}",
                content_id, e
            );
            return Err(e.into());
        }

        let dropped = self.commit_published(id, edit, &content_id, &snapshot);
        info!(
            "Saved {} as {} ({} deletions purged)",
            id, content_id, dropped
        );
        self.events.emit(SyncEvent::Saved {
            id: id.to_string(),
            content_id: content_id.to_string(),
            dropped,
        });
        Ok(content_id)
    }

    /// Reconcile the working set with a snapshot the ledger now points at.
    ///
    /// The target keeps any edit made while the save was in flight, unless
    /// its payload came from a historical session, whose session is closed.
    /// Returns the number of tombstoned documents purged.
    fn commit_published(
        &self,
        target: &str,
        edit: LocalEdit,
        content_id: &ContentId,
        snapshot: &[Document],
    ) -> usize {
        let published: HashMap<&str, &Document> =
            snapshot.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut ws = self.state();
        let before = ws.documents.len();
        let documents: Vec<Document> = ws
            .documents
            .iter()
            .filter_map(|d| match published.get(d.id.as_str()) {
                Some(copy) if d.id == target && !d.is_deleted => {
                    let mut doc = d.clone();
                    if edit == LocalEdit::Defer {
                        doc.title = copy.title.clone();
                        doc.body = copy.body.clone();
                    }
                    doc.history = copy.history.clone();
                    doc.created_at = copy.created_at;
                    doc.last_modified = doc.last_modified.max(copy.last_modified);
                    doc.is_pinned = true;
                    Some(doc)
                }
                Some(_) => {
                    let mut doc = d.clone();
                    doc.is_pinned = true;
                    Some(doc)
                }
                None if d.is_deleted => None,
                None => Some(d.clone()),
            })
            .collect();
        let dropped = before - documents.len();

        let (sessions, selection_dropped) = {
            let kept: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
            let sessions: SessionMap = ws
                .sessions
                .iter()
                .filter(|(id, _)| kept.contains(id.as_str()))
                .filter(|(id, _)| edit == LocalEdit::Apply || id.as_str() != target)
                .map(|(id, session)| (id.clone(), session.clone()))
                .collect();
            let selection_dropped = ws.selected.as_deref().is_some_and(|s| !kept.contains(s));
            (sessions, selection_dropped)
        };
        let sessions_changed = sessions.len() != ws.sessions.len();
        if selection_dropped {
            ws.selected = None;
        }

        // The ledger already points at the new snapshot: memory follows it
        // and a local write failure no longer fails the save.
        ws.current = Some(content_id.clone());
        ws.published = published_state(snapshot);
        ws.documents = documents;
        if let Err(e) = self.store.save_documents(&ws.documents) {
            warn!("Saved {} but could not persist the working set: {}", content_id, e);
        }
        if sessions_changed {
            ws.sessions = sessions;
            if let Err(e) = self.store.save_sessions(&ws.sessions) {
                warn!("Saved {} but could not persist open versions: {}", content_id, e);
            }
        }

        dropped
    }

    // ===== Historical versions =====

    /// Open the version of `id` held in snapshot `content_id` for preview.
    ///
    /// The live document is untouched; edits to `id` go to the session until
    /// it is applied or cancelled. Selects the document.
    pub async fn restore_version(&self, id: &str, content_id: &ContentId) -> Result<()> {
        let _remote = self.remote.lock().await;
        self.verify().await?;

        let bytes = self.content.get(content_id).await?;
        let historical = document::normalize_snapshot(&bytes)?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| {
                SyncError::NotFound(format!("note {} in version {}", id, content_id))
            })?;

        {
            let mut ws = self.state();
            let live = ws
                .documents
                .iter()
                .find(|d| d.id == id && !d.is_deleted)
                .ok_or_else(|| note_not_found(id))?;
            let session = HistoricalEditSession {
                document_id: id.to_string(),
                title: historical.title,
                body: historical.body,
                original: OriginalVersion {
                    title: live.title.clone(),
                    body: live.body.clone(),
                },
            };

            let mut sessions = ws.sessions.clone();
            sessions.insert(id.to_string(), session);
            self.commit_sessions(&mut ws, sessions)?;
            ws.selected = Some(id.to_string());
        }

        info!("Opened version {} of {}", content_id, id);
        self.events.emit(SyncEvent::VersionLoaded {
            id: id.to_string(),
            content_id: content_id.to_string(),
        });
        Ok(())
    }

    /// Save the open session's content as the live document and close it.
    ///
    /// If the save fails before the ledger write, the session stays open so it
    /// can be retried.
    pub async fn apply_historical_version(&self, id: &str) -> Result<ContentId> {
        let _remote = self.remote.lock().await;
        let session = self
            .session(id)
            .ok_or_else(|| SyncError::NotFound(format!("no open version for note {}", id)))?;

        let content_id = self
            .publish(id, &session.title, &session.body, LocalEdit::Defer)
            .await?;

        info!("Applied historical version of {}", id);
        self.events.emit(SyncEvent::VersionApplied { id: id.to_string() });
        Ok(content_id)
    }

    /// Discard the open session. The live document is unaffected.
    pub fn cancel_historical_version(&self, id: &str) -> Result<()> {
        if !self.close_session(id)? {
            return Err(SyncError::NotFound(format!("no open version for note {}", id)));
        }
        debug!("Cancelled historical version of {}", id);
        self.events.emit(SyncEvent::VersionCancelled { id: id.to_string() });
        Ok(())
    }

    fn close_session(&self, id: &str) -> Result<bool> {
        let mut ws = self.state();
        if !ws.sessions.contains_key(id) {
            return Ok(false);
        }
        let mut sessions = ws.sessions.clone();
        sessions.remove(id);
        self.commit_sessions(&mut ws, sessions)?;
        Ok(true)
    }
}

fn published_state(documents: &[Document]) -> HashMap<DocumentId, Published> {
    documents
        .iter()
        .map(|d| {
            (
                d.id.clone(),
                Published {
                    title: d.title.clone(),
                    body: d.body.clone(),
                },
            )
        })
        .collect()
}

/// Non-tombstoned documents as they will be published, with `target` carrying
/// the new title/body and, if it was pinned, a reference to the snapshot it
/// is superseding.
fn build_publish_set(ws: &Workspace, target: &str, title: &str, body: &str, now: u64) -> Vec<Document> {
    ws.documents
        .iter()
        .filter(|d| !d.is_deleted)
        .map(|d| {
            let mut doc = d.clone();
            if doc.id == target {
                if let (true, Some(previous)) = (d.is_pinned, &ws.current) {
                    let previous_title = ws
                        .published
                        .get(&d.id)
                        .map(|p| p.title.clone())
                        .unwrap_or_else(|| d.title.clone());
                    doc.history.push(VersionRef {
                        cid: previous.to_string(),
                        timestamp: now,
                        title: previous_title,
                    });
                }
                doc.title = title.to_string();
                doc.body = body.to_string();
                doc.last_modified = now;
                doc.created_at.get_or_insert(now);
            }
            doc.is_pinned = true;
            doc
        })
        .collect()
}

fn view_of(ws: &Workspace, id: &str) -> Option<DocumentView> {
    if let Some(session) = ws.sessions.get(id) {
        return Some(DocumentView {
            id: id.to_string(),
            title: session.title.clone(),
            body: session.body.clone(),
            historical: true,
        });
    }
    ws.documents
        .iter()
        .find(|d| d.id == id && !d.is_deleted)
        .map(|d| DocumentView {
            id: d.id.clone(),
            title: d.title.clone(),
            body: d.body.clone(),
            historical: false,
        })
}

fn is_modified_in(ws: &Workspace, doc: &Document) -> bool {
    doc.is_deleted
        || !doc.is_pinned
        || ws
            .published
            .get(&doc.id)
            .is_some_and(|p| p.title != doc.title || p.body != doc.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentStore;
    use crate::ledger::MemoryLedger;
    use crate::signer::KeypairSigner;
    use crate::store::MemoryStore;

    struct Harness {
        engine: SyncEngine,
        store: Arc<MemoryStore>,
        content: Arc<MemoryContentStore>,
        ledger: Arc<MemoryLedger>,
    }

    fn harness() -> Harness {
        let signer = KeypairSigner::generate();
        let identity = signer.address();
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let collaborators = Collaborators {
            store: store.clone(),
            content: content.clone(),
            ledger: ledger.clone(),
            registry: ledger.clone(),
        };
        let engine = SyncEngine::new(
            identity,
            Arc::new(signer),
            collaborators,
            EngineConfig::default(),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        Harness {
            engine,
            store,
            content,
            ledger,
        }
    }

    #[test]
    fn test_create_prepends_and_selects() {
        let h = harness();
        let first = h.engine.create_document().unwrap();
        let second = h.engine.create_document().unwrap();

        let ids: Vec<_> = h.engine.documents().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![second.clone(), first]);
        assert_eq!(h.engine.selected(), Some(second));
        assert_eq!(h.store.load_documents().unwrap().len(), 2);
    }

    #[test]
    fn test_new_document_uses_configured_defaults() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        let doc = h.engine.document(&id).unwrap();
        assert_eq!(doc.title, "Untitled Note");
        assert_eq!(doc.body, EngineConfig::default().default_body);
        assert!(!doc.is_pinned);
    }

    #[test]
    fn test_select_rejects_unknown_and_tombstoned() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        assert!(matches!(
            h.engine.select(Some("missing")),
            Err(SyncError::NotFound(_))
        ));

        h.engine.delete_document(&id, |_| true).unwrap();
        assert!(matches!(h.engine.select(Some(&id)), Err(SyncError::NotFound(_))));
        h.engine.select(None).unwrap();
    }

    #[test]
    fn test_partial_edits() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        h.engine.update_title(&id, "Groceries").unwrap();
        h.engine.update_body(&id, "milk").unwrap();

        let doc = h.engine.document(&id).unwrap();
        assert_eq!(doc.title, "Groceries");
        assert_eq!(doc.body, "milk");
    }

    #[test]
    fn test_edit_tombstoned_is_not_found() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        h.engine.delete_document(&id, |_| true).unwrap();
        assert!(matches!(
            h.engine.update_title(&id, "x"),
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_declined_delete_keeps_document() {
        let h = harness();
        let id = h.engine.create_document().unwrap();

        let result = h.engine.delete_document(&id, |doc| {
            assert_eq!(doc.title, "Untitled Note");
            false
        });
        assert!(matches!(result, Err(SyncError::UserCancelled)));
        assert!(!h.engine.document(&id).unwrap().is_deleted);
        assert_eq!(h.engine.selected(), Some(id));
    }

    #[test]
    fn test_delete_clears_selection() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        h.engine.delete_document(&id, |_| true).unwrap();

        assert!(h.engine.document(&id).unwrap().is_deleted);
        assert_eq!(h.engine.selected(), None);
        assert_eq!(h.engine.current_view(), None);
    }

    #[test]
    fn test_storage_failure_leaves_memory_unchanged() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        h.store.set_fail_writes(true);

        assert!(matches!(
            h.engine.update_title(&id, "lost"),
            Err(SyncError::Storage(_))
        ));
        assert_eq!(h.engine.document(&id).unwrap().title, "Untitled Note");
    }

    #[tokio::test]
    async fn test_save_all_prefers_selection() {
        let h = harness();
        let a = h.engine.create_document().unwrap();
        let b = h.engine.create_document().unwrap();
        h.engine.update_title(&a, "A").unwrap();
        h.engine.select(Some(&a)).unwrap();

        h.engine.save_all(|_| true).await.unwrap();

        // Everything not tombstoned is published and pinned
        assert!(h.engine.document(&a).unwrap().is_pinned);
        assert!(h.engine.document(&b).unwrap().is_pinned);
        assert!(!h.engine.has_unsaved_changes());
        assert_eq!(h.ledger.write_count(), 1);
    }

    #[tokio::test]
    async fn test_save_all_declined_confirmation() {
        let h = harness();
        let a = h.engine.create_document().unwrap();
        h.engine.create_document().unwrap();
        h.engine.delete_document(&a, |_| true).unwrap();

        let result = h.engine.save_all(|tombstoned| {
            assert_eq!(tombstoned.len(), 1);
            false
        });
        assert!(matches!(result.await, Err(SyncError::UserCancelled)));
        assert_eq!(h.content.put_count(), 0);
        assert!(h.engine.document(&a).is_some());
    }

    #[tokio::test]
    async fn test_save_all_with_only_tombstones_flushes_them() {
        let h = harness();
        let a = h.engine.create_document().unwrap();
        h.engine.delete_document(&a, |_| true).unwrap();

        h.engine.save_all(|_| true).await.unwrap();
        assert!(h.engine.documents().is_empty());

        let published = h.ledger.pointer(h.engine.identity()).unwrap();
        let bytes = h.content.get(&published.content_id()).await.unwrap();
        assert!(document::normalize_snapshot(&bytes).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_all_with_nothing_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.engine.save_all(|_| true).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_is_modified_tracks_published_state() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        assert!(h.engine.is_modified(&id));

        h.engine.save_document(&id, "Saved", "body").await.unwrap();
        assert!(!h.engine.is_modified(&id));

        h.engine.update_body(&id, "changed").unwrap();
        assert!(h.engine.is_modified(&id));
        assert!(h.engine.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_load_if_needed_loads_once() {
        let h = harness();
        assert!(h.engine.load_if_needed().await.unwrap());
        assert!(!h.engine.load_if_needed().await.unwrap());
        assert!(h.engine.is_loaded());
    }

    #[tokio::test]
    async fn test_load_rejects_digest_mismatch() {
        let h = harness();
        let real = h.content.insert(b"[]".to_vec());
        let mut pointer = PointerValue::for_snapshot(&real, b"[]");
        pointer.hash = Some(hex::encode([0u8; 32]));
        h.ledger.write(h.engine.identity(), pointer).await.unwrap();

        assert!(matches!(h.engine.load().await, Err(SyncError::Format(_))));
        assert!(!h.engine.is_loaded());
    }

    #[tokio::test]
    async fn test_load_accepts_legacy_pointer_without_digest() {
        let h = harness();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "notes": [{"id": "n1", "title": "Old", "content": "[]", "lastModified": 1}]
        }))
        .unwrap();
        let cid = h.content.insert(bytes);
        h.ledger
            .write(h.engine.identity(), PointerValue::from_url(format!("ipfs://{}", cid)))
            .await
            .unwrap();

        assert_eq!(h.engine.load().await.unwrap(), 1);
        let doc = h.engine.document("n1").unwrap();
        assert!(doc.is_pinned);
        assert_eq!(h.engine.current_content_id(), Some(cid));
    }

    #[tokio::test]
    async fn test_track_published_keeps_local_edits() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        let first = h.engine.save_document(&id, "Published", "v1").await.unwrap();

        // A later process over the same store and ledger
        let collaborators = Collaborators {
            store: h.store.clone(),
            content: h.content.clone(),
            ledger: h.ledger.clone(),
            registry: h.ledger.clone(),
        };
        let signer = Arc::new(KeypairSigner::generate());
        let later = SyncEngine::new(
            *h.engine.identity(),
            signer,
            collaborators,
            EngineConfig::default(),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        later.update_body(&id, "local edit").unwrap();

        assert_eq!(later.track_published().await.unwrap(), Some(first.clone()));
        assert_eq!(later.document(&id).unwrap().body, "local edit");
        assert!(later.is_modified(&id));
        assert!(!later.is_loaded());
        assert_eq!(later.current_content_id(), Some(first));
    }

    #[tokio::test]
    async fn test_cancel_without_session_is_not_found() {
        let h = harness();
        let id = h.engine.create_document().unwrap();
        assert!(matches!(
            h.engine.cancel_historical_version(&id),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.apply_historical_version(&id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_error_conversions() {
        let e: SyncError = ContentError::NotFound(ContentId::new("abc")).into();
        assert!(matches!(e, SyncError::NotFound(_)));

        let e: SyncError = ContentError::Unavailable("down".into()).into();
        assert!(matches!(e, SyncError::RemoteUnavailable(_)));

        let e: SyncError = LedgerError::Rejected("reverted".into()).into();
        assert!(matches!(e, SyncError::RemoteUnavailable(_)));

        let e = SyncError::VerificationDenied {
            reason: DenialReason::InsufficientPermission,
        };
        assert_eq!(e.to_string(), "Verification denied: insufficient-permission");
    }
}
