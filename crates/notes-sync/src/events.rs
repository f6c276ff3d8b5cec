//! Event infrastructure for notes-sync.
//!
//! The engine reports outcomes as `SyncEvent`s on an `EventBus`. Front ends
//! subscribe to turn them into user-visible notifications.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Published documents fetched and merged into the working set.
    Loaded {
        /// Number of documents in the fetched snapshot.
        count: usize,
        /// Snapshot the ledger pointed at (None if nothing was published yet).
        #[serde(rename = "contentId")]
        content_id: Option<String>,
    },
    /// Loading published documents failed; local state is untouched.
    LoadFailed { message: String },
    /// Ownership verification did not grant access.
    VerificationDenied { reason: String },
    /// Document tombstoned; permanent after the next save.
    MarkedForDeletion { id: String, title: String },
    /// Save completed: snapshot published and pointer updated.
    Saved {
        id: String,
        #[serde(rename = "contentId")]
        content_id: String,
        /// Tombstoned documents purged by this save.
        dropped: usize,
    },
    /// Save failed; pinned state is unchanged.
    SaveFailed { id: String, message: String },
    /// Historical version opened for preview/editing.
    VersionLoaded {
        id: String,
        #[serde(rename = "contentId")]
        content_id: String,
    },
    /// Historical version saved as the live document.
    VersionApplied { id: String },
    /// Historical version discarded.
    VersionCancelled { id: String },
}

impl SyncEvent {
    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncEvent::LoadFailed { .. } | SyncEvent::VerificationDenied { .. } | SyncEvent::SaveFailed { .. }
        )
    }

    /// Short user-facing description.
    pub fn message(&self) -> String {
        match self {
            SyncEvent::Loaded { count, .. } => format!("Loaded {} published note(s)", count),
            SyncEvent::LoadFailed { message } => format!("Failed to load pinned notes: {}", message),
            SyncEvent::VerificationDenied { reason } => {
                format!("Ownership verification failed: {}", reason)
            }
            SyncEvent::MarkedForDeletion { title, .. } => format!(
                "\"{}\" marked for deletion. Save to make this permanent.",
                title
            ),
            SyncEvent::Saved { content_id, .. } => format!("Notes saved ({})", content_id),
            SyncEvent::SaveFailed { message, .. } => format!("Failed to save notes: {}", message),
            SyncEvent::VersionLoaded { .. } => {
                "Loaded historical version. Apply to save it or cancel to revert.".to_string()
            }
            SyncEvent::VersionApplied { .. } => "Applied historical version".to_string(),
            SyncEvent::VersionCancelled { .. } => "Reverted to current version".to_string(),
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the list so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
