//! Flows across separate `notes` invocations sharing one data directory.
//!
//! Every `App::open` here stands in for a new process: it rebuilds the
//! engine from what the previous one left on disk.

use ed25519_dalek::SigningKey;
use notes_cli::keys::{self, KEY_FILE};
use notes_cli::ledger::LEDGER_FILE;
use notes_cli::native_fs::BLOB_DIR;
use notes_cli::persistence::DOCUMENTS_FILE;
use notes_cli::{App, AppOptions, FileLedger, FsContentStore, SyncStateStorage};
use notes_sync::document::encode_snapshot;
use notes_sync::{
    Address, ContentStore, DenialReason, Document, LedgerPointer, Permissions, PointerValue,
    SyncError,
};
use std::path::Path;
use tempfile::TempDir;

fn options(dir: &Path) -> AppOptions {
    AppOptions {
        data_dir: dir.to_path_buf(),
        identity: None,
        relay: None,
    }
}

fn acting_for(dir: &Path, identity: Address) -> AppOptions {
    AppOptions {
        identity: Some(identity),
        ..options(dir)
    }
}

fn owner_key(dir: &Path) -> SigningKey {
    let path = dir.join(KEY_FILE);
    if path.exists() {
        keys::load(&path).unwrap()
    } else {
        keys::generate(&path, false).unwrap()
    }
}

fn address_of(key: &SigningKey) -> Address {
    Address::from_public_key(&key.verifying_key())
}

// ==================== Save and history ====================

#[tokio::test]
async fn test_saves_in_separate_processes_build_history() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let (id, first) = {
        let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
        let id = app.engine().create_document().unwrap();
        app.engine().update_document(&id, "First", "a").unwrap();
        let first = app.save(&id).await.unwrap();
        (id, first)
    };

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    app.engine().update_body(&id, "b").unwrap();
    let second = app.save(&id).await.unwrap();

    assert_ne!(first, second);
    let history = app.engine().history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cid, first.to_string());
    assert_eq!(history[0].title, "First");

    let markers = SyncStateStorage::new(dir);
    assert_eq!(markers.merged(&app.identity()), Some(&second));
}

#[tokio::test]
async fn test_unsaved_edits_survive_a_later_save() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let a = {
        let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
        let a = app.engine().create_document().unwrap();
        app.engine().update_document(&a, "A", "published").unwrap();
        app.save(&a).await.unwrap();
        a
    };

    {
        let app = App::open(&options(dir), owner_key(dir)).unwrap();
        app.engine().update_body(&a, "local draft").unwrap();
    }

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    let b = app.engine().create_document().unwrap();
    app.save(&b).await.unwrap();

    // The snapshot was already merged here, so it is tracked rather than re-merged
    assert_eq!(app.engine().document(&a).unwrap().body, "local draft");
    assert!(app.engine().document(&b).unwrap().is_pinned);
}

#[tokio::test]
async fn test_moved_pointer_is_merged_before_save() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let key = owner_key(dir);
    let identity = address_of(&key);

    {
        let mut app = App::open(&options(dir), key.clone()).unwrap();
        let a = app.engine().create_document().unwrap();
        app.save(&a).await.unwrap();
    }

    // Another device publishes a different working set
    let remote = Document::new("From elsewhere", "r");
    let bytes = encode_snapshot(std::slice::from_ref(&remote)).unwrap();
    let remote_cid = FsContentStore::new(dir.join(BLOB_DIR))
        .put(bytes.clone())
        .await
        .unwrap();
    FileLedger::new(dir.join(LEDGER_FILE))
        .write(&identity, PointerValue::for_snapshot(&remote_cid, &bytes))
        .await
        .unwrap();

    let mut app = App::open(&options(dir), key).unwrap();
    let local = app.engine().create_document().unwrap();
    let saved = app.save(&local).await.unwrap();

    let documents = app.engine().documents();
    assert_eq!(documents[0].id, remote.id);
    assert!(documents.iter().any(|d| d.id == local && d.is_pinned));
    assert_ne!(saved, remote_cid);
    assert_eq!(SyncStateStorage::new(dir).merged(&identity), Some(&saved));
}

#[tokio::test]
async fn test_save_all_purges_after_confirmation() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    let keep = app.engine().create_document().unwrap();
    let gone = app.engine().create_document().unwrap();
    app.save(&keep).await.unwrap();
    app.engine().delete_document(&gone, |_| true).unwrap();

    let declined = app.save_all(Some(keep.as_str()), |_| false).await;
    assert!(matches!(
        declined.unwrap_err().downcast_ref::<SyncError>(),
        Some(SyncError::UserCancelled)
    ));
    assert!(app.engine().document(&gone).is_some());

    app.save_all(Some(keep.as_str()), |deleted| deleted.len() == 1)
        .await
        .unwrap();
    assert!(app.engine().document(&gone).is_none());
}

// ==================== Historical versions ====================

#[tokio::test]
async fn test_restore_and_apply_across_processes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let (id, first, second) = {
        let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
        let id = app.engine().create_document().unwrap();
        app.engine().update_document(&id, "Plan", "v1").unwrap();
        let first = app.save(&id).await.unwrap();
        app.engine().update_body(&id, "v2").unwrap();
        let second = app.save(&id).await.unwrap();
        (id, first, second)
    };

    {
        let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
        app.restore(&id, &first).await.unwrap();
        let view = app.engine().view(&id).unwrap();
        assert!(view.historical);
        assert_eq!(view.body, "v1");
        assert_eq!(app.engine().document(&id).unwrap().body, "v2");
    }

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    assert!(app.engine().session(&id).is_some());
    app.apply(&id).await.unwrap();

    let doc = app.engine().document(&id).unwrap();
    assert_eq!(doc.body, "v1");
    let cids: Vec<String> = doc.history.iter().map(|v| v.cid.clone()).collect();
    assert_eq!(cids, vec![first.to_string(), second.to_string()]);
    assert!(app.engine().session(&id).is_none());
}

#[tokio::test]
async fn test_apply_without_open_version_fails() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    let id = app.engine().create_document().unwrap();
    assert!(app.apply(&id).await.is_err());
    assert!(app.pointer().await.unwrap().is_none());
}

// ==================== Pull ====================

#[tokio::test]
async fn test_pull_restores_published_notes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let id = {
        let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
        let id = app.engine().create_document().unwrap();
        app.engine().update_title(&id, "Kept").unwrap();
        app.save(&id).await.unwrap();
        id
    };
    std::fs::remove_file(dir.join(DOCUMENTS_FILE)).unwrap();

    let mut app = App::open(&options(dir), owner_key(dir)).unwrap();
    assert!(app.engine().documents().is_empty());

    assert_eq!(app.pull().await.unwrap(), 1);
    let doc = app.engine().document(&id).unwrap();
    assert_eq!(doc.title, "Kept");
    assert!(doc.is_pinned);
}

// ==================== Controllers ====================

#[tokio::test]
async fn test_controller_key_publishes_for_identity() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let owner = owner_key(dir);
    let identity = address_of(&owner);
    let controller = keys::generate(&dir.join("controller.key"), false).unwrap();

    App::open(&options(dir), owner)
        .unwrap()
        .grant(
            address_of(&controller),
            Permissions::SIGN.union(Permissions::SET_DATA),
        )
        .await
        .unwrap();

    let mut app = App::open(&acting_for(dir, identity), controller).unwrap();
    assert_ne!(app.key_address(), app.identity());
    let id = app.engine().create_document().unwrap();
    let saved = app.save(&id).await.unwrap();

    let pointer = app.pointer().await.unwrap().unwrap();
    assert_eq!(pointer.content_id(), saved);
}

#[tokio::test]
async fn test_unregistered_key_is_denied() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let identity = address_of(&owner_key(dir));
    let stranger = keys::generate(&dir.join("stranger.key"), false).unwrap();

    let mut app = App::open(&acting_for(dir, identity), stranger).unwrap();
    let id = app.engine().create_document().unwrap();
    let err = app.save(&id).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::VerificationDenied {
            reason: DenialReason::InsufficientPermission
        })
    ));
    assert!(app.pointer().await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_owner_key_can_grant() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let identity = address_of(&owner_key(dir));
    let controller = keys::generate(&dir.join("controller.key"), false).unwrap();
    let controller_address = address_of(&controller);

    let app = App::open(&acting_for(dir, identity), controller).unwrap();
    assert!(app.grant(controller_address, Permissions::SIGN).await.is_err());
}
