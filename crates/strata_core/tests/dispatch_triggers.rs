mod common;

use common::{dispatcher, image, Image, User};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use strata_core::{Backend, Entity, StoreError, TriggerEvent};

fn recording_dispatcher() -> (
    strata_core::Dispatcher<strata_core::SqliteBackend>,
    Arc<Mutex<Vec<&'static str>>>,
) {
    let mut dispatcher = dispatcher();
    let record = Arc::new(Mutex::new(Vec::new()));
    for (event, label) in [
        (TriggerEvent::Save, "save"),
        (TriggerEvent::Saved, "saved"),
        (TriggerEvent::Create, "create"),
        (TriggerEvent::Created, "created"),
        (TriggerEvent::Update, "update"),
        (TriggerEvent::Updated, "updated"),
        (TriggerEvent::Delete, "delete"),
        (TriggerEvent::Deleted, "deleted"),
    ] {
        let record = Arc::clone(&record);
        dispatcher.on("users", event, move |_, _| {
            record.lock().unwrap().push(label);
            Ok(())
        });
    }
    (dispatcher, record)
}

fn recorded(record: &Arc<Mutex<Vec<&'static str>>>) -> Vec<&'static str> {
    record.lock().unwrap().clone()
}

#[test]
fn insert_fires_save_create_created_saved_in_order() {
    let (dispatcher, record) = recording_dispatcher();

    let mut user = User::new("alice", 30);
    dispatcher.save(&mut user).unwrap();

    assert_eq!(recorded(&record), vec!["save", "create", "created", "saved"]);
}

#[test]
fn update_fires_save_update_updated_saved_in_order() {
    let (dispatcher, record) = recording_dispatcher();

    let mut user = User::new("alice", 30);
    dispatcher.save(&mut user).unwrap();
    record.lock().unwrap().clear();

    user.age = 31;
    dispatcher.save(&mut user).unwrap();

    assert_eq!(recorded(&record), vec!["save", "update", "updated", "saved"]);
}

#[test]
fn delete_fires_delete_then_deleted() {
    let (dispatcher, record) = recording_dispatcher();

    let mut user = User::new("alice", 30);
    dispatcher.save(&mut user).unwrap();
    record.lock().unwrap().clear();

    dispatcher.delete(&mut user).unwrap();
    assert_eq!(recorded(&record), vec!["delete", "deleted"]);
}

#[test]
fn deleting_transient_entity_fires_nothing() {
    let (dispatcher, record) = recording_dispatcher();

    let mut user = User::new("never saved", 9);
    dispatcher.delete(&mut user).unwrap();
    assert!(recorded(&record).is_empty());
}

#[test]
fn pre_write_handler_mutations_are_persisted() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Save, |item, _| {
        item.set_field("name", strata_core::FieldValue::from("normalized"));
        Ok(())
    });

    let mut user = User::new("raw", 25);
    dispatcher.save(&mut user).unwrap();

    let mut loaded = User::default();
    dispatcher.backend().load(&mut loaded, user.id()).unwrap();
    assert_eq!(loaded.name, "normalized");
}

#[test]
fn handler_writes_through_scope_join_the_operation() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Created, |item, scope| {
        let mut avatar = image("avatar.png", item.id());
        scope.save(&mut avatar)?;
        Ok(())
    });

    let mut user = User::new("eve", 41);
    dispatcher.save(&mut user).unwrap();

    let mut avatars: Vec<Box<dyn Entity>> = Vec::new();
    dispatcher
        .select(
            &Image::default(),
            &mut avatars,
            None,
            0,
            "users_id = ?",
            &[strata_core::FieldValue::from(user.id())],
        )
        .unwrap();
    assert_eq!(avatars.len(), 1);
}

#[test]
fn failing_handler_aborts_save_and_rolls_back_the_insert() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Saved, |item, _| {
        if item.field("name").and_then(|v| v.as_text().map(str::to_string))
            == Some("doomed".to_string())
        {
            return Err("rejected by post-save audit".into());
        }
        Ok(())
    });

    let mut fine = User::new("fine", 20);
    dispatcher.save(&mut fine).unwrap();

    let mut doomed = User::new("doomed", 99);
    let err = dispatcher.save(&mut doomed).unwrap_err();
    match err {
        StoreError::TriggerFailed { event, .. } => assert_eq!(event, TriggerEvent::Saved),
        other => panic!("expected TriggerFailed, got {other}"),
    }

    // The backend insert ran before the trigger, so the entity carries the
    // id it briefly held; the rollback must have removed the row.
    let mut target = User::default();
    assert!(matches!(
        dispatcher.backend().load(&mut target, doomed.id()),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn failed_write_clears_previously_cached_entries() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Saved, |item, _| {
        if item.field("age").and_then(|v| v.as_i64()) == Some(-1) {
            return Err("age out of range".into());
        }
        Ok(())
    });

    let mut cached = User::new("cached", 33);
    dispatcher.save(&mut cached).unwrap();

    // Drop the row behind the cache's back; a cache hit would mask it.
    let mut shadow = User::default();
    shadow.fill(cached.id(), None);
    dispatcher.backend().delete(&mut shadow).unwrap();

    let mut hit = User::default();
    dispatcher.load(&mut hit, cached.id()).unwrap();
    assert_eq!(hit.name, "cached");

    let mut bad = User::new("bad", -1);
    assert!(dispatcher.save(&mut bad).is_err());

    // The failure flushed everything, so the stale entry is gone too.
    let mut miss = User::default();
    assert!(matches!(
        dispatcher.load(&mut miss, cached.id()),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn failing_delete_handler_vetoes_and_keeps_row_and_id() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Delete, |_, _| {
        Err("deletion vetoed".into())
    });

    let mut user = User::new("vetoed", 58);
    dispatcher.save(&mut user).unwrap();
    let id = user.id();

    let err = dispatcher.delete(&mut user).unwrap_err();
    match err {
        StoreError::TriggerFailed { event, .. } => assert_eq!(event, TriggerEvent::Delete),
        other => panic!("expected TriggerFailed, got {other}"),
    }

    // The veto fired before the backend delete, so the entity never lost
    // its identity and the row is still there.
    assert_eq!(user.id(), id);
    let mut loaded = User::default();
    dispatcher.load(&mut loaded, id).unwrap();
    assert_eq!(loaded.name, "vetoed");
}

#[test]
fn failing_deleted_handler_rolls_back_delete_and_cascade() {
    let deleted_images = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = dispatcher();
    {
        let deleted_images = Arc::clone(&deleted_images);
        dispatcher.on("images", TriggerEvent::Deleted, move |_, _| {
            deleted_images.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        });
    }
    dispatcher.on("users", TriggerEvent::Deleted, |item, _| {
        if item.field("name").and_then(|v| v.as_text().map(str::to_string))
            == Some("protected".to_string())
        {
            return Err("refusing to delete protected user".into());
        }
        Ok(())
    });

    let mut user = User::new("protected", 77);
    dispatcher.save(&mut user).unwrap();
    let user_id = user.id();
    let mut picture = image("keep.jpg", user_id);
    dispatcher.save(&mut picture).unwrap();
    let picture_id = picture.id();

    let err = dispatcher.delete(&mut user).unwrap_err();
    assert!(matches!(err, StoreError::TriggerFailed { .. }));

    // Cascaded image handlers did run inside the aborted transaction.
    assert_eq!(deleted_images.load(AtomicOrdering::SeqCst), 1);

    // Rollback restored both rows.
    let mut survivor = User::default();
    dispatcher.load(&mut survivor, user_id).unwrap();
    assert_eq!(survivor.name, "protected");
    let mut kept = Image::default();
    dispatcher.backend().load(&mut kept, picture_id).unwrap();
}

#[test]
fn pull_trigger_fires_handlers_manually() {
    let (dispatcher, record) = recording_dispatcher();

    let mut user = User::new("manual", 44);
    dispatcher.save(&mut user).unwrap();
    record.lock().unwrap().clear();

    dispatcher
        .pull_trigger(&mut user, TriggerEvent::Updated)
        .unwrap();
    assert_eq!(recorded(&record), vec!["updated"]);
}

#[test]
fn pull_trigger_scope_writes_hit_the_backend() {
    let mut dispatcher = dispatcher();
    dispatcher.on("users", TriggerEvent::Saved, |item, scope| {
        let mut stamp = image("stamp.png", item.id());
        scope.save(&mut stamp)?;
        Ok(())
    });

    let mut user = User::new("stamped", 27);
    // Plain backend write, then fire the skipped lifecycle point manually.
    dispatcher.backend().save(&mut user).unwrap();
    dispatcher
        .pull_trigger(&mut user, TriggerEvent::Saved)
        .unwrap();

    let mut stamps: Vec<Box<dyn Entity>> = Vec::new();
    dispatcher
        .select(
            &Image::default(),
            &mut stamps,
            None,
            0,
            "users_id = ?",
            &[strata_core::FieldValue::from(user.id())],
        )
        .unwrap();
    assert_eq!(stamps.len(), 1);
}

#[test]
fn load_serves_cached_state_until_invalidated() {
    let dispatcher = dispatcher();

    let mut user = User::new("resident", 52);
    dispatcher.save(&mut user).unwrap();
    let id = user.id();

    let mut shadow = User::default();
    shadow.fill(id, None);
    dispatcher.backend().delete(&mut shadow).unwrap();

    // Row is gone, yet the save left a snapshot behind.
    let mut hit = User::default();
    dispatcher.load(&mut hit, id).unwrap();
    assert_eq!(hit.name, "resident");
}

#[test]
fn delete_tombstones_the_cached_entry() {
    let dispatcher = dispatcher();

    let mut user = User::new("brief", 18);
    dispatcher.save(&mut user).unwrap();
    let id = user.id();

    let mut victim = User::default();
    victim.fill(id, None);
    dispatcher.delete(&mut victim).unwrap();

    let mut target = User::default();
    assert!(matches!(
        dispatcher.load(&mut target, id),
        Err(StoreError::NotFound { .. })
    ));
}
