use rusqlite::Connection;

use super::{CollectionError, CollectionService, MemberDisposition, ALL_ITEMS};
use crate::db::{self, DEFAULT_COLLECTION};
use crate::domain::item::Item;
use crate::events::{ChangeBus, ChangeEvent};

fn store() -> Connection {
    db::open_in_memory().expect("in-memory store should open")
}

fn seed_item(conn: &Connection, id: &str, collection: &str) {
    db::ensure_collection(conn, collection, "2026-01-01T00:00:00Z").unwrap();
    let item = Item {
        id: id.to_string(),
        name: format!("card {id}"),
        set_name: None,
        year: None,
        condition: None,
        grade: None,
        acquisition: None,
        value: None,
        collection: collection.to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    };
    db::upsert_item(conn, &item).unwrap();
    db::set_membership(conn, id, collection).unwrap();
}

#[test]
fn create_rejects_reserved_and_duplicate_names() {
    let mut conn = store();
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let err = service.create(ALL_ITEMS).unwrap_err();
    assert!(matches!(err, CollectionError::ReservedName(_)));

    let err = service.create("all items").unwrap_err();
    assert!(matches!(err, CollectionError::ReservedName(_)));

    service.create("Vintage").unwrap();
    let err = service.create(" Vintage ").unwrap_err();
    assert!(matches!(err, CollectionError::AlreadyExists(_)));

    let err = service.create("   ").unwrap_err();
    assert!(matches!(err, CollectionError::EmptyName));
}

#[test]
fn move_creates_missing_destination_and_updates_membership() {
    // Scenario: move an item into a collection that does not exist yet.
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let outcome = service
        .move_item("X", Some("Vintage"), "Graded")
        .expect("move should succeed");
    assert!(outcome.created_destination);
    assert_eq!(outcome.from.as_deref(), Some("Vintage"));

    assert!(db::collection_exists(&conn, "Graded").unwrap());
    let item = db::get_item(&conn, "X").unwrap().unwrap();
    assert_eq!(item.collection, "Graded");
    assert_eq!(db::memberships_of(&conn, "X").unwrap(), vec!["Graded"]);
    assert!(db::member_ids(&conn, "Vintage").unwrap().is_empty());
}

#[test]
fn move_falls_back_to_scanning_when_caller_state_is_stale() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    // the caller still believes the item sits in a collection it left long ago
    let outcome = service
        .move_item("X", Some("Binder"), "Graded")
        .expect("stale source should self-heal");
    assert_eq!(outcome.from.as_deref(), Some("Vintage"));
    assert_eq!(db::memberships_of(&conn, "X").unwrap(), vec!["Graded"]);
}

#[test]
fn move_to_current_collection_is_a_no_op() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let outcome = service.move_item("X", None, "Vintage").unwrap();
    assert!(!outcome.created_destination);
    assert_eq!(db::memberships_of(&conn, "X").unwrap(), vec!["Vintage"]);
}

#[test]
fn move_rejects_unknown_item_and_reserved_destination() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let err = service.move_item("nope", None, "Graded").unwrap_err();
    assert!(matches!(err, CollectionError::ItemNotFound(_)));

    let err = service.move_item("X", None, ALL_ITEMS).unwrap_err();
    assert!(matches!(err, CollectionError::ReservedName(_)));
}

#[test]
fn rename_preserves_members_and_item_rows() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    seed_item(&conn, "Y", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    service.rename("Vintage", "Classics").unwrap();

    assert!(!db::collection_exists(&conn, "Vintage").unwrap());
    let members = db::member_ids(&conn, "Classics").unwrap();
    assert_eq!(members, vec!["X", "Y"]);
    assert_eq!(db::get_item(&conn, "X").unwrap().unwrap().collection, "Classics");
}

#[test]
fn rename_rejects_reserved_and_existing_targets() {
    let mut conn = store();
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);
    service.create("Vintage").unwrap();

    let err = service.rename("Vintage", ALL_ITEMS).unwrap_err();
    assert!(matches!(err, CollectionError::ReservedName(_)));

    let err = service.rename("Vintage", DEFAULT_COLLECTION).unwrap_err();
    assert!(matches!(err, CollectionError::AlreadyExists(_)));

    let err = service.rename("Missing", "Other").unwrap_err();
    assert!(matches!(err, CollectionError::NotFound(_)));
}

#[test]
fn delete_refuses_the_last_collection() {
    // Scenario: deleting the only remaining collection must fail cleanly.
    let mut conn = store();
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let err = service
        .delete(DEFAULT_COLLECTION, MemberDisposition::Discard)
        .unwrap_err();
    assert!(matches!(err, CollectionError::LastCollection(_)));
    assert!(db::collection_exists(&conn, DEFAULT_COLLECTION).unwrap());
}

#[test]
fn delete_moves_members_into_target() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    let outcome = service
        .delete("Vintage", MemberDisposition::MoveTo("Binder".to_string()))
        .unwrap();
    assert_eq!(outcome.moved, vec!["X"]);
    assert!(outcome.discarded.is_empty());

    assert!(!db::collection_exists(&conn, "Vintage").unwrap());
    assert_eq!(db::memberships_of(&conn, "X").unwrap(), vec!["Binder"]);
    assert_eq!(db::get_item(&conn, "X").unwrap().unwrap().collection, "Binder");
}

#[test]
fn delete_discard_removes_items_and_broadcasts_invalidation() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let rx = bus.subscribe();
    let mut service = CollectionService::new(&mut conn, &bus);

    let outcome = service
        .delete("Vintage", MemberDisposition::Discard)
        .unwrap();
    assert_eq!(outcome.discarded, vec!["X"]);

    assert!(db::get_item(&conn, "X").unwrap().is_none());
    assert!(db::memberships_of(&conn, "X").unwrap().is_empty());

    let first = rx.try_recv().expect("invalidation should be broadcast");
    assert_eq!(
        first,
        ChangeEvent::ImagesInvalidated {
            item_ids: vec!["X".to_string()]
        }
    );
}

#[test]
fn empty_collections_survive_until_explicitly_deleted() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    service.move_item("X", Some("Vintage"), "Graded").unwrap();
    assert!(db::collection_exists(&conn, "Vintage").unwrap());
    assert!(db::member_ids(&conn, "Vintage").unwrap().is_empty());
}

#[test]
fn mutations_queue_outbox_rows_for_sync() {
    let mut conn = store();
    seed_item(&conn, "X", "Vintage");
    let bus = ChangeBus::new();
    let mut service = CollectionService::new(&mut conn, &bus);

    service.move_item("X", Some("Vintage"), "Graded").unwrap();

    let rows = db::list_outbox(&conn).unwrap();
    let keys: Vec<(String, String)> = rows
        .into_iter()
        .map(|row| (row.kind, row.entity_id))
        .collect();
    assert!(keys.contains(&("item".to_string(), "X".to_string())));
    assert!(keys.contains(&("collection".to_string(), "Graded".to_string())));
    assert!(keys.contains(&("collection".to_string(), "Vintage".to_string())));
}
