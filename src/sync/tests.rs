use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use super::{
    backoff_delay_secs, sync_status, EntityKind, FileMirror, Mirror, MirrorDocument, MirrorError,
    RemoteApplier, SyncCoordinator,
};
use crate::db::{self, DEFAULT_COLLECTION, KIND_COLLECTION, KIND_ITEM};
use crate::domain::item::Item;

struct UnreachableMirror;

impl Mirror for UnreachableMirror {
    fn upsert(&self, _: &MirrorDocument) -> Result<(), MirrorError> {
        Err(MirrorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no route to mirror",
        )))
    }

    fn get(&self, _: EntityKind, _: &str) -> Result<Option<MirrorDocument>, MirrorError> {
        Err(MirrorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no route to mirror",
        )))
    }

    fn fetch_since(&self, _: Option<&str>) -> Result<Vec<MirrorDocument>, MirrorError> {
        Err(MirrorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no route to mirror",
        )))
    }
}

fn mirror_dir() -> PathBuf {
    let path = std::env::temp_dir().join(format!("curio-mirror-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&path).expect("mirror dir should be creatable");
    path
}

fn store() -> (Connection, String) {
    let conn = db::open_in_memory().expect("in-memory store should open");
    let origin = db::get_profile(&conn)
        .expect("profile should be seeded")
        .device_id;
    (conn, origin)
}

fn seed_item(conn: &Connection, id: &str, collection: &str, updated_at: &str) {
    db::ensure_collection(conn, collection, updated_at).unwrap();
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
        created_at: updated_at.to_string(),
        updated_at: updated_at.to_string(),
    };
    db::upsert_item(conn, &item).unwrap();
    db::set_membership(conn, id, collection).unwrap();
    db::mark_dirty(conn, KIND_ITEM, id, updated_at).unwrap();
    db::mark_dirty(conn, KIND_COLLECTION, collection, updated_at).unwrap();
}

fn item_doc(id: &str, origin: &str, last_modified: &str, name: &str, collection: &str) -> MirrorDocument {
    MirrorDocument {
        id: id.to_string(),
        kind: EntityKind::Item,
        origin: origin.to_string(),
        last_modified: last_modified.to_string(),
        deleted: false,
        payload: json!({
            "id": id,
            "name": name,
            "set_name": null,
            "year": null,
            "condition": null,
            "grade": null,
            "acquisition": null,
            "value": null,
            "collection": collection,
            "created_at": last_modified,
            "updated_at": last_modified,
        }),
    }
}

#[test]
fn backoff_doubles_and_caps() {
    assert_eq!(backoff_delay_secs(1), 30);
    assert_eq!(backoff_delay_secs(2), 60);
    assert_eq!(backoff_delay_secs(3), 120);
    assert_eq!(backoff_delay_secs(7), 1920);
    assert_eq!(backoff_delay_secs(8), 3600);
    assert_eq!(backoff_delay_secs(40), 3600);
}

#[test]
fn push_then_pull_replicates_between_devices() {
    let dir = mirror_dir();
    let mirror = FileMirror::new(&dir);

    let (mut conn_a, origin_a) = store();
    seed_item(&conn_a, "I-1", "Vintage", "2026-02-01T10:00:00Z");

    let push = SyncCoordinator::new(&mut conn_a, &mirror, origin_a)
        .push()
        .expect("push should succeed");
    assert_eq!(push.pushed, 2);
    assert_eq!(push.failed, 0);
    assert!(db::list_outbox(&conn_a).unwrap().is_empty());

    let (mut conn_b, origin_b) = store();
    let pull = SyncCoordinator::new(&mut conn_b, &mirror, origin_b)
        .pull()
        .expect("pull should succeed");
    assert_eq!(pull.item_upserts, 1);
    assert_eq!(pull.collection_upserts, 1);

    let item = db::get_item(&conn_b, "I-1").unwrap().expect("item replicated");
    assert_eq!(item.collection, "Vintage");
    assert_eq!(db::memberships_of(&conn_b, "I-1").unwrap(), vec!["Vintage"]);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn repeated_push_upserts_rather_than_appends() {
    let dir = mirror_dir();
    let mirror = FileMirror::new(&dir);

    let (mut conn, origin) = store();
    seed_item(&conn, "I-1", "Vintage", "2026-02-01T10:00:00Z");
    SyncCoordinator::new(&mut conn, &mirror, origin.clone())
        .push()
        .unwrap();

    // the same state queued again must not create a second remote record
    db::mark_dirty(&conn, KIND_ITEM, "I-1", "2026-02-01T10:00:01Z").unwrap();
    SyncCoordinator::new(&mut conn, &mirror, origin)
        .push()
        .unwrap();

    let docs = mirror.fetch_since(None).unwrap();
    assert_eq!(docs.len(), 2);
    let item_docs: Vec<_> = docs
        .iter()
        .filter(|doc| doc.kind == EntityKind::Item)
        .collect();
    assert_eq!(item_docs.len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn unreachable_mirror_defers_rows_with_backoff() {
    let (mut conn, origin) = store();
    seed_item(&conn, "I-1", "Vintage", "2026-02-01T10:00:00Z");

    let push = SyncCoordinator::new(&mut conn, &UnreachableMirror, origin.clone())
        .push()
        .expect("push itself should not error on an unreachable mirror");
    assert_eq!(push.pushed, 0);
    assert_eq!(push.failed, 2);

    let rows = db::list_outbox(&conn).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.attempts, 1);
        assert!(row.next_attempt_at > row.queued_at);
    }

    // rows are backed off, so an immediate retry defers them
    let retry = SyncCoordinator::new(&mut conn, &UnreachableMirror, origin)
        .push()
        .unwrap();
    assert_eq!(retry.failed, 0);
    assert_eq!(retry.deferred, 2);
}

#[test]
fn local_delete_travels_as_tombstone() {
    let dir = mirror_dir();
    let mirror = FileMirror::new(&dir);

    let (mut conn_a, origin_a) = store();
    seed_item(&conn_a, "I-1", "Vintage", "2026-02-01T10:00:00Z");
    SyncCoordinator::new(&mut conn_a, &mirror, origin_a.clone())
        .push()
        .unwrap();

    let (mut conn_b, origin_b) = store();
    SyncCoordinator::new(&mut conn_b, &mirror, origin_b.clone())
        .pull()
        .unwrap();
    assert!(db::get_item(&conn_b, "I-1").unwrap().is_some());

    db::remove_membership(&conn_a, "I-1").unwrap();
    db::delete_item(&conn_a, "I-1").unwrap();
    db::mark_dirty(&conn_a, KIND_ITEM, "I-1", "2026-02-01T11:00:00Z").unwrap();
    let push = SyncCoordinator::new(&mut conn_a, &mirror, origin_a)
        .push()
        .unwrap();
    assert_eq!(push.tombstones, 1);

    let pull = SyncCoordinator::new(&mut conn_b, &mirror, origin_b)
        .pull()
        .unwrap();
    assert_eq!(pull.item_deletes, 1);
    assert_eq!(pull.deleted_item_ids, vec!["I-1"]);
    assert!(db::get_item(&conn_b, "I-1").unwrap().is_none());
    assert!(db::memberships_of(&conn_b, "I-1").unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn newer_timestamp_wins_regardless_of_arrival_order() {
    // Scenario: envelopes stamped 100 and 200 arrive as (200, 100).
    let (mut conn, _) = store();
    let docs = [
        item_doc(
            "Z",
            "D-other",
            "2026-02-01T00:03:20Z",
            "newer name",
            "Vintage",
        ),
        item_doc(
            "Z",
            "D-other",
            "2026-02-01T00:01:40Z",
            "older name",
            "Vintage",
        ),
    ];

    let summary = RemoteApplier::new(&mut conn, "D-local").apply(&docs).unwrap();
    assert_eq!(summary.item_upserts, 1);
    assert_eq!(summary.skipped_stale, 1);

    let item = db::get_item(&conn, "Z").unwrap().unwrap();
    assert_eq!(item.name, "newer name");
    assert_eq!(item.updated_at, "2026-02-01T00:03:20Z");
}

#[test]
fn lww_converges_from_either_delivery_order() {
    for ordered in [true, false] {
        let (mut conn, _) = store();
        let older = item_doc("Z", "D-other", "2026-02-01T00:01:40Z", "older", "Vintage");
        let newer = item_doc("Z", "D-other", "2026-02-01T00:03:20Z", "newer", "Vintage");
        let docs = if ordered {
            [older.clone(), newer.clone()]
        } else {
            [newer.clone(), older.clone()]
        };

        RemoteApplier::new(&mut conn, "D-local").apply(&docs).unwrap();
        let item = db::get_item(&conn, "Z").unwrap().unwrap();
        assert_eq!(item.name, "newer", "delivery order {ordered}");
    }
}

#[test]
fn stale_remote_delete_loses_to_newer_local_edit() {
    let (mut conn, _) = store();
    seed_item(&conn, "Z", "Vintage", "2026-02-01T12:00:00Z");

    let tombstone = MirrorDocument {
        deleted: true,
        payload: serde_json::Value::Null,
        ..item_doc("Z", "D-other", "2026-02-01T11:00:00Z", "", "Vintage")
    };
    let summary = RemoteApplier::new(&mut conn, "D-local")
        .apply(&[tombstone])
        .unwrap();
    assert_eq!(summary.skipped_stale, 1);
    assert!(db::get_item(&conn, "Z").unwrap().is_some());
}

#[test]
fn own_origin_documents_are_skipped() {
    let (mut conn, origin) = store();
    let docs = [item_doc(
        "Z",
        &origin,
        "2026-02-01T00:03:20Z",
        "echo",
        "Vintage",
    )];
    let summary = RemoteApplier::new(&mut conn, &origin).apply(&docs).unwrap();
    assert_eq!(summary.skipped_own, 1);
    assert!(db::get_item(&conn, "Z").unwrap().is_none());
}

#[test]
fn remote_collection_delete_reassigns_members_instead_of_orphaning() {
    let (mut conn, _) = store();
    seed_item(&conn, "I-1", "Vintage", "2026-02-01T10:00:00Z");

    let tombstone = MirrorDocument {
        id: "Vintage".to_string(),
        kind: EntityKind::Collection,
        origin: "D-other".to_string(),
        last_modified: "2026-02-01T12:00:00Z".to_string(),
        deleted: true,
        payload: serde_json::Value::Null,
    };
    let summary = RemoteApplier::new(&mut conn, "D-local")
        .apply(&[tombstone])
        .unwrap();
    assert_eq!(summary.collection_deletes, 1);

    assert!(!db::collection_exists(&conn, "Vintage").unwrap());
    assert_eq!(
        db::memberships_of(&conn, "I-1").unwrap(),
        vec![DEFAULT_COLLECTION]
    );
}

#[test]
fn remote_delete_of_last_collection_is_refused() {
    let (mut conn, _) = store();
    let tombstone = MirrorDocument {
        id: DEFAULT_COLLECTION.to_string(),
        kind: EntityKind::Collection,
        origin: "D-other".to_string(),
        last_modified: "2026-02-01T12:00:00Z".to_string(),
        deleted: true,
        payload: serde_json::Value::Null,
    };
    let summary = RemoteApplier::new(&mut conn, "D-local")
        .apply(&[tombstone])
        .unwrap();
    assert_eq!(summary.collection_deletes, 0);
    assert!(db::collection_exists(&conn, DEFAULT_COLLECTION).unwrap());
}

#[test]
fn pull_advances_cursor_and_ignores_already_seen_documents() {
    let dir = mirror_dir();
    let mirror = FileMirror::new(&dir);

    let (mut conn_a, origin_a) = store();
    seed_item(&conn_a, "I-1", "Vintage", "2026-02-01T10:00:00Z");
    SyncCoordinator::new(&mut conn_a, &mirror, origin_a)
        .push()
        .unwrap();

    let (mut conn_b, origin_b) = store();
    let first = SyncCoordinator::new(&mut conn_b, &mirror, origin_b.clone())
        .pull()
        .unwrap();
    assert_eq!(first.fetched, 2);
    assert_eq!(first.cursor.as_deref(), Some("2026-02-01T10:00:00Z"));

    let second = SyncCoordinator::new(&mut conn_b, &mirror, origin_b)
        .pull()
        .unwrap();
    assert_eq!(second.fetched, 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn status_reports_outbox_depth_and_cursor() {
    let (conn, _) = store();
    db::mark_dirty(&conn, KIND_ITEM, "I-1", "2026-02-01T10:00:00Z").unwrap();
    db::mark_dirty(&conn, KIND_COLLECTION, "Vintage", "2026-02-01T10:00:00Z").unwrap();
    db::set_meta(&conn, super::META_SYNC_CURSOR, "2026-02-01T09:00:00Z").unwrap();

    let status = sync_status(&conn).unwrap();
    assert_eq!(status.outbox_depth, 2);
    assert_eq!(status.due_now, 2);
    assert_eq!(status.cursor.as_deref(), Some("2026-02-01T09:00:00Z"));
}
