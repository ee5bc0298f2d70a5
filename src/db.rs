use std::error::Error;
use std::fmt;
use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::Serialize;

use crate::domain::invoice::InvoiceRecord;
use crate::domain::item::Item;
use crate::domain::money::DualMoney;
use crate::ident::{new_device_id, now_utc_rfc3339};

pub const CURRENT_SCHEMA_VERSION: i64 = 2;
pub const DEFAULT_COLLECTION: &str = "Unsorted";
pub const DEFAULT_DISPLAY_CURRENCY: &str = "USD";

pub const KIND_ITEM: &str = "item";
pub const KIND_COLLECTION: &str = "collection";

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_local_store_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    set_name TEXT,
    year INTEGER,
    condition TEXT,
    grade TEXT,
    acquisition_json TEXT,
    value_json TEXT,
    collection_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_member (
    collection_name TEXT NOT NULL,
    item_id TEXT NOT NULL,
    PRIMARY KEY (collection_name, item_id)
);

CREATE TABLE IF NOT EXISTS image (
    item_id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    content_hash TEXT NOT NULL,
    remote_url TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invoice (
    id TEXT PRIMARY KEY,
    seller TEXT NOT NULL,
    invoice_date TEXT NOT NULL,
    lines_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profile (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    display_currency TEXT NOT NULL,
    device_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_item_collection ON item(collection_name);
CREATE INDEX IF NOT EXISTS idx_item_updated_at ON item(updated_at);
CREATE INDEX IF NOT EXISTS idx_member_item ON collection_member(item_id);
"#,
    },
    Migration {
        version: 2,
        name: "shadow_sync_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS sync_outbox (
    kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT NOT NULL,
    PRIMARY KEY (kind, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_sync_outbox_due ON sync_outbox(next_attempt_at);
"#,
    },
];

pub fn open_connection(path: &str) -> Result<Connection, StoreError> {
    let mut conn = Connection::open(path).map_err(StoreError::Db)?;
    configure_for_speed(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

/// Fallback store for when the durable database cannot be opened: same
/// schema, same defaults, no persistence.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let mut conn = Connection::open_in_memory().map_err(StoreError::Db)?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")
        .map_err(StoreError::Db)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    let now = now_utc_rfc3339();
    tx.execute(
        r#"
INSERT INTO collection (name, created_at, updated_at)
VALUES (?1, ?2, ?2)
ON CONFLICT(name) DO NOTHING
"#,
        params![DEFAULT_COLLECTION, now],
    )?;
    tx.execute(
        r#"
INSERT INTO profile (id, display_currency, device_id)
VALUES (1, ?1, ?2)
ON CONFLICT(id) DO NOTHING
"#,
        params![DEFAULT_DISPLAY_CURRENCY, new_device_id()],
    )?;

    tx.commit()?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::Db)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

struct RawItem {
    id: String,
    name: String,
    set_name: Option<String>,
    year: Option<i64>,
    condition: Option<String>,
    grade: Option<String>,
    acquisition_json: Option<String>,
    value_json: Option<String>,
    collection: String,
    created_at: String,
    updated_at: String,
}

const ITEM_COLUMNS: &str = "id, name, set_name, year, condition, grade, \
acquisition_json, value_json, collection_name, created_at, updated_at";

fn read_raw_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
    Ok(RawItem {
        id: row.get(0)?,
        name: row.get(1)?,
        set_name: row.get(2)?,
        year: row.get(3)?,
        condition: row.get(4)?,
        grade: row.get(5)?,
        acquisition_json: row.get(6)?,
        value_json: row.get(7)?,
        collection: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn raw_to_item(raw: RawItem) -> Result<Item, StoreError> {
    let acquisition = parse_money_column(&raw.id, raw.acquisition_json.as_deref())?;
    let value = parse_money_column(&raw.id, raw.value_json.as_deref())?;
    Ok(Item {
        id: raw.id,
        name: raw.name,
        set_name: raw.set_name,
        year: raw.year,
        condition: raw.condition,
        grade: raw.grade,
        acquisition,
        value,
        collection: raw.collection,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

fn parse_money_column(id: &str, json: Option<&str>) -> Result<Option<DualMoney>, StoreError> {
    match json {
        None => Ok(None),
        Some(text) => serde_json::from_str(text)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                what: "item monetary column",
                id: id.to_string(),
                message: err.to_string(),
            }),
    }
}

fn money_to_column(id: &str, money: Option<&DualMoney>) -> Result<Option<String>, StoreError> {
    match money {
        None => Ok(None),
        Some(value) => serde_json::to_string(value)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                what: "item monetary column",
                id: id.to_string(),
                message: err.to_string(),
            }),
    }
}

pub fn get_item(conn: &Connection, id: &str) -> Result<Option<Item>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM item WHERE id = ?1"),
            params![id],
            read_raw_item,
        )
        .optional()?;
    raw.map(raw_to_item).transpose()
}

pub fn list_items(conn: &Connection) -> Result<Vec<Item>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM item ORDER BY updated_at DESC, id ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(raw_to_item(read_raw_item(row)?)?);
    }
    Ok(result)
}

pub fn upsert_item(conn: &Connection, item: &Item) -> Result<(), StoreError> {
    let acquisition_json = money_to_column(&item.id, item.acquisition.as_ref())?;
    let value_json = money_to_column(&item.id, item.value.as_ref())?;
    conn.execute(
        r#"
INSERT INTO item (
    id, name, set_name, year, condition, grade,
    acquisition_json, value_json, collection_name, created_at, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    set_name = excluded.set_name,
    year = excluded.year,
    condition = excluded.condition,
    grade = excluded.grade,
    acquisition_json = excluded.acquisition_json,
    value_json = excluded.value_json,
    collection_name = excluded.collection_name,
    created_at = COALESCE(item.created_at, excluded.created_at),
    updated_at = excluded.updated_at
"#,
        params![
            item.id,
            item.name,
            item.set_name,
            item.year,
            item.condition,
            item.grade,
            acquisition_json,
            value_json,
            item.collection,
            item.created_at,
            item.updated_at
        ],
    )?;
    Ok(())
}

pub fn delete_item(conn: &Connection, id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM item WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn touch_item(conn: &Connection, id: &str, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE item SET updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectionRow {
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub item_count: i64,
}

pub fn create_collection(conn: &Connection, name: &str, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO collection (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![name, now],
    )?;
    Ok(())
}

pub fn ensure_collection(conn: &Connection, name: &str, now: &str) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        r#"
INSERT INTO collection (name, created_at, updated_at)
VALUES (?1, ?2, ?2)
ON CONFLICT(name) DO NOTHING
"#,
        params![name, now],
    )?;
    Ok(inserted > 0)
}

pub fn collection_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM collection WHERE name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub fn get_collection(conn: &Connection, name: &str) -> Result<Option<CollectionRow>, StoreError> {
    conn.query_row(
        r#"
SELECT name, created_at, updated_at,
    (SELECT COUNT(*) FROM collection_member WHERE collection_name = collection.name)
FROM collection
WHERE name = ?1
"#,
        params![name],
        |row| {
            Ok(CollectionRow {
                name: row.get(0)?,
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
                item_count: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Db)
}

pub fn list_collections(conn: &Connection) -> Result<Vec<CollectionRow>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
SELECT name, created_at, updated_at,
    (SELECT COUNT(*) FROM collection_member WHERE collection_name = collection.name)
FROM collection
ORDER BY name ASC
"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(CollectionRow {
            name: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            item_count: row.get(3)?,
        });
    }
    Ok(result)
}

pub fn touch_collection(conn: &Connection, name: &str, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE collection SET updated_at = ?2 WHERE name = ?1",
        params![name, now],
    )?;
    Ok(())
}

pub fn count_collections(conn: &Connection) -> Result<i64, StoreError> {
    conn.query_row("SELECT COUNT(*) FROM collection", [], |row| row.get(0))
        .map_err(StoreError::Db)
}

pub fn delete_collection_row(conn: &Connection, name: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM collection WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn rename_collection_rows(
    conn: &Connection,
    old: &str,
    new: &str,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE collection SET name = ?2, updated_at = ?3 WHERE name = ?1",
        params![old, new, now],
    )?;
    conn.execute(
        "UPDATE collection_member SET collection_name = ?2 WHERE collection_name = ?1",
        params![old, new],
    )?;
    conn.execute(
        "UPDATE item SET collection_name = ?2, updated_at = ?3 WHERE collection_name = ?1",
        params![old, new, now],
    )?;
    Ok(())
}

pub fn member_ids(conn: &Connection, collection: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT item_id FROM collection_member WHERE collection_name = ?1 ORDER BY item_id",
    )?;
    let mut rows = stmt.query(params![collection])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(row.get(0)?);
    }
    Ok(result)
}

pub fn is_member(conn: &Connection, collection: &str, item_id: &str) -> Result<bool, StoreError> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM collection_member WHERE collection_name = ?1 AND item_id = ?2)",
        params![collection, item_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// First collection holding the item, if any. Used by the move fallback
/// when the caller's notion of the source collection is stale.
pub fn membership_of(conn: &Connection, item_id: &str) -> Result<Option<String>, StoreError> {
    conn.query_row(
        r#"
SELECT collection_name FROM collection_member
WHERE item_id = ?1
ORDER BY collection_name ASC
LIMIT 1
"#,
        params![item_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::Db)
}

pub fn memberships_of(conn: &Connection, item_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT collection_name FROM collection_member WHERE item_id = ?1 ORDER BY collection_name",
    )?;
    let mut rows = stmt.query(params![item_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(row.get(0)?);
    }
    Ok(result)
}

/// Replaces every membership row for the item with a single row in
/// `collection`. Meant to run inside the caller's transaction.
pub fn set_membership(
    conn: &Connection,
    item_id: &str,
    collection: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM collection_member WHERE item_id = ?1",
        params![item_id],
    )?;
    conn.execute(
        "INSERT INTO collection_member (collection_name, item_id) VALUES (?1, ?2)",
        params![collection, item_id],
    )?;
    Ok(())
}

pub fn list_memberships(conn: &Connection) -> Result<Vec<(String, String)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT collection_name, item_id FROM collection_member \
         ORDER BY collection_name, item_id",
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push((row.get(0)?, row.get(1)?));
    }
    Ok(result)
}

pub fn list_image_item_ids(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT item_id FROM image ORDER BY item_id")?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(row.get(0)?);
    }
    Ok(result)
}

pub fn remove_membership(conn: &Connection, item_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM collection_member WHERE item_id = ?1",
        params![item_id],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub item_id: String,
    pub data: Vec<u8>,
    pub content_hash: String,
    pub remote_url: Option<String>,
    pub updated_at: String,
}

pub fn get_image(conn: &Connection, item_id: &str) -> Result<Option<ImageRecord>, StoreError> {
    conn.query_row(
        "SELECT item_id, data, content_hash, remote_url, updated_at FROM image WHERE item_id = ?1",
        params![item_id],
        |row| {
            Ok(ImageRecord {
                item_id: row.get(0)?,
                data: row.get(1)?,
                content_hash: row.get(2)?,
                remote_url: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Db)
}

pub fn put_image(conn: &Connection, record: &ImageRecord) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO image (item_id, data, content_hash, remote_url, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(item_id) DO UPDATE SET
    data = excluded.data,
    content_hash = excluded.content_hash,
    remote_url = excluded.remote_url,
    updated_at = excluded.updated_at
"#,
        params![
            record.item_id,
            record.data,
            record.content_hash,
            record.remote_url,
            record.updated_at
        ],
    )?;
    Ok(())
}

pub fn delete_image(conn: &Connection, item_id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM image WHERE item_id = ?1", params![item_id])?;
    Ok(())
}

pub fn get_invoice(conn: &Connection, id: &str) -> Result<Option<InvoiceRecord>, StoreError> {
    let raw: Option<(String, String, String, String, String, String)> = conn
        .query_row(
            "SELECT id, seller, invoice_date, lines_json, created_at, updated_at \
             FROM invoice WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;
    raw.map(raw_to_invoice).transpose()
}

pub fn list_invoices(conn: &Connection) -> Result<Vec<InvoiceRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, seller, invoice_date, lines_json, created_at, updated_at \
         FROM invoice ORDER BY created_at DESC, id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(raw_to_invoice((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))?);
    }
    Ok(result)
}

fn raw_to_invoice(
    raw: (String, String, String, String, String, String),
) -> Result<InvoiceRecord, StoreError> {
    let (id, seller, invoice_date, lines_json, created_at, updated_at) = raw;
    let lines = serde_json::from_str(&lines_json).map_err(|err| StoreError::Corrupt {
        what: "invoice lines",
        id: id.clone(),
        message: err.to_string(),
    })?;
    Ok(InvoiceRecord {
        id,
        seller,
        invoice_date,
        lines,
        created_at,
        updated_at,
    })
}

pub fn upsert_invoice(conn: &Connection, invoice: &InvoiceRecord) -> Result<(), StoreError> {
    let lines_json = serde_json::to_string(&invoice.lines).map_err(|err| StoreError::Corrupt {
        what: "invoice lines",
        id: invoice.id.clone(),
        message: err.to_string(),
    })?;
    conn.execute(
        r#"
INSERT INTO invoice (id, seller, invoice_date, lines_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(id) DO UPDATE SET
    seller = excluded.seller,
    invoice_date = excluded.invoice_date,
    lines_json = excluded.lines_json,
    created_at = COALESCE(invoice.created_at, excluded.created_at),
    updated_at = excluded.updated_at
"#,
        params![
            invoice.id,
            invoice.seller,
            invoice.invoice_date,
            lines_json,
            invoice.created_at,
            invoice.updated_at
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProfileRow {
    pub display_currency: String,
    pub device_id: String,
}

pub fn get_profile(conn: &Connection) -> Result<ProfileRow, StoreError> {
    conn.query_row(
        "SELECT display_currency, device_id FROM profile WHERE id = 1",
        [],
        |row| {
            Ok(ProfileRow {
                display_currency: row.get(0)?,
                device_id: row.get(1)?,
            })
        },
    )
    .map_err(StoreError::Db)
}

pub fn set_display_currency(conn: &Connection, currency: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE profile SET display_currency = ?1 WHERE id = 1",
        params![currency],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    pub kind: String,
    pub entity_id: String,
    pub queued_at: String,
    pub attempts: i64,
    pub next_attempt_at: String,
}

/// Queues (or re-queues) an entity for a shadow write. Re-marking resets
/// the backoff so the freshest mutation is pushed eagerly.
pub fn mark_dirty(
    conn: &Connection,
    kind: &str,
    entity_id: &str,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO sync_outbox (kind, entity_id, queued_at, attempts, next_attempt_at)
VALUES (?1, ?2, ?3, 0, ?3)
ON CONFLICT(kind, entity_id) DO UPDATE SET
    queued_at = excluded.queued_at,
    attempts = 0,
    next_attempt_at = excluded.next_attempt_at
"#,
        params![kind, entity_id, now],
    )?;
    Ok(())
}

pub fn list_outbox(conn: &Connection) -> Result<Vec<OutboxRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT kind, entity_id, queued_at, attempts, next_attempt_at \
         FROM sync_outbox ORDER BY queued_at ASC, entity_id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(OutboxRow {
            kind: row.get(0)?,
            entity_id: row.get(1)?,
            queued_at: row.get(2)?,
            attempts: row.get(3)?,
            next_attempt_at: row.get(4)?,
        });
    }
    Ok(result)
}

pub fn list_outbox_due(conn: &Connection, now: &str) -> Result<Vec<OutboxRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT kind, entity_id, queued_at, attempts, next_attempt_at \
         FROM sync_outbox WHERE next_attempt_at <= ?1 \
         ORDER BY queued_at ASC, entity_id ASC",
    )?;
    let mut rows = stmt.query(params![now])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(OutboxRow {
            kind: row.get(0)?,
            entity_id: row.get(1)?,
            queued_at: row.get(2)?,
            attempts: row.get(3)?,
            next_attempt_at: row.get(4)?,
        });
    }
    Ok(result)
}

/// Deletes the outbox row only if it has not been re-queued since the
/// push started; returns whether the row was cleared. A row that stays
/// behind represents a newer local mutation and must be pushed again.
pub fn clear_outbox_if_unchanged(
    conn: &Connection,
    kind: &str,
    entity_id: &str,
    queued_at: &str,
) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM sync_outbox WHERE kind = ?1 AND entity_id = ?2 AND queued_at = ?3",
        params![kind, entity_id, queued_at],
    )?;
    Ok(deleted > 0)
}

pub fn record_outbox_failure(
    conn: &Connection,
    kind: &str,
    entity_id: &str,
    attempts: i64,
    next_attempt_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE sync_outbox SET attempts = ?3, next_attempt_at = ?4 \
         WHERE kind = ?1 AND entity_id = ?2",
        params![kind, entity_id, attempts, next_attempt_at],
    )?;
    Ok(())
}

#[derive(Debug)]
pub enum StoreError {
    Db(rusqlite::Error),
    Corrupt {
        what: &'static str,
        id: String,
        message: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(err) => write!(f, "database error: {}", err),
            StoreError::Corrupt { what, id, message } => {
                write!(f, "corrupt {} for '{}': {}", what, id, message)
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Db(err) => Some(err),
            StoreError::Corrupt { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Db(value)
    }
}
