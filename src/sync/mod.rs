use std::error::Error;
use std::fmt;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::db::{self, StoreError};
use crate::ident::now_utc_rfc3339;

mod apply;
mod envelope;
mod mirror;
mod state;

pub use apply::{ApplySummary, RemoteApplier};
pub use envelope::{EnvelopeOp, MirrorDocument, SyncEnvelope};
pub use mirror::{FileMirror, Mirror, MirrorError};
pub use state::{EntityKey, EntityKind, InvalidPhaseTransition, StateTracker, SyncPhase};

pub const META_SYNC_CURSOR: &str = "sync_cursor";
pub const META_LAST_PULL_AT: &str = "last_pull_at";

const BASE_BACKOFF_SECS: i64 = 30;
const MAX_BACKOFF_SECS: i64 = 3600;

/// Doubling backoff capped at an hour. Backoff is recorded as a
/// next-attempt timestamp on the outbox row rather than slept on, so a
/// sync cycle never blocks.
pub fn backoff_delay_secs(attempts: i64) -> i64 {
    let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
    BASE_BACKOFF_SECS
        .saturating_mul(1_i64 << exponent)
        .min(MAX_BACKOFF_SECS)
}

fn rfc3339_plus_secs(base: &str, secs: i64) -> Result<String, SyncError> {
    let parsed =
        OffsetDateTime::parse(base, &Rfc3339).map_err(|_| SyncError::InvalidTimestamp {
            value: base.to_string(),
        })?;
    (parsed + Duration::seconds(secs))
        .format(&Rfc3339)
        .map_err(|_| SyncError::InvalidTimestamp {
            value: base.to_string(),
        })
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PushSummary {
    pub pushed: u64,
    pub tombstones: u64,
    pub failed: u64,
    pub deferred: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PullSummary {
    pub fetched: u64,
    pub item_upserts: u64,
    pub item_deletes: u64,
    pub collection_upserts: u64,
    pub collection_deletes: u64,
    pub skipped_stale: u64,
    pub skipped_own: u64,
    pub cursor: Option<String>,
    pub upserted_item_ids: Vec<String>,
    pub deleted_item_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub push: PushSummary,
    pub pull: PullSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboxStatusRow {
    pub kind: String,
    pub entity_id: String,
    pub attempts: i64,
    pub next_attempt_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub outbox_depth: u64,
    pub due_now: u64,
    pub cursor: Option<String>,
    pub last_pull_at: Option<String>,
    pub rows: Vec<OutboxStatusRow>,
}

/// Drains the durable dirty set to the mirror ("shadow writes") and
/// merges remote changes back in. Holds no authoritative state of its
/// own: the local store stays the source of truth, and a failed push
/// only delays propagation.
pub struct SyncCoordinator<'a> {
    conn: &'a mut Connection,
    mirror: &'a dyn Mirror,
    origin: String,
    tracker: StateTracker,
}

impl<'a> SyncCoordinator<'a> {
    pub fn new(conn: &'a mut Connection, mirror: &'a dyn Mirror, origin: impl Into<String>) -> Self {
        Self {
            conn,
            mirror,
            origin: origin.into(),
            tracker: StateTracker::new(),
        }
    }

    pub fn sync(&mut self) -> Result<SyncSummary, SyncError> {
        let push = self.push()?;
        let pull = self.pull()?;
        Ok(SyncSummary { push, pull })
    }

    /// Pushes every due outbox row as an idempotent upsert keyed by the
    /// entity id. Rows whose push fails are re-scheduled with backoff and
    /// stay in the outbox; nothing here ever blocks a local operation.
    pub fn push(&mut self) -> Result<PushSummary, SyncError> {
        let now = now_utc_rfc3339();
        let total = db::list_outbox(self.conn)?.len() as u64;
        let due = db::list_outbox_due(self.conn, &now)?;
        let mut summary = PushSummary {
            pushed: 0,
            tombstones: 0,
            failed: 0,
            deferred: total - due.len() as u64,
        };

        for row in due {
            let Ok(kind) = row.kind.parse::<EntityKind>() else {
                // a row this build cannot interpret can never be pushed
                db::clear_outbox_if_unchanged(self.conn, &row.kind, &row.entity_id, &row.queued_at)?;
                continue;
            };
            let key = EntityKey {
                kind,
                id: row.entity_id.clone(),
            };
            if self.tracker.begin_sync(&key).is_err() {
                continue;
            }

            let envelope = self.build_envelope(kind, &row.entity_id)?;
            let tombstone = envelope.op == EnvelopeOp::Delete;
            match self.mirror.upsert(&envelope.into_document()) {
                Ok(()) => {
                    let cleared = db::clear_outbox_if_unchanged(
                        self.conn,
                        &row.kind,
                        &row.entity_id,
                        &row.queued_at,
                    )?;
                    if !cleared {
                        // re-queued mid-flight: the newer state pushes next cycle
                        self.tracker.mark_dirty(&key);
                    }
                    self.tracker.finish_sync(&key, true);
                    if tombstone {
                        summary.tombstones += 1;
                    } else {
                        summary.pushed += 1;
                    }
                }
                Err(err) => {
                    let attempts = row.attempts + 1;
                    let next_attempt_at = rfc3339_plus_secs(&now, backoff_delay_secs(attempts))?;
                    db::record_outbox_failure(
                        self.conn,
                        &row.kind,
                        &row.entity_id,
                        attempts,
                        &next_attempt_at,
                    )?;
                    self.tracker.finish_sync(&key, false);
                    summary.failed += 1;
                    eprintln!(
                        "warning: shadow write for {} deferred until {}: {}",
                        key, next_attempt_at, err
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Fetches documents newer than the stored cursor and merges them in
    /// with last-write-wins.
    pub fn pull(&mut self) -> Result<PullSummary, SyncError> {
        let cursor = db::get_meta(self.conn, META_SYNC_CURSOR)?;
        let docs = self.mirror.fetch_since(cursor.as_deref())?;

        let applied = RemoteApplier::new(&mut *self.conn, &self.origin).apply(&docs)?;

        let next_cursor = docs
            .iter()
            .map(|doc| doc.last_modified.clone())
            .max()
            .or(cursor);
        if let Some(value) = &next_cursor {
            db::set_meta(self.conn, META_SYNC_CURSOR, value)?;
        }
        db::set_meta(self.conn, META_LAST_PULL_AT, &now_utc_rfc3339())?;

        Ok(PullSummary {
            fetched: docs.len() as u64,
            item_upserts: applied.item_upserts,
            item_deletes: applied.item_deletes,
            collection_upserts: applied.collection_upserts,
            collection_deletes: applied.collection_deletes,
            skipped_stale: applied.skipped_stale,
            skipped_own: applied.skipped_own,
            cursor: next_cursor,
            upserted_item_ids: applied.upserted_item_ids,
            deleted_item_ids: applied.deleted_item_ids,
        })
    }

    /// Builds the envelope for an entity from its current local state.
    /// An entity that no longer exists locally travels as a tombstone.
    fn build_envelope(&self, kind: EntityKind, entity_id: &str) -> Result<SyncEnvelope, SyncError> {
        match kind {
            EntityKind::Item => match db::get_item(self.conn, entity_id)? {
                Some(item) => Ok(SyncEnvelope::upsert_at(
                    self.origin.clone(),
                    kind,
                    entity_id,
                    item.updated_at.clone(),
                    serde_json::to_value(&item).map_err(|err| SyncError::InvalidDocument {
                        id: entity_id.to_string(),
                        message: err.to_string(),
                    })?,
                )),
                None => Ok(SyncEnvelope::delete(self.origin.clone(), kind, entity_id)),
            },
            EntityKind::Collection => match db::get_collection(self.conn, entity_id)? {
                Some(row) => Ok(SyncEnvelope::upsert_at(
                    self.origin.clone(),
                    kind,
                    entity_id,
                    row.updated_at.clone(),
                    json!({
                        "name": row.name,
                        "created_at": row.created_at,
                        "updated_at": row.updated_at,
                    }),
                )),
                None => Ok(SyncEnvelope::delete(self.origin.clone(), kind, entity_id)),
            },
        }
    }
}

pub fn sync_status(conn: &Connection) -> Result<SyncStatus, SyncError> {
    let now = now_utc_rfc3339();
    let rows = db::list_outbox(conn)?;
    let due_now = rows
        .iter()
        .filter(|row| row.next_attempt_at.as_str() <= now.as_str())
        .count() as u64;
    Ok(SyncStatus {
        outbox_depth: rows.len() as u64,
        due_now,
        cursor: db::get_meta(conn, META_SYNC_CURSOR)?,
        last_pull_at: db::get_meta(conn, META_LAST_PULL_AT)?,
        rows: rows
            .into_iter()
            .map(|row| OutboxStatusRow {
                kind: row.kind,
                entity_id: row.entity_id,
                attempts: row.attempts,
                next_attempt_at: row.next_attempt_at,
            })
            .collect(),
    })
}

#[derive(Debug)]
pub enum SyncError {
    Store(StoreError),
    MirrorUnavailable { message: String },
    InvalidDocument { id: String, message: String },
    InvalidTimestamp { value: String },
}

impl SyncError {
    /// Retry-with-backoff failures, as opposed to local data problems.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::MirrorUnavailable { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Store(err) => write!(f, "{}", err),
            SyncError::MirrorUnavailable { message } => {
                write!(f, "cloud mirror unavailable: {}", message)
            }
            SyncError::InvalidDocument { id, message } => {
                write!(f, "invalid mirror document for '{}': {}", id, message)
            }
            SyncError::InvalidTimestamp { value } => {
                write!(f, "invalid RFC3339 timestamp '{}'", value)
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        SyncError::Store(value)
    }
}

impl From<MirrorError> for SyncError {
    fn from(value: MirrorError) -> Self {
        SyncError::MirrorUnavailable {
            message: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
