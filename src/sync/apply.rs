use rusqlite::Connection;

use crate::db::{self, DEFAULT_COLLECTION};
use crate::domain::item::Item;

use super::envelope::MirrorDocument;
use super::state::EntityKind;
use super::SyncError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub item_upserts: u64,
    pub item_deletes: u64,
    pub collection_upserts: u64,
    pub collection_deletes: u64,
    pub skipped_stale: u64,
    pub skipped_own: u64,
    pub upserted_item_ids: Vec<String>,
    pub deleted_item_ids: Vec<String>,
}

/// Merges remote listener events into the local store. Conflict policy
/// is last-write-wins on the document timestamp; there is no field-level
/// merge, so the losing side of a concurrent edit is dropped wholesale.
pub struct RemoteApplier<'a> {
    conn: &'a mut Connection,
    local_origin: &'a str,
}

impl<'a> RemoteApplier<'a> {
    pub fn new(conn: &'a mut Connection, local_origin: &'a str) -> Self {
        Self { conn, local_origin }
    }

    pub fn apply(&mut self, docs: &[MirrorDocument]) -> Result<ApplySummary, SyncError> {
        let mut summary = ApplySummary::default();
        for doc in docs {
            if doc.origin == self.local_origin {
                summary.skipped_own += 1;
                continue;
            }
            match doc.kind {
                EntityKind::Item => self.apply_item(doc, &mut summary)?,
                EntityKind::Collection => self.apply_collection(doc, &mut summary)?,
            }
        }
        Ok(summary)
    }

    fn apply_item(
        &mut self,
        doc: &MirrorDocument,
        summary: &mut ApplySummary,
    ) -> Result<(), SyncError> {
        let local = db::get_item(self.conn, &doc.id)?;
        if let Some(existing) = &local {
            if existing.updated_at.as_str() >= doc.last_modified.as_str() {
                summary.skipped_stale += 1;
                return Ok(());
            }
        }

        if doc.deleted {
            if local.is_none() {
                summary.skipped_stale += 1;
                return Ok(());
            }
            let tx = self.conn.transaction().map_err(db::StoreError::Db)?;
            db::delete_image(&tx, &doc.id)?;
            db::remove_membership(&tx, &doc.id)?;
            db::delete_item(&tx, &doc.id)?;
            tx.commit().map_err(db::StoreError::Db)?;
            summary.item_deletes += 1;
            summary.deleted_item_ids.push(doc.id.clone());
            return Ok(());
        }

        let incoming: Item =
            serde_json::from_value(doc.payload.clone()).map_err(|err| SyncError::InvalidDocument {
                id: doc.id.clone(),
                message: err.to_string(),
            })?;
        if incoming.id != doc.id {
            return Err(SyncError::InvalidDocument {
                id: doc.id.clone(),
                message: format!("payload id '{}' does not match document key", incoming.id),
            });
        }

        let tx = self.conn.transaction().map_err(db::StoreError::Db)?;
        db::ensure_collection(&tx, &incoming.collection, &doc.last_modified)?;
        db::set_membership(&tx, &incoming.id, &incoming.collection)?;
        db::upsert_item(&tx, &incoming)?;
        tx.commit().map_err(db::StoreError::Db)?;
        summary.item_upserts += 1;
        summary.upserted_item_ids.push(doc.id.clone());
        Ok(())
    }

    fn apply_collection(
        &mut self,
        doc: &MirrorDocument,
        summary: &mut ApplySummary,
    ) -> Result<(), SyncError> {
        let local = db::get_collection(self.conn, &doc.id)?;
        if let Some(existing) = &local {
            if existing.updated_at.as_str() >= doc.last_modified.as_str() {
                summary.skipped_stale += 1;
                return Ok(());
            }
        }

        if doc.deleted {
            let Some(existing) = local else {
                summary.skipped_stale += 1;
                return Ok(());
            };
            // never violate the local invariants to honor a remote
            // delete: at least one collection must remain, and members
            // must not be orphaned
            if db::count_collections(self.conn)? <= 1 {
                summary.skipped_stale += 1;
                return Ok(());
            }
            if existing.item_count > 0 && existing.name == DEFAULT_COLLECTION {
                summary.skipped_stale += 1;
                return Ok(());
            }

            let members = db::member_ids(self.conn, &doc.id)?;
            let tx = self.conn.transaction().map_err(db::StoreError::Db)?;
            if !members.is_empty() {
                db::ensure_collection(&tx, DEFAULT_COLLECTION, &doc.last_modified)?;
                for item_id in &members {
                    db::set_membership(&tx, item_id, DEFAULT_COLLECTION)?;
                    if let Some(mut item) = db::get_item(&tx, item_id)? {
                        item.collection = DEFAULT_COLLECTION.to_string();
                        db::upsert_item(&tx, &item)?;
                    }
                }
            }
            db::delete_collection_row(&tx, &doc.id)?;
            tx.commit().map_err(db::StoreError::Db)?;
            summary.collection_deletes += 1;
            return Ok(());
        }

        if local.is_some() {
            db::touch_collection(self.conn, &doc.id, &doc.last_modified)?;
        } else {
            db::ensure_collection(self.conn, &doc.id, &doc.last_modified)?;
        }
        summary.collection_upserts += 1;
        Ok(())
    }
}
