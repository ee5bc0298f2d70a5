use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use rusqlite::Connection;

use crate::db::{self, ImageRecord, StoreError, KIND_ITEM};
use crate::events::{ChangeBus, ChangeEvent};
use crate::ident::{content_fingerprint, new_handle_id, new_pending_id, now_utc_rfc3339};

/// Where a live handle draws its pixels from. A remote URL is preferred
/// so the local blob does not have to be kept alive once an upload
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote(String),
    Blob(Vec<u8>),
}

/// A live, revocable reference to image data. Runtime-only, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub handle_id: String,
    pub item_id: String,
    pub source: ImageSource,
    pub created_at: String,
}

/// A staged preview awaiting commit or discard. Staging never touches
/// the durable image record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub pending_id: String,
    pub item_id: String,
    pub content_hash: String,
    pub staged_at: String,
    bytes: Vec<u8>,
}

impl PendingImage {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

struct LiveHandle {
    item_id: String,
    revoked: bool,
}

/// Persists a committed binary somewhere remote and returns its URL, or
/// `None` when operating purely locally.
pub trait ImageUploader {
    fn upload(
        &self,
        item_id: &str,
        bytes: &[u8],
        content_hash: &str,
    ) -> Result<Option<String>, UploadError>;
}

/// No-remote uploader used while sync is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyUploader;

impl ImageUploader for LocalOnlyUploader {
    fn upload(&self, _: &str, _: &[u8], _: &str) -> Result<Option<String>, UploadError> {
        Ok(None)
    }
}

/// Tracks every outstanding handle and staged preview. Each acquire pairs
/// with exactly one release; a second release of the same handle is a
/// no-op so teardown races stay harmless.
#[derive(Default)]
pub struct ImageManager {
    live: HashMap<String, LiveHandle>,
    pending: HashMap<String, PendingImage>,
    pending_by_item: HashMap<String, String>,
}

impl ImageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &mut self,
        conn: &Connection,
        item_id: &str,
    ) -> Result<Option<ImageHandle>, ImageError> {
        let Some(record) = db::get_image(conn, item_id)? else {
            return Ok(None);
        };
        let source = match record.remote_url {
            Some(url) => ImageSource::Remote(url),
            None => ImageSource::Blob(record.data),
        };
        let handle_id = new_handle_id();
        self.live.insert(
            handle_id.clone(),
            LiveHandle {
                item_id: item_id.to_string(),
                revoked: false,
            },
        );
        Ok(Some(ImageHandle {
            handle_id,
            item_id: item_id.to_string(),
            source,
            created_at: now_utc_rfc3339(),
        }))
    }

    /// Revokes a handle; returns whether this call did the revoking.
    pub fn release(&mut self, handle_id: &str) -> bool {
        match self.live.get_mut(handle_id) {
            Some(entry) if !entry.revoked => {
                entry.revoked = true;
                true
            }
            Some(_) => {
                #[cfg(debug_assertions)]
                eprintln!("warning: image handle '{handle_id}' released twice");
                false
            }
            None => false,
        }
    }

    pub fn is_live(&self, handle_id: &str) -> bool {
        self.live
            .get(handle_id)
            .is_some_and(|entry| !entry.revoked)
    }

    pub fn outstanding(&self, item_id: &str) -> usize {
        self.live
            .values()
            .filter(|entry| !entry.revoked && entry.item_id == item_id)
            .count()
    }

    pub fn live_count(&self) -> usize {
        self.live.values().filter(|entry| !entry.revoked).count()
    }

    /// Force-revokes every live handle for the given items and broadcasts
    /// the invalidation so open views can close before the rows go away.
    pub fn invalidate_items(&mut self, bus: &ChangeBus, item_ids: &[String]) -> usize {
        bus.publish(&ChangeEvent::ImagesInvalidated {
            item_ids: item_ids.to_vec(),
        });
        self.revoke_for_items(item_ids)
    }

    pub fn revoke_for_items(&mut self, item_ids: &[String]) -> usize {
        let mut revoked = 0;
        for entry in self.live.values_mut() {
            if !entry.revoked && item_ids.iter().any(|id| id == &entry.item_id) {
                entry.revoked = true;
                revoked += 1;
            }
        }
        revoked
    }

    /// Stages an in-memory preview for the item. At most one pending
    /// preview exists per item: staging again replaces it, and staging a
    /// byte-identical binary returns the existing preview.
    pub fn stage(&mut self, item_id: &str, bytes: Vec<u8>) -> PendingImage {
        let content_hash = content_fingerprint(&bytes);
        if let Some(existing_id) = self.pending_by_item.get(item_id) {
            if let Some(existing) = self.pending.get(existing_id) {
                if existing.content_hash == content_hash {
                    return existing.clone();
                }
            }
            let stale = existing_id.clone();
            self.pending.remove(&stale);
        }

        let staged = PendingImage {
            pending_id: new_pending_id(),
            item_id: item_id.to_string(),
            content_hash,
            staged_at: now_utc_rfc3339(),
            bytes,
        };
        self.pending_by_item
            .insert(item_id.to_string(), staged.pending_id.clone());
        self.pending.insert(staged.pending_id.clone(), staged.clone());
        staged
    }

    pub fn pending_for(&self, item_id: &str) -> Option<&PendingImage> {
        self.pending_by_item
            .get(item_id)
            .and_then(|pending_id| self.pending.get(pending_id))
    }

    pub fn discard(&mut self, pending_id: &str) -> bool {
        match self.pending.remove(pending_id) {
            Some(staged) => {
                self.pending_by_item.remove(&staged.item_id);
                true
            }
            None => false,
        }
    }

    /// Uploads the staged binary, then persists the durable record and
    /// the item's bumped timestamp in one transaction. Any failure leaves
    /// the prior record and the staged preview untouched so the enclosing
    /// save can abort cleanly.
    pub fn commit(
        &mut self,
        conn: &mut Connection,
        uploader: &dyn ImageUploader,
        pending_id: &str,
    ) -> Result<ImageRecord, ImageError> {
        let staged = self
            .pending
            .get(pending_id)
            .ok_or_else(|| ImageError::NoStagedImage(pending_id.to_string()))?;
        if db::get_item(conn, &staged.item_id)?.is_none() {
            return Err(ImageError::ItemMissing(staged.item_id.clone()));
        }

        let remote_url = uploader
            .upload(&staged.item_id, &staged.bytes, &staged.content_hash)
            .map_err(|err| ImageError::CommitFailed {
                item_id: staged.item_id.clone(),
                message: err.to_string(),
            })?;

        let now = now_utc_rfc3339();
        let record = ImageRecord {
            item_id: staged.item_id.clone(),
            data: staged.bytes.clone(),
            content_hash: staged.content_hash.clone(),
            remote_url,
            updated_at: now.clone(),
        };

        let item_id = staged.item_id.clone();
        let tx = conn.transaction().map_err(StoreError::Db)?;
        db::put_image(&tx, &record)?;
        db::touch_item(&tx, &item_id, &now)?;
        db::mark_dirty(&tx, KIND_ITEM, &item_id, &now)?;
        tx.commit().map_err(StoreError::Db)?;

        self.pending.remove(pending_id);
        self.pending_by_item.remove(&item_id);
        Ok(record)
    }

    /// Deletes the durable record and revokes any live handles for the
    /// item.
    pub fn remove(
        &mut self,
        conn: &mut Connection,
        bus: &ChangeBus,
        item_id: &str,
    ) -> Result<bool, ImageError> {
        if db::get_image(conn, item_id)?.is_none() {
            return Ok(false);
        }
        self.invalidate_items(bus, &[item_id.to_string()]);

        let now = now_utc_rfc3339();
        let tx = conn.transaction().map_err(StoreError::Db)?;
        db::delete_image(&tx, item_id)?;
        db::touch_item(&tx, item_id, &now)?;
        db::mark_dirty(&tx, KIND_ITEM, item_id, &now)?;
        tx.commit().map_err(StoreError::Db)?;
        Ok(true)
    }
}

#[derive(Debug)]
pub struct UploadError {
    pub message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload failed: {}", self.message)
    }
}

impl Error for UploadError {}

#[derive(Debug)]
pub enum ImageError {
    Store(StoreError),
    CommitFailed { item_id: String, message: String },
    NoStagedImage(String),
    ItemMissing(String),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Store(err) => write!(f, "{}", err),
            ImageError::CommitFailed { item_id, message } => {
                write!(f, "image commit failed for item '{}': {}", item_id, message)
            }
            ImageError::NoStagedImage(id) => {
                write!(f, "no staged image for '{}'", id)
            }
            ImageError::ItemMissing(id) => {
                write!(f, "cannot commit image: item '{}' does not exist", id)
            }
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImageError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ImageError {
    fn from(value: StoreError) -> Self {
        ImageError::Store(value)
    }
}
