use std::error::Error;
use std::fmt;
use std::sync::mpsc::Receiver;

use rusqlite::Connection;
use serde::Serialize;

use crate::collections::{CollectionService, CollectionError, DeleteOutcome, MemberDisposition, MoveOutcome};
use crate::config::{Config, ConfigError};
use crate::db::{self, CollectionRow, ImageRecord, ProfileRow, StoreError, KIND_COLLECTION, KIND_ITEM};
use crate::domain::invoice::InvoiceRecord;
use crate::domain::item::{Item, ItemDraft, ItemPatch, ItemValidationError};
use crate::domain::money::Money;
use crate::events::{ChangeBus, ChangeEvent};
use crate::ident::{new_invoice_id, new_item_id, now_utc_rfc3339};
use crate::images::{ImageError, ImageHandle, ImageManager, LocalOnlyUploader, PendingImage};
use crate::listing::{apply_filters, ItemListFilter};
use crate::sync::{
    sync_status, FileMirror, PullSummary, PushSummary, SyncCoordinator, SyncError, SyncStatus,
    SyncSummary,
};

/// Facade over the local store: the only surface the UI layer calls.
/// Owns the connection, the image manager, and the change bus; the sync
/// coordinator is constructed per cycle when the feature toggle allows.
pub struct App {
    conn: Connection,
    images: ImageManager,
    bus: ChangeBus,
    config: Config,
    degraded: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckFinding {
    pub code: &'static str,
    pub message: String,
}

impl App {
    /// Opens the durable store, falling back to an in-memory store with
    /// the default collection when the database is missing its marbles.
    /// Availability beats purity here: the app starts fresh instead of
    /// refusing to run.
    pub fn open(db_path: &str, config: Config) -> Result<Self, AppError> {
        ensure_parent_dir(db_path)?;
        let (conn, degraded) = match db::open_connection(db_path) {
            Ok(conn) => (conn, false),
            Err(err) => {
                eprintln!(
                    "warning: local store unavailable ({err}); starting fresh with an in-memory store"
                );
                (db::open_in_memory()?, true)
            }
        };
        Ok(Self {
            conn,
            images: ImageManager::new(),
            bus: ChangeBus::new(),
            config,
            degraded,
        })
    }

    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.bus.subscribe()
    }

    pub fn device_id(&self) -> Result<String, AppError> {
        Ok(db::get_profile(&self.conn)?.device_id)
    }

    pub fn create_item(
        &mut self,
        draft: ItemDraft,
        collection: Option<&str>,
    ) -> Result<Item, AppError> {
        let attrs = draft.validate()?;
        let collection = match collection {
            Some(raw) => {
                let name = raw.trim().to_string();
                if name.is_empty() {
                    return Err(CollectionError::EmptyName.into());
                }
                if crate::collections::is_reserved(&name) {
                    return Err(CollectionError::ReservedName(name).into());
                }
                name
            }
            None => db::DEFAULT_COLLECTION.to_string(),
        };

        let now = now_utc_rfc3339();
        let item = Item {
            id: new_item_id(),
            name: attrs.name,
            set_name: attrs.set_name,
            year: attrs.year,
            condition: attrs.condition,
            grade: attrs.grade,
            acquisition: attrs.acquisition,
            value: attrs.value,
            collection: collection.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        let tx = self.conn.transaction().map_err(StoreError::Db)?;
        db::ensure_collection(&tx, &collection, &now)?;
        db::touch_collection(&tx, &collection, &now)?;
        db::upsert_item(&tx, &item)?;
        db::set_membership(&tx, &item.id, &collection)?;
        db::mark_dirty(&tx, KIND_ITEM, &item.id, &now)?;
        db::mark_dirty(&tx, KIND_COLLECTION, &collection, &now)?;
        tx.commit().map_err(StoreError::Db)?;

        self.bus.publish(&ChangeEvent::ItemsChanged {
            ids: vec![item.id.clone()],
        });
        self.bus.publish(&ChangeEvent::CollectionsChanged {
            names: vec![collection],
        });
        Ok(item)
    }

    pub fn update_item(&mut self, id: &str, patch: ItemPatch) -> Result<Item, AppError> {
        if !patch.has_changes() {
            return Err(AppError::InvalidArgument(
                "update requires at least one field change".to_string(),
            ));
        }
        let mut item = self
            .show_item(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        if !patch.apply(&mut item)? {
            return Ok(item);
        }

        let now = now_utc_rfc3339();
        item.updated_at = now.clone();
        let tx = self.conn.transaction().map_err(StoreError::Db)?;
        db::upsert_item(&tx, &item)?;
        db::mark_dirty(&tx, KIND_ITEM, id, &now)?;
        tx.commit().map_err(StoreError::Db)?;

        self.bus.publish(&ChangeEvent::ItemsChanged {
            ids: vec![id.to_string()],
        });
        Ok(item)
    }

    /// Commits the staged image, then applies the field patch. The image
    /// commit runs first and any failure aborts the whole save: no
    /// half-updated item may ever reference a binary that was not
    /// persisted.
    pub fn save_item_with_image(
        &mut self,
        id: &str,
        patch: ItemPatch,
        pending_id: &str,
    ) -> Result<Item, AppError> {
        let mut item = self
            .show_item(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        let changed = patch.apply(&mut item)?;

        self.commit_image(pending_id)?;

        if changed {
            let now = now_utc_rfc3339();
            item.updated_at = now.clone();
            let tx = self.conn.transaction().map_err(StoreError::Db)?;
            db::upsert_item(&tx, &item)?;
            db::mark_dirty(&tx, KIND_ITEM, id, &now)?;
            tx.commit().map_err(StoreError::Db)?;
            self.bus.publish(&ChangeEvent::ItemsChanged {
                ids: vec![id.to_string()],
            });
            Ok(item)
        } else {
            self.show_item(id)?
                .ok_or_else(|| AppError::NotFound(id.to_string()))
        }
    }

    pub fn delete_item(&mut self, id: &str) -> Result<(), AppError> {
        if self.show_item(id)?.is_none() {
            return Err(AppError::NotFound(id.to_string()));
        }
        let collection = db::membership_of(&self.conn, id)?;
        self.images.invalidate_items(&self.bus, &[id.to_string()]);

        let now = now_utc_rfc3339();
        let tx = self.conn.transaction().map_err(StoreError::Db)?;
        db::delete_image(&tx, id)?;
        db::remove_membership(&tx, id)?;
        db::delete_item(&tx, id)?;
        db::mark_dirty(&tx, KIND_ITEM, id, &now)?;
        if let Some(collection) = &collection {
            db::touch_collection(&tx, collection, &now)?;
            db::mark_dirty(&tx, KIND_COLLECTION, collection, &now)?;
        }
        tx.commit().map_err(StoreError::Db)?;

        self.bus.publish(&ChangeEvent::ItemsChanged {
            ids: vec![id.to_string()],
        });
        if let Some(collection) = collection {
            self.bus.publish(&ChangeEvent::CollectionsChanged {
                names: vec![collection],
            });
        }
        Ok(())
    }

    pub fn show_item(&self, id: &str) -> Result<Option<Item>, AppError> {
        Ok(db::get_item(&self.conn, id)?)
    }

    pub fn list_items(&self, filter: &ItemListFilter) -> Result<Vec<Item>, AppError> {
        Ok(apply_filters(db::list_items(&self.conn)?, filter))
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionRow>, AppError> {
        Ok(db::list_collections(&self.conn)?)
    }

    pub fn create_collection(&mut self, name: &str) -> Result<String, AppError> {
        let mut service = CollectionService::new(&mut self.conn, &self.bus);
        Ok(service.create(name)?)
    }

    pub fn rename_collection(&mut self, old: &str, new: &str) -> Result<String, AppError> {
        let mut service = CollectionService::new(&mut self.conn, &self.bus);
        Ok(service.rename(old, new)?)
    }

    pub fn delete_collection(
        &mut self,
        name: &str,
        disposition: MemberDisposition,
    ) -> Result<DeleteOutcome, AppError> {
        let outcome = {
            let mut service = CollectionService::new(&mut self.conn, &self.bus);
            service.delete(name, disposition)?
        };
        if !outcome.discarded.is_empty() {
            self.images.revoke_for_items(&outcome.discarded);
        }
        Ok(outcome)
    }

    pub fn move_item(
        &mut self,
        item_id: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<MoveOutcome, AppError> {
        let mut service = CollectionService::new(&mut self.conn, &self.bus);
        Ok(service.move_item(item_id, from, to)?)
    }

    pub fn acquire_image(&mut self, item_id: &str) -> Result<Option<ImageHandle>, AppError> {
        Ok(self.images.acquire(&self.conn, item_id)?)
    }

    pub fn release_image(&mut self, handle_id: &str) -> bool {
        self.images.release(handle_id)
    }

    pub fn stage_image(&mut self, item_id: &str, bytes: Vec<u8>) -> Result<PendingImage, AppError> {
        if self.show_item(item_id)?.is_none() {
            return Err(AppError::NotFound(item_id.to_string()));
        }
        Ok(self.images.stage(item_id, bytes))
    }

    pub fn commit_image(&mut self, pending_id: &str) -> Result<ImageRecord, AppError> {
        let enabled = self.config.sync.enabled;
        let mirror_dir = self.config.sync.mirror_dir.clone();
        let record = match (enabled, mirror_dir) {
            (true, Some(dir)) => {
                let uploader = FileMirror::new(dir);
                self.images.commit(&mut self.conn, &uploader, pending_id)?
            }
            _ => self
                .images
                .commit(&mut self.conn, &LocalOnlyUploader, pending_id)?,
        };
        self.bus.publish(&ChangeEvent::ItemsChanged {
            ids: vec![record.item_id.clone()],
        });
        Ok(record)
    }

    pub fn commit_image_for(&mut self, item_id: &str) -> Result<ImageRecord, AppError> {
        let pending_id = self
            .images
            .pending_for(item_id)
            .map(|staged| staged.pending_id.clone())
            .ok_or_else(|| ImageError::NoStagedImage(item_id.to_string()))?;
        self.commit_image(&pending_id)
    }

    pub fn pending_image(&self, item_id: &str) -> Option<PendingImage> {
        self.images.pending_for(item_id).cloned()
    }

    pub fn discard_image_for(&mut self, item_id: &str) -> bool {
        match self
            .images
            .pending_for(item_id)
            .map(|staged| staged.pending_id.clone())
        {
            Some(pending_id) => self.images.discard(&pending_id),
            None => false,
        }
    }

    pub fn image_record(&self, item_id: &str) -> Result<Option<ImageRecord>, AppError> {
        Ok(db::get_image(&self.conn, item_id)?)
    }

    pub fn remove_image(&mut self, item_id: &str) -> Result<bool, AppError> {
        Ok(self.images.remove(&mut self.conn, &self.bus, item_id)?)
    }

    pub fn outstanding_handles(&self, item_id: &str) -> usize {
        self.images.outstanding(item_id)
    }

    pub fn create_invoice(
        &mut self,
        item_ids: &[String],
        seller: &str,
        invoice_date: &str,
    ) -> Result<InvoiceRecord, AppError> {
        let seller = seller.trim();
        if seller.is_empty() {
            return Err(AppError::InvalidArgument(
                "invoice seller cannot be empty".to_string(),
            ));
        }
        if item_ids.is_empty() {
            return Err(AppError::InvalidArgument(
                "invoice requires at least one item".to_string(),
            ));
        }
        let items = self.load_items(item_ids)?;
        let now = now_utc_rfc3339();
        let invoice =
            InvoiceRecord::snapshot(new_invoice_id(), seller, invoice_date.trim(), &items, &now);
        db::upsert_invoice(&self.conn, &invoice)?;
        Ok(invoice)
    }

    /// Explicit edit flow: the snapshot is rebuilt wholesale from the
    /// current item state. Invoices are never touched by sync.
    pub fn edit_invoice(
        &mut self,
        id: &str,
        seller: Option<&str>,
        invoice_date: Option<&str>,
        item_ids: Option<&[String]>,
    ) -> Result<InvoiceRecord, AppError> {
        let mut invoice = db::get_invoice(&self.conn, id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        let seller = seller
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&invoice.seller)
            .to_string();
        let invoice_date = invoice_date
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&invoice.invoice_date)
            .to_string();
        let ids: Vec<String> = match item_ids {
            Some(ids) => ids.to_vec(),
            None => invoice
                .lines
                .iter()
                .map(|line| line.item_id.clone())
                .collect(),
        };
        let items = self.load_items(&ids)?;
        invoice.resnapshot(&seller, &invoice_date, &items, &now_utc_rfc3339());
        db::upsert_invoice(&self.conn, &invoice)?;
        Ok(invoice)
    }

    pub fn show_invoice(&self, id: &str) -> Result<Option<InvoiceRecord>, AppError> {
        Ok(db::get_invoice(&self.conn, id)?)
    }

    pub fn list_invoices(&self) -> Result<Vec<InvoiceRecord>, AppError> {
        Ok(db::list_invoices(&self.conn)?)
    }

    pub fn profile(&self) -> Result<ProfileRow, AppError> {
        Ok(db::get_profile(&self.conn)?)
    }

    pub fn set_display_currency(&mut self, currency: &str) -> Result<ProfileRow, AppError> {
        let normalized = Money::new(0, currency)
            .map_err(|err| AppError::InvalidArgument(err.to_string()))?
            .currency;
        db::set_display_currency(&self.conn, &normalized)?;
        self.profile()
    }

    pub fn sync(&mut self) -> Result<SyncSummary, AppError> {
        let mirror = self.mirror()?;
        let origin = self.device_id()?;
        let summary = SyncCoordinator::new(&mut self.conn, &mirror, origin).sync()?;
        self.after_pull(&summary.pull);
        Ok(summary)
    }

    pub fn push(&mut self) -> Result<PushSummary, AppError> {
        let mirror = self.mirror()?;
        let origin = self.device_id()?;
        Ok(SyncCoordinator::new(&mut self.conn, &mirror, origin).push()?)
    }

    pub fn pull(&mut self) -> Result<PullSummary, AppError> {
        let mirror = self.mirror()?;
        let origin = self.device_id()?;
        let summary = SyncCoordinator::new(&mut self.conn, &mirror, origin).pull()?;
        self.after_pull(&summary);
        Ok(summary)
    }

    pub fn sync_status(&self) -> Result<SyncStatus, AppError> {
        Ok(sync_status(&self.conn)?)
    }

    pub fn sync_enabled(&self) -> bool {
        self.config.sync.enabled
    }

    /// Read-only invariant scan: every item sits in exactly one
    /// collection, membership rows are consistent, and no image outlives
    /// its item.
    pub fn check(&self) -> Result<Vec<CheckFinding>, AppError> {
        let mut findings = Vec::new();

        for item in db::list_items(&self.conn)? {
            let memberships = db::memberships_of(&self.conn, &item.id)?;
            match memberships.len() {
                0 => findings.push(CheckFinding {
                    code: "item_without_collection",
                    message: format!("item '{}' belongs to no collection", item.id),
                }),
                1 => {
                    if memberships[0] != item.collection {
                        findings.push(CheckFinding {
                            code: "membership_mismatch",
                            message: format!(
                                "item '{}' declares collection '{}' but is a member of '{}'",
                                item.id, item.collection, memberships[0]
                            ),
                        });
                    }
                }
                _ => findings.push(CheckFinding {
                    code: "item_in_multiple_collections",
                    message: format!(
                        "item '{}' belongs to {} collections: {}",
                        item.id,
                        memberships.len(),
                        memberships.join(", ")
                    ),
                }),
            }
        }

        for (collection, item_id) in db::list_memberships(&self.conn)? {
            if !db::collection_exists(&self.conn, &collection)? {
                findings.push(CheckFinding {
                    code: "member_of_missing_collection",
                    message: format!(
                        "membership row references missing collection '{collection}' for item '{item_id}'"
                    ),
                });
            }
            if db::get_item(&self.conn, &item_id)?.is_none() {
                findings.push(CheckFinding {
                    code: "member_without_item",
                    message: format!(
                        "membership row in '{collection}' references missing item '{item_id}'"
                    ),
                });
            }
        }

        for item_id in db::list_image_item_ids(&self.conn)? {
            if db::get_item(&self.conn, &item_id)?.is_none() {
                findings.push(CheckFinding {
                    code: "image_without_item",
                    message: format!("image record references missing item '{item_id}'"),
                });
            }
        }

        Ok(findings)
    }

    fn mirror(&self) -> Result<FileMirror, AppError> {
        if !self.config.sync.enabled {
            return Err(AppError::SyncDisabled);
        }
        let dir = self
            .config
            .sync
            .mirror_dir
            .clone()
            .ok_or_else(|| {
                AppError::InvalidArgument("sync.mirror_dir is not configured".to_string())
            })?;
        Ok(FileMirror::new(dir))
    }

    fn after_pull(&mut self, pull: &PullSummary) {
        if !pull.deleted_item_ids.is_empty() {
            self.images
                .invalidate_items(&self.bus, &pull.deleted_item_ids);
        }
        let mut changed = pull.upserted_item_ids.clone();
        changed.extend(pull.deleted_item_ids.iter().cloned());
        if !changed.is_empty() {
            self.bus.publish(&ChangeEvent::ItemsChanged { ids: changed });
        }
        if pull.collection_upserts + pull.collection_deletes > 0 {
            self.bus.publish(&ChangeEvent::CollectionsChanged {
                names: Vec::new(),
            });
        }
    }

    fn load_items(&self, ids: &[String]) -> Result<Vec<Item>, AppError> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let item = db::get_item(&self.conn, id)?
                .ok_or_else(|| AppError::NotFound(id.to_string()))?;
            items.push(item);
        }
        Ok(items)
    }
}

fn ensure_parent_dir(path: &str) -> Result<(), AppError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Store(StoreError),
    Config(ConfigError),
    Collection(CollectionError),
    Image(ImageError),
    Sync(SyncError),
    Item(ItemValidationError),
    InvalidArgument(String),
    NotFound(String),
    SyncDisabled,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Store(err) => write!(f, "{}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Collection(err) => write!(f, "{}", err),
            AppError::Image(err) => write!(f, "{}", err),
            AppError::Sync(err) => write!(f, "{}", err),
            AppError::Item(err) => write!(f, "{}", err),
            AppError::InvalidArgument(message) => write!(f, "{}", message),
            AppError::NotFound(id) => write!(f, "'{}' not found in local store", id),
            AppError::SyncDisabled => {
                write!(f, "sync is disabled; enable it in the [sync] config section")
            }
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Collection(err) => Some(err),
            AppError::Image(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::Item(err) => Some(err),
            AppError::InvalidArgument(_) => None,
            AppError::NotFound(_) => None,
            AppError::SyncDisabled => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::Store(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<CollectionError> for AppError {
    fn from(value: CollectionError) -> Self {
        AppError::Collection(value)
    }
}

impl From<ImageError> for AppError {
    fn from(value: ImageError) -> Self {
        AppError::Image(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        AppError::Sync(value)
    }
}

impl From<ItemValidationError> for AppError {
    fn from(value: ItemValidationError) -> Self {
        AppError::Item(value)
    }
}
