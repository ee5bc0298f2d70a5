use std::error::Error;
use std::fmt;

use rusqlite::Connection;

use crate::db::{self, StoreError, KIND_COLLECTION, KIND_ITEM};
use crate::events::{ChangeBus, ChangeEvent};
use crate::ident::now_utc_rfc3339;

/// Virtual union of every collection. Computed, never persisted, and
/// rejected as a creation or rename target.
pub const ALL_ITEMS: &str = "All Items";

pub fn is_reserved(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(ALL_ITEMS)
}

/// What to do with the member items of a deleted collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberDisposition {
    MoveTo(String),
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub item_id: String,
    pub from: Option<String>,
    pub to: String,
    pub created_destination: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub name: String,
    pub destination: Option<String>,
    pub moved: Vec<String>,
    pub discarded: Vec<String>,
}

/// Atomic, all-or-nothing operations over named collections. Every
/// multi-row mutation runs in a single store transaction.
pub struct CollectionService<'a> {
    conn: &'a mut Connection,
    bus: &'a ChangeBus,
}

impl<'a> CollectionService<'a> {
    pub fn new(conn: &'a mut Connection, bus: &'a ChangeBus) -> Self {
        Self { conn, bus }
    }

    pub fn create(&mut self, name: &str) -> Result<String, CollectionError> {
        let name = validated_name(name)?;
        if db::collection_exists(self.conn, &name)? {
            return Err(CollectionError::AlreadyExists(name));
        }

        let now = now_utc_rfc3339();
        let tx = self.conn.transaction()?;
        db::create_collection(&tx, &name, &now)?;
        db::mark_dirty(&tx, KIND_COLLECTION, &name, &now)?;
        tx.commit()?;

        self.bus.publish(&ChangeEvent::CollectionsChanged {
            names: vec![name.clone()],
        });
        Ok(name)
    }

    /// Metadata-only rename: member item identifiers are untouched, only
    /// the collection key changes, atomically across every table that
    /// carries it.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<String, CollectionError> {
        let old = old.trim().to_string();
        if is_reserved(&old) {
            return Err(CollectionError::ReservedName(old));
        }
        if !db::collection_exists(self.conn, &old)? {
            return Err(CollectionError::NotFound(old));
        }
        let new = validated_name(new)?;
        if db::collection_exists(self.conn, &new)? {
            return Err(CollectionError::AlreadyExists(new));
        }

        let members = db::member_ids(self.conn, &old)?;
        let now = now_utc_rfc3339();
        let tx = self.conn.transaction()?;
        db::rename_collection_rows(&tx, &old, &new, &now)?;
        // the old key disappears from the mirror as a tombstone
        db::mark_dirty(&tx, KIND_COLLECTION, &old, &now)?;
        db::mark_dirty(&tx, KIND_COLLECTION, &new, &now)?;
        for item_id in &members {
            db::mark_dirty(&tx, KIND_ITEM, item_id, &now)?;
        }
        tx.commit()?;

        self.bus.publish(&ChangeEvent::CollectionsChanged {
            names: vec![old, new.clone()],
        });
        if !members.is_empty() {
            self.bus
                .publish(&ChangeEvent::ItemsChanged { ids: members });
        }
        Ok(new)
    }

    pub fn delete(
        &mut self,
        name: &str,
        disposition: MemberDisposition,
    ) -> Result<DeleteOutcome, CollectionError> {
        let name = name.trim().to_string();
        if is_reserved(&name) {
            return Err(CollectionError::ReservedName(name));
        }
        if !db::collection_exists(self.conn, &name)? {
            return Err(CollectionError::NotFound(name));
        }
        if db::count_collections(self.conn)? <= 1 {
            return Err(CollectionError::LastCollection(name));
        }

        let members = db::member_ids(self.conn, &name)?;
        let destination = match &disposition {
            MemberDisposition::MoveTo(target) => {
                let target = validated_name(target)?;
                if target == name {
                    return Err(CollectionError::AlreadyExists(target));
                }
                Some(target)
            }
            MemberDisposition::Discard => None,
        };

        if destination.is_none() && !members.is_empty() {
            // detail views must drop their handles before the rows go away
            self.bus.publish(&ChangeEvent::ImagesInvalidated {
                item_ids: members.clone(),
            });
        }

        let now = now_utc_rfc3339();
        let tx = self.conn.transaction()?;
        match &destination {
            Some(target) => {
                db::ensure_collection(&tx, target, &now)?;
                db::touch_collection(&tx, target, &now)?;
                for item_id in &members {
                    db::set_membership(&tx, item_id, target)?;
                    if let Some(mut item) = db::get_item(&tx, item_id)? {
                        item.collection = target.clone();
                        item.updated_at = now.clone();
                        db::upsert_item(&tx, &item)?;
                    }
                    db::mark_dirty(&tx, KIND_ITEM, item_id, &now)?;
                }
                db::mark_dirty(&tx, KIND_COLLECTION, target, &now)?;
            }
            None => {
                for item_id in &members {
                    db::delete_image(&tx, item_id)?;
                    db::remove_membership(&tx, item_id)?;
                    db::delete_item(&tx, item_id)?;
                    db::mark_dirty(&tx, KIND_ITEM, item_id, &now)?;
                }
            }
        }
        db::delete_collection_row(&tx, &name)?;
        db::mark_dirty(&tx, KIND_COLLECTION, &name, &now)?;
        tx.commit()?;

        let mut changed = vec![name.clone()];
        if let Some(target) = &destination {
            changed.push(target.clone());
        }
        self.bus
            .publish(&ChangeEvent::CollectionsChanged { names: changed });
        if !members.is_empty() {
            self.bus.publish(&ChangeEvent::ItemsChanged {
                ids: members.clone(),
            });
        }

        let (moved, discarded) = match &destination {
            Some(_) => (members, Vec::new()),
            None => (Vec::new(), members),
        };
        Ok(DeleteOutcome {
            name,
            destination,
            moved,
            discarded,
        })
    }

    /// Moves one item between collections. The caller's `declared_from`
    /// may be stale; membership is then located by scanning, so the item
    /// is re-homed instead of dropped. A missing destination is created
    /// inside the same transaction.
    pub fn move_item(
        &mut self,
        item_id: &str,
        declared_from: Option<&str>,
        to: &str,
    ) -> Result<MoveOutcome, CollectionError> {
        let to = validated_name(to)?;
        let Some(mut item) = db::get_item(self.conn, item_id)? else {
            return Err(CollectionError::ItemNotFound(item_id.to_string()));
        };

        let actual_from = match declared_from.map(str::trim) {
            Some(declared) => {
                if db::is_member(self.conn, declared, item_id)? {
                    Some(declared.to_string())
                } else {
                    // stale caller state: find the item wherever it actually lives
                    db::membership_of(self.conn, item_id)?
                }
            }
            None => db::membership_of(self.conn, item_id)?,
        };

        if actual_from.as_deref() == Some(to.as_str()) {
            return Ok(MoveOutcome {
                item_id: item_id.to_string(),
                from: actual_from,
                to,
                created_destination: false,
            });
        }

        let now = now_utc_rfc3339();
        let tx = self.conn.transaction()?;
        let created_destination = db::ensure_collection(&tx, &to, &now)?;
        db::touch_collection(&tx, &to, &now)?;
        if let Some(from) = &actual_from {
            db::touch_collection(&tx, from, &now)?;
        }
        db::set_membership(&tx, item_id, &to)?;
        item.collection = to.clone();
        item.updated_at = now.clone();
        db::upsert_item(&tx, &item)?;
        db::mark_dirty(&tx, KIND_ITEM, item_id, &now)?;
        db::mark_dirty(&tx, KIND_COLLECTION, &to, &now)?;
        if let Some(from) = &actual_from {
            db::mark_dirty(&tx, KIND_COLLECTION, from, &now)?;
        }
        tx.commit()?;

        let mut changed: Vec<String> = actual_from.iter().cloned().collect();
        changed.push(to.clone());
        self.bus
            .publish(&ChangeEvent::CollectionsChanged { names: changed });
        self.bus.publish(&ChangeEvent::ItemsChanged {
            ids: vec![item_id.to_string()],
        });

        Ok(MoveOutcome {
            item_id: item_id.to_string(),
            from: actual_from,
            to,
            created_destination,
        })
    }
}

fn validated_name(raw: &str) -> Result<String, CollectionError> {
    let name = raw.trim().to_string();
    if name.is_empty() {
        return Err(CollectionError::EmptyName);
    }
    if is_reserved(&name) {
        return Err(CollectionError::ReservedName(name));
    }
    Ok(name)
}

#[derive(Debug)]
pub enum CollectionError {
    Store(StoreError),
    EmptyName,
    ReservedName(String),
    AlreadyExists(String),
    NotFound(String),
    LastCollection(String),
    ItemNotFound(String),
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Store(err) => write!(f, "{}", err),
            CollectionError::EmptyName => {
                write!(f, "invalid collection operation: name cannot be empty")
            }
            CollectionError::ReservedName(name) => {
                write!(
                    f,
                    "invalid collection operation: '{}' is a reserved virtual collection",
                    name
                )
            }
            CollectionError::AlreadyExists(name) => {
                write!(
                    f,
                    "invalid collection operation: collection '{}' already exists",
                    name
                )
            }
            CollectionError::NotFound(name) => {
                write!(f, "collection '{}' not found", name)
            }
            CollectionError::LastCollection(name) => {
                write!(
                    f,
                    "invalid collection operation: '{}' is the last collection and cannot be deleted",
                    name
                )
            }
            CollectionError::ItemNotFound(id) => write!(f, "item '{}' not found", id),
        }
    }
}

impl Error for CollectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectionError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for CollectionError {
    fn from(value: StoreError) -> Self {
        CollectionError::Store(value)
    }
}

impl From<rusqlite::Error> for CollectionError {
    fn from(value: rusqlite::Error) -> Self {
        CollectionError::Store(StoreError::Db(value))
    }
}

#[cfg(test)]
mod tests;
