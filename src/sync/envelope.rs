use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::{new_envelope_id, now_utc_rfc3339};

use super::state::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeOp {
    Upsert,
    Delete,
}

/// Wraps one mutation with the timestamp and origin tag the coordinator
/// uses for shadow-write ordering and last-write-wins decisions. Never
/// persisted, never exposed to callers outside the sync module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEnvelope {
    pub envelope_id: String,
    pub occurred_at: String,
    pub origin: String,
    pub kind: EntityKind,
    pub entity_id: String,
    pub op: EnvelopeOp,
    pub payload: Value,
}

impl SyncEnvelope {
    pub fn upsert(
        origin: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::upsert_at(origin, kind, entity_id, now_utc_rfc3339(), payload)
    }

    /// Carries the mutation's own timestamp so a delayed shadow write
    /// still loses against edits that happened after it.
    pub fn upsert_at(
        origin: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
        occurred_at: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            envelope_id: new_envelope_id(),
            occurred_at: occurred_at.into(),
            origin: origin.into(),
            kind,
            entity_id: entity_id.into(),
            op: EnvelopeOp::Upsert,
            payload,
        }
    }

    pub fn delete(
        origin: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            envelope_id: new_envelope_id(),
            occurred_at: now_utc_rfc3339(),
            origin: origin.into(),
            kind,
            entity_id: entity_id.into(),
            op: EnvelopeOp::Delete,
            payload: Value::Null,
        }
    }

    /// Mutation timestamps double as the document's conflict timestamp:
    /// resolution is last-write-wins by wall clock attached at write time.
    pub fn into_document(self) -> MirrorDocument {
        MirrorDocument {
            id: self.entity_id,
            kind: self.kind,
            origin: self.origin,
            last_modified: self.occurred_at,
            deleted: self.op == EnvelopeOp::Delete,
            payload: self.payload,
        }
    }
}

/// Flat mirror document, keyed by entity identifier so repeated pushes of
/// the same envelope upsert instead of append. Deletions travel as
/// tombstones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorDocument {
    pub id: String,
    pub kind: EntityKind,
    pub origin: String,
    pub last_modified: String,
    #[serde(default)]
    pub deleted: bool,
    pub payload: Value,
}
