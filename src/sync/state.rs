use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Collection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Item, EntityKind::Collection];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Collection => "collection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEntityKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "item" => Ok(EntityKind::Item),
            "collection" => Ok(EntityKind::Collection),
            _ => Err(ParseEntityKindError {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityKindError {
    value: String,
}

impl fmt::Display for ParseEntityKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid entity kind '{}': expected one of {}",
            self.value,
            EntityKind::ALL
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl Error for ParseEntityKindError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn item(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Item,
            id: id.into(),
        }
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Collection,
            id: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Per-identifier shadow-write lifecycle. `Clean` is both the initial
/// and the terminal steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Clean,
    Dirty,
    Syncing,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Clean => "clean",
            SyncPhase::Dirty => "dirty",
            SyncPhase::Syncing => "syncing",
        }
    }

    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (SyncPhase::Clean, SyncPhase::Dirty)
                | (SyncPhase::Dirty, SyncPhase::Syncing)
                | (SyncPhase::Syncing, SyncPhase::Clean)
                | (SyncPhase::Syncing, SyncPhase::Dirty)
        )
    }

    pub fn validate_transition(self, next: SyncPhase) -> Result<(), InvalidPhaseTransition> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(InvalidPhaseTransition {
            from: self,
            to: next,
        })
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPhaseTransition {
    pub from: SyncPhase,
    pub to: SyncPhase,
}

impl fmt::Display for InvalidPhaseTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sync phase transition: {} -> {}", self.from, self.to)
    }
}

impl Error for InvalidPhaseTransition {}

/// In-memory phase map for one coordinator. A mutation landing while an
/// identifier is `Syncing` lets the in-flight write finish and re-marks
/// the identifier `Dirty` right after, so the freshest state is always
/// pushed eventually.
#[derive(Debug, Default)]
pub struct StateTracker {
    phases: HashMap<EntityKey, SyncPhase>,
    redirtied: HashSet<EntityKey>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, key: &EntityKey) -> SyncPhase {
        self.phases.get(key).copied().unwrap_or(SyncPhase::Clean)
    }

    pub fn mark_dirty(&mut self, key: &EntityKey) {
        match self.phase(key) {
            SyncPhase::Syncing => {
                self.redirtied.insert(key.clone());
            }
            _ => {
                self.phases.insert(key.clone(), SyncPhase::Dirty);
            }
        }
    }

    /// Claims the identifier for an in-flight shadow write. Fails when a
    /// write for the same identifier is already in flight.
    pub fn begin_sync(&mut self, key: &EntityKey) -> Result<(), InvalidPhaseTransition> {
        let current = self.phase(key);
        if current == SyncPhase::Syncing {
            return Err(InvalidPhaseTransition {
                from: current,
                to: SyncPhase::Syncing,
            });
        }
        self.phases.insert(key.clone(), SyncPhase::Syncing);
        Ok(())
    }

    /// Settles an in-flight write. A failed push, or a mutation that
    /// arrived mid-flight, lands back on `Dirty`.
    pub fn finish_sync(&mut self, key: &EntityKey, pushed: bool) -> SyncPhase {
        let redirtied = self.redirtied.remove(key);
        let next = if !pushed || redirtied {
            SyncPhase::Dirty
        } else {
            SyncPhase::Clean
        };
        match next {
            SyncPhase::Clean => {
                self.phases.remove(key);
            }
            _ => {
                self.phases.insert(key.clone(), next);
            }
        }
        next
    }

    pub fn dirty_count(&self) -> usize {
        self.phases
            .values()
            .filter(|phase| **phase == SyncPhase::Dirty)
            .count()
    }
}
