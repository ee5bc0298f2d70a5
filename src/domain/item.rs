use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::money::{DualMoney, MoneyError};

pub const MIN_YEAR: i64 = 1000;
pub const MAX_YEAR: i64 = 9999;

/// A tracked collectible. `id` is stable across renames and moves;
/// `collection` is the denormalized name of the owning collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub set_name: Option<String>,
    pub year: Option<i64>,
    pub condition: Option<String>,
    pub grade: Option<String>,
    pub acquisition: Option<DualMoney>,
    pub value: Option<DualMoney>,
    pub collection: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Loosely-shaped item input as callers hand it over. Validated and
/// normalized exactly once, at the store boundary.
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub name: String,
    pub set_name: Option<String>,
    pub year: Option<i64>,
    pub condition: Option<String>,
    pub grade: Option<String>,
    pub acquisition: Option<DualMoney>,
    pub value: Option<DualMoney>,
}

/// Validated display attributes, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAttrs {
    pub name: String,
    pub set_name: Option<String>,
    pub year: Option<i64>,
    pub condition: Option<String>,
    pub grade: Option<String>,
    pub acquisition: Option<DualMoney>,
    pub value: Option<DualMoney>,
}

impl ItemDraft {
    pub fn validate(self) -> Result<ItemAttrs, ItemValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ItemValidationError::EmptyName);
        }
        if let Some(year) = self.year {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(ItemValidationError::YearOutOfRange(year));
            }
        }
        Ok(ItemAttrs {
            name,
            set_name: non_empty(self.set_name),
            year: self.year,
            condition: non_empty(self.condition),
            grade: non_empty(self.grade),
            acquisition: self.acquisition,
            value: self.value,
        })
    }
}

/// Field-level update. `Some("")` on an optional text field clears it.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub set_name: Option<String>,
    pub year: Option<i64>,
    pub condition: Option<String>,
    pub grade: Option<String>,
    pub acquisition: Option<DualMoney>,
    pub value: Option<DualMoney>,
}

impl ItemPatch {
    pub fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.set_name.is_some()
            || self.year.is_some()
            || self.condition.is_some()
            || self.grade.is_some()
            || self.acquisition.is_some()
            || self.value.is_some()
    }

    /// Applies the patch to `item`, returning whether anything changed.
    pub fn apply(self, item: &mut Item) -> Result<bool, ItemValidationError> {
        let mut changed = false;

        if let Some(raw) = self.name {
            let next = raw.trim().to_string();
            if next.is_empty() {
                return Err(ItemValidationError::EmptyName);
            }
            if next != item.name {
                item.name = next;
                changed = true;
            }
        }
        if let Some(raw) = self.set_name {
            let next = non_empty(Some(raw));
            if next != item.set_name {
                item.set_name = next;
                changed = true;
            }
        }
        if let Some(year) = self.year {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(ItemValidationError::YearOutOfRange(year));
            }
            if item.year != Some(year) {
                item.year = Some(year);
                changed = true;
            }
        }
        if let Some(raw) = self.condition {
            let next = non_empty(Some(raw));
            if next != item.condition {
                item.condition = next;
                changed = true;
            }
        }
        if let Some(raw) = self.grade {
            let next = non_empty(Some(raw));
            if next != item.grade {
                item.grade = next;
                changed = true;
            }
        }
        if let Some(next) = self.acquisition {
            if item.acquisition.as_ref() != Some(&next) {
                item.acquisition = Some(next);
                changed = true;
            }
        }
        if let Some(next) = self.value {
            if item.value.as_ref() != Some(&next) {
                item.value = Some(next);
                changed = true;
            }
        }

        Ok(changed)
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValidationError {
    EmptyName,
    YearOutOfRange(i64),
    Money(MoneyError),
}

impl fmt::Display for ItemValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemValidationError::EmptyName => write!(f, "item name cannot be empty"),
            ItemValidationError::YearOutOfRange(year) => {
                write!(
                    f,
                    "year {} out of range: expected {}..={}",
                    year, MIN_YEAR, MAX_YEAR
                )
            }
            ItemValidationError::Money(err) => write!(f, "{}", err),
        }
    }
}

impl Error for ItemValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ItemValidationError::Money(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MoneyError> for ItemValidationError {
    fn from(value: MoneyError) -> Self {
        ItemValidationError::Money(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Item, ItemDraft, ItemPatch, ItemValidationError};
    use crate::domain::money::{DualMoney, Money};

    fn sample_item() -> Item {
        Item {
            id: "I-1".to_string(),
            name: "Charizard".to_string(),
            set_name: Some("Base Set".to_string()),
            year: Some(1999),
            condition: Some("near mint".to_string()),
            grade: None,
            acquisition: None,
            value: None,
            collection: "Unsorted".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn draft_trims_and_drops_empty_fields() {
        let attrs = ItemDraft {
            name: "  Pikachu  ".to_string(),
            set_name: Some("   ".to_string()),
            condition: Some(" played ".to_string()),
            ..ItemDraft::default()
        }
        .validate()
        .expect("draft should validate");
        assert_eq!(attrs.name, "Pikachu");
        assert_eq!(attrs.set_name, None);
        assert_eq!(attrs.condition.as_deref(), Some("played"));
    }

    #[test]
    fn draft_rejects_empty_name_and_bad_year() {
        let err = ItemDraft::default().validate().unwrap_err();
        assert_eq!(err, ItemValidationError::EmptyName);

        let err = ItemDraft {
            name: "Pikachu".to_string(),
            year: Some(99),
            ..ItemDraft::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err, ItemValidationError::YearOutOfRange(99));
    }

    #[test]
    fn patch_reports_no_change_for_identical_values() {
        let mut item = sample_item();
        let changed = ItemPatch {
            name: Some("Charizard".to_string()),
            ..ItemPatch::default()
        }
        .apply(&mut item)
        .expect("patch should apply");
        assert!(!changed);
    }

    #[test]
    fn patch_clears_optional_text_with_empty_string() {
        let mut item = sample_item();
        let changed = ItemPatch {
            set_name: Some(String::new()),
            ..ItemPatch::default()
        }
        .apply(&mut item)
        .expect("patch should apply");
        assert!(changed);
        assert_eq!(item.set_name, None);
    }

    #[test]
    fn patch_updates_monetary_fields() {
        let mut item = sample_item();
        let dual = DualMoney::same(Money::new(12_00, "USD").unwrap());
        let changed = ItemPatch {
            value: Some(dual.clone()),
            ..ItemPatch::default()
        }
        .apply(&mut item)
        .expect("patch should apply");
        assert!(changed);
        assert_eq!(item.value, Some(dual));
    }

    #[test]
    fn patch_rejects_empty_rename() {
        let mut item = sample_item();
        let err = ItemPatch {
            name: Some("  ".to_string()),
            ..ItemPatch::default()
        }
        .apply(&mut item)
        .unwrap_err();
        assert_eq!(err, ItemValidationError::EmptyName);
    }
}
