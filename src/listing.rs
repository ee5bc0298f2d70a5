use crate::collections::ALL_ITEMS;
use crate::domain::item::Item;

/// Filter for listing items. `collection: None` (or the reserved virtual
/// name) means the computed union of every collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemListFilter {
    pub collection: Option<String>,
    pub query: Option<String>,
    pub set_name: Option<String>,
    pub year: Option<i64>,
}

pub fn apply_filters(items: Vec<Item>, filter: &ItemListFilter) -> Vec<Item> {
    let normalized = NormalizedFilter::from(filter);
    if normalized.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| matches_filter(item, &normalized))
        .collect()
}

#[derive(Debug, Clone, Default)]
struct NormalizedFilter {
    collection: Option<String>,
    query: Option<String>,
    set_name: Option<String>,
    year: Option<i64>,
}

impl NormalizedFilter {
    fn is_empty(&self) -> bool {
        self.collection.is_none()
            && self.query.is_none()
            && self.set_name.is_none()
            && self.year.is_none()
    }
}

impl From<&ItemListFilter> for NormalizedFilter {
    fn from(value: &ItemListFilter) -> Self {
        let collection = normalize_scalar(value.collection.as_deref())
            .filter(|name| name != &ALL_ITEMS.to_ascii_lowercase());
        Self {
            collection,
            query: normalize_scalar(value.query.as_deref()),
            set_name: normalize_scalar(value.set_name.as_deref()),
            year: value.year,
        }
    }
}

fn normalize_scalar(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}

fn matches_filter(item: &Item, filter: &NormalizedFilter) -> bool {
    if let Some(collection) = filter.collection.as_deref() {
        if item.collection.to_ascii_lowercase() != collection {
            return false;
        }
    }
    if let Some(set_name) = filter.set_name.as_deref() {
        let actual = item.set_name.as_deref().unwrap_or("").to_ascii_lowercase();
        if actual != set_name {
            return false;
        }
    }
    if let Some(year) = filter.year {
        if item.year != Some(year) {
            return false;
        }
    }
    if let Some(query) = filter.query.as_deref() {
        return matches_query(item, query);
    }
    true
}

fn matches_query(item: &Item, query: &str) -> bool {
    let haystacks = [
        Some(item.name.as_str()),
        item.set_name.as_deref(),
        item.condition.as_deref(),
        item.grade.as_deref(),
    ];
    haystacks
        .into_iter()
        .flatten()
        .any(|value| value.to_ascii_lowercase().contains(query))
}

pub fn print_item_list(items: &[Item]) {
    if items.is_empty() {
        println!("no items matched");
        return;
    }
    for item in items {
        let mut line = format!("{} [{}] {}", item.id, item.collection, item.name);
        if let Some(set_name) = item.set_name.as_deref() {
            line.push_str(&format!(" ({set_name})"));
        }
        if let Some(value) = &item.value {
            line.push_str(&format!(" ({})", value.display));
        }
        println!("{line}");
    }
    println!("{} item(s)", items.len());
}
