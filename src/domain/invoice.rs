use serde::{Deserialize, Serialize};

use super::item::Item;

/// One invoice line, denormalized from the item at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceLine {
    pub item_id: String,
    pub name: String,
    pub set_name: Option<String>,
    pub acquisition: Option<super::money::DualMoney>,
}

/// A frozen snapshot of acquisition data. Invoices are never live-merged
/// by sync and never follow later item edits; an explicit edit
/// re-snapshots the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub id: String,
    pub seller: String,
    pub invoice_date: String,
    pub lines: Vec<InvoiceLine>,
    pub created_at: String,
    pub updated_at: String,
}

impl InvoiceRecord {
    pub fn snapshot(
        id: impl Into<String>,
        seller: impl Into<String>,
        invoice_date: impl Into<String>,
        items: &[Item],
        now: &str,
    ) -> Self {
        Self {
            id: id.into(),
            seller: seller.into(),
            invoice_date: invoice_date.into(),
            lines: items.iter().map(snapshot_line).collect(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    pub fn resnapshot(&mut self, seller: &str, invoice_date: &str, items: &[Item], now: &str) {
        self.seller = seller.to_string();
        self.invoice_date = invoice_date.to_string();
        self.lines = items.iter().map(snapshot_line).collect();
        self.updated_at = now.to_string();
    }
}

fn snapshot_line(item: &Item) -> InvoiceLine {
    InvoiceLine {
        item_id: item.id.clone(),
        name: item.name.clone(),
        set_name: item.set_name.clone(),
        acquisition: item.acquisition.clone(),
    }
}
