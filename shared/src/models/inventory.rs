//! Aggregate stock records and movements between locations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{StockKey, StockLocation};

/// Quantity at or below which a record is reported as low stock
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

/// Quantity of one variant/color held at one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    #[serde(flatten)]
    pub location: StockLocation,
    pub variant_id: Uuid,
    pub color: String,
    pub quantity: i64,
}

impl InventoryRecord {
    pub fn new(location: StockLocation, key: StockKey, quantity: i64) -> Self {
        Self {
            location,
            variant_id: key.variant_id,
            color: key.color,
            quantity,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            variant_id: self.variant_id,
            color: self.color.clone(),
        }
    }

    /// Low stock is a derived read, never a stored flag
    pub fn is_low_stock(&self, threshold: i64) -> bool {
        is_low_stock(self.quantity, threshold)
    }
}

pub fn is_low_stock(quantity: i64, threshold: i64) -> bool {
    quantity <= threshold
}

/// A quantity moving from one location to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub from: StockLocation,
    pub to: StockLocation,
    pub key: StockKey,
    pub quantity: i64,
}

impl StockMovement {
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            key: self.key.clone(),
            quantity: self.quantity,
        }
    }
}

/// Inventory record annotated for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    #[serde(flatten)]
    pub record: InventoryRecord,
    pub low_stock: bool,
}

impl StockLevel {
    pub fn from_record(record: InventoryRecord, threshold: i64) -> Self {
        let low_stock = record.is_low_stock(threshold);
        Self { record, low_stock }
    }
}
