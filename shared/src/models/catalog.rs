//! Dealers and sellable vehicle variants

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dealership in the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dealer {
    pub id: Uuid,
    /// Short unique code (e.g., "HN01")
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A sellable configuration: model, trim and list price.
///
/// Only the price may change once stock or vehicles reference the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub model: String,
    pub trim: String,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Variant {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.model, self.trim)
    }
}
