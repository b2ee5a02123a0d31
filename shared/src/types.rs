//! Common types used across the platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};

/// Where a quantity of stock is held.
///
/// A dealer location always carries its dealer id and the manufacturer
/// location never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "location_kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockLocation {
    Manufacturer,
    Dealer { dealer_id: Uuid },
}

impl StockLocation {
    pub fn dealer(dealer_id: Uuid) -> Self {
        StockLocation::Dealer { dealer_id }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StockLocation::Manufacturer => "MANUFACTURER",
            StockLocation::Dealer { .. } => "DEALER",
        }
    }

    pub fn dealer_id(&self) -> Option<Uuid> {
        match self {
            StockLocation::Manufacturer => None,
            StockLocation::Dealer { dealer_id } => Some(*dealer_id),
        }
    }

    /// Build a location from the loose `(kind, dealer_id)` pair used by query strings
    pub fn from_parts(kind: &str, dealer_id: Option<Uuid>) -> WorkflowResult<Self> {
        match (kind.trim().to_ascii_uppercase().as_str(), dealer_id) {
            ("MANUFACTURER", None) => Ok(StockLocation::Manufacturer),
            ("MANUFACTURER", Some(_)) => Err(WorkflowError::validation(
                "dealer_id",
                "Manufacturer stock has no dealer",
            )),
            ("DEALER", Some(dealer_id)) => Ok(StockLocation::Dealer { dealer_id }),
            ("DEALER", None) => Err(WorkflowError::validation(
                "dealer_id",
                "Dealer stock requires a dealer id",
            )),
            (other, _) => Err(unknown_value("location_kind", other)),
        }
    }
}

impl std::fmt::Display for StockLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockLocation::Manufacturer => write!(f, "manufacturer"),
            StockLocation::Dealer { dealer_id } => write!(f, "dealer {}", dealer_id),
        }
    }
}

/// Identifies a stocked configuration: a variant in one color
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub variant_id: Uuid,
    pub color: String,
}

impl StockKey {
    /// Create a key, trimming the color and rejecting blank ones
    pub fn new(variant_id: Uuid, color: &str) -> WorkflowResult<Self> {
        let color = color.trim();
        if color.is_empty() {
            return Err(WorkflowError::validation("color", "Color is required"));
        }
        Ok(Self {
            variant_id,
            color: color.to_string(),
        })
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.variant_id, self.color)
    }
}

/// Error for a string that names no member of a closed enum
pub fn unknown_value(field: &str, value: &str) -> WorkflowError {
    WorkflowError::validation(field, format!("Unrecognized value '{}'", value))
}

/// Sum money amounts; overflow is a validation error on `field`
pub fn sum_amounts(field: &str, amounts: impl IntoIterator<Item = Decimal>) -> WorkflowResult<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| WorkflowError::validation(field, "Amount is too large"))
    })
}
