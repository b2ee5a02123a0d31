//! Staff identity and the two sides of the distribution network

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowResult;
use crate::types::unknown_value;

/// Which side of the network a staff member works for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    ManufacturerStaff,
    DealerStaff { dealer_id: Uuid },
}

/// The party entitled to perform an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Party {
    Manufacturer,
    /// Staff of the dealer that owns the record
    OwningDealer,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Party::Manufacturer => write!(f, "manufacturer staff"),
            Party::OwningDealer => write!(f, "staff of the owning dealer"),
        }
    }
}

/// A staff member performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub role: StaffRole,
}

impl Actor {
    pub fn manufacturer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: StaffRole::ManufacturerStaff,
        }
    }

    pub fn dealer(user_id: Uuid, dealer_id: Uuid) -> Self {
        Self {
            user_id,
            role: StaffRole::DealerStaff { dealer_id },
        }
    }

    /// Build an actor from the role name and optional dealer id asserted by the gateway
    pub fn from_parts(user_id: Uuid, role: &str, dealer_id: Option<Uuid>) -> WorkflowResult<Self> {
        match (role.trim().to_ascii_uppercase().as_str(), dealer_id) {
            ("MANUFACTURER_STAFF", _) => Ok(Self::manufacturer(user_id)),
            ("DEALER_STAFF", Some(dealer_id)) => Ok(Self::dealer(user_id, dealer_id)),
            ("DEALER_STAFF", None) => Err(crate::error::WorkflowError::validation(
                "dealer_id",
                "Dealer staff must name their dealer",
            )),
            (other, _) => Err(unknown_value("role", other)),
        }
    }

    pub fn is_manufacturer(&self) -> bool {
        matches!(self.role, StaffRole::ManufacturerStaff)
    }

    pub fn dealer_id(&self) -> Option<Uuid> {
        match self.role {
            StaffRole::ManufacturerStaff => None,
            StaffRole::DealerStaff { dealer_id } => Some(dealer_id),
        }
    }

    /// Whether the actor is the given party for a record owned by `owner`
    pub fn is_party(&self, party: Party, owner: Uuid) -> bool {
        match party {
            Party::Manufacturer => self.is_manufacturer(),
            Party::OwningDealer => self.dealer_id() == Some(owner),
        }
    }

    /// Manufacturer staff see every dealer's records, dealer staff only their own
    pub fn can_view(&self, owner: Uuid) -> bool {
        self.is_manufacturer() || self.dealer_id() == Some(owner)
    }
}
