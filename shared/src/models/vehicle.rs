//! Per-VIN vehicle status tracking

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{unknown_value, StockKey};

/// A single physical vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub vin: String,
    pub variant_id: Uuid,
    pub color: String,
    /// Dealer holding the vehicle, once assigned
    pub dealer_id: Option<Uuid>,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn key(&self) -> StockKey {
        StockKey {
            variant_id: self.variant_id,
            color: self.color.clone(),
        }
    }

    /// Status after `action`. A vehicle held by an active order cannot go on a test drive.
    pub fn next_status(&self, action: VehicleAction, on_active_order: bool) -> WorkflowResult<VehicleStatus> {
        let next = self.status.apply(action)?;
        if action == VehicleAction::SetTestDrive && on_active_order {
            return Err(WorkflowError::validation(
                "vehicle_id",
                format!("Vehicle {} is held by an active order", self.vin),
            ));
        }
        Ok(next)
    }
}

/// Where a vehicle is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    InManufacturerStock,
    InDealerStock,
    TestDrive,
    Shipping,
    Sold,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 5] = [
        VehicleStatus::InManufacturerStock,
        VehicleStatus::InDealerStock,
        VehicleStatus::TestDrive,
        VehicleStatus::Shipping,
        VehicleStatus::Sold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::InManufacturerStock => "IN_MANUFACTURER_STOCK",
            VehicleStatus::InDealerStock => "IN_DEALER_STOCK",
            VehicleStatus::TestDrive => "TEST_DRIVE",
            VehicleStatus::Shipping => "SHIPPING",
            VehicleStatus::Sold => "SOLD",
        }
    }

    /// Guarded single-vehicle transition
    pub fn apply(self, action: VehicleAction) -> WorkflowResult<VehicleStatus> {
        use VehicleAction as A;
        use VehicleStatus as S;

        match (self, action) {
            (S::InManufacturerStock, A::AssignToDealer) => Ok(S::InDealerStock),
            (S::InDealerStock, A::SetTestDrive) => Ok(S::TestDrive),
            (S::TestDrive, A::ClearTestDrive) => Ok(S::InDealerStock),
            (S::InDealerStock, A::Ship) => Ok(S::Shipping),
            (S::Shipping, A::ReturnToStock) => Ok(S::InDealerStock),
            (S::InDealerStock | S::Shipping, A::MarkSold) => Ok(S::Sold),
            (from, action) => Err(WorkflowError::invalid_transition("vehicle", from, action)),
        }
    }

    /// Available to be put on a new sale order
    pub fn is_sellable(&self) -> bool {
        matches!(self, VehicleStatus::InDealerStock)
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VehicleStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| unknown_value("status", s))
    }
}

/// Single-vehicle status changes.
///
/// `Ship`, `ReturnToStock` and `MarkSold` are driven only by the order
/// delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleAction {
    AssignToDealer,
    SetTestDrive,
    ClearTestDrive,
    Ship,
    ReturnToStock,
    MarkSold,
}

impl VehicleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleAction::AssignToDealer => "assign_to_dealer",
            VehicleAction::SetTestDrive => "set_test_drive",
            VehicleAction::ClearTestDrive => "clear_test_drive",
            VehicleAction::Ship => "ship",
            VehicleAction::ReturnToStock => "return_to_stock",
            VehicleAction::MarkSold => "mark_sold",
        }
    }
}

impl std::fmt::Display for VehicleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_round_trip() {
        let status = VehicleStatus::InDealerStock
            .apply(VehicleAction::SetTestDrive)
            .unwrap();
        assert_eq!(status, VehicleStatus::TestDrive);
        assert_eq!(
            status.apply(VehicleAction::ClearTestDrive).unwrap(),
            VehicleStatus::InDealerStock
        );
    }

    #[test]
    fn test_drive_only_from_dealer_stock() {
        for status in [
            VehicleStatus::InManufacturerStock,
            VehicleStatus::TestDrive,
            VehicleStatus::Shipping,
            VehicleStatus::Sold,
        ] {
            assert!(status.apply(VehicleAction::SetTestDrive).is_err());
        }
        assert!(VehicleStatus::InDealerStock
            .apply(VehicleAction::ClearTestDrive)
            .is_err());
    }

    #[test]
    fn ordered_vehicles_cannot_go_on_test_drive() {
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            vin: "5YJ3E1EA7KF317000".to_string(),
            variant_id: Uuid::new_v4(),
            color: "Red".to_string(),
            dealer_id: Some(Uuid::new_v4()),
            status: VehicleStatus::InDealerStock,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(matches!(
            vehicle.next_status(VehicleAction::SetTestDrive, true),
            Err(WorkflowError::Validation { .. })
        ));
        assert_eq!(
            vehicle.next_status(VehicleAction::SetTestDrive, false),
            Ok(VehicleStatus::TestDrive)
        );
        assert_eq!(
            vehicle.next_status(VehicleAction::MarkSold, true),
            Ok(VehicleStatus::Sold)
        );
    }

    #[test]
    fn mark_sold_from_dealer_stock_or_shipping_only() {
        assert_eq!(
            VehicleStatus::InDealerStock.apply(VehicleAction::MarkSold),
            Ok(VehicleStatus::Sold)
        );
        assert_eq!(
            VehicleStatus::Shipping.apply(VehicleAction::MarkSold),
            Ok(VehicleStatus::Sold)
        );
        assert!(VehicleStatus::TestDrive.apply(VehicleAction::MarkSold).is_err());
        assert!(VehicleStatus::Sold.apply(VehicleAction::MarkSold).is_err());
        assert!(VehicleStatus::InManufacturerStock
            .apply(VehicleAction::MarkSold)
            .is_err());
    }

    #[test]
    fn sold_is_final() {
        for action in [
            VehicleAction::AssignToDealer,
            VehicleAction::SetTestDrive,
            VehicleAction::ClearTestDrive,
            VehicleAction::Ship,
            VehicleAction::ReturnToStock,
            VehicleAction::MarkSold,
        ] {
            assert!(VehicleStatus::Sold.apply(action).is_err());
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in VehicleStatus::ALL {
            assert_eq!(status.as_str().parse::<VehicleStatus>(), Ok(status));
        }
        assert!("RESERVED".parse::<VehicleStatus>().is_err());
    }
}
