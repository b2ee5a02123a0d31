//! Customer sale orders and the delivery pipeline

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::vehicle::{Vehicle, VehicleAction, VehicleStatus};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{sum_amounts, unknown_value, StockKey};

/// Status of a sale order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Partial,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Partial,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Forward-only transitions, plus cancellation before shipping
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus as S;

        matches!(
            (self, target),
            (S::Pending, S::Paid)
                | (S::Pending, S::Partial)
                | (S::Partial, S::Partial)
                | (S::Partial, S::Paid)
                | (S::Paid | S::Partial, S::Shipped)
                | (S::Shipped, S::Completed)
                | (S::Pending | S::Paid | S::Partial, S::Cancelled)
        )
    }

    pub fn accepts_payments(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Partial)
    }

    /// Active orders hold a claim on their vehicles
    pub fn is_active(self) -> bool {
        !matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| unknown_value("status", s))
    }
}

/// One vehicle sold on an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub vehicle_id: Uuid,
    pub variant_id: Uuid,
    pub color: String,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn for_vehicle(vehicle: &Vehicle, unit_price: Decimal) -> Self {
        Self {
            vehicle_id: vehicle.id,
            variant_id: vehicle.variant_id,
            color: vehicle.color.clone(),
            unit_price,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            variant_id: self.variant_id,
            color: self.color.clone(),
        }
    }
}

/// Check that a vehicle may go on a new order raised by `dealer_id`
pub fn ensure_orderable(vehicle: &Vehicle, dealer_id: Uuid, on_active_order: bool) -> WorkflowResult<()> {
    if vehicle.dealer_id != Some(dealer_id) {
        return Err(WorkflowError::validation(
            "vehicle_id",
            format!("Vehicle {} is not held by this dealer", vehicle.vin),
        ));
    }
    if !vehicle.status.is_sellable() {
        return Err(WorkflowError::validation(
            "vehicle_id",
            format!("Vehicle {} is {}, not in dealer stock", vehicle.vin, vehicle.status),
        ));
    }
    if on_active_order {
        return Err(WorkflowError::validation(
            "vehicle_id",
            format!("Vehicle {} is already on an active order", vehicle.vin),
        ));
    }
    Ok(())
}

/// A sale order raised by a dealer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub dealer_id: Uuid,
    /// Absent for internal orders, which never take customer payments
    pub customer_id: Option<Uuid>,
    pub lines: Vec<OrderLine>,
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    pub status: OrderStatus,
    pub cancellation_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when raising an order
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub dealer_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub lines: Vec<OrderLine>,
    pub created_by: Uuid,
}

impl Order {
    pub fn create(draft: OrderDraft, now: DateTime<Utc>) -> WorkflowResult<Self> {
        if draft.lines.is_empty() {
            return Err(WorkflowError::validation(
                "lines",
                "An order needs at least one vehicle",
            ));
        }

        let mut seen = HashSet::new();
        for line in &draft.lines {
            if line.unit_price <= Decimal::ZERO {
                return Err(WorkflowError::validation(
                    "unit_price",
                    "Unit price must be positive",
                ));
            }
            if !seen.insert(line.vehicle_id) {
                return Err(WorkflowError::validation(
                    "lines",
                    format!("Vehicle {} appears more than once", line.vehicle_id),
                ));
            }
        }

        let total_price = sum_amounts("lines", draft.lines.iter().map(|l| l.unit_price))?;

        Ok(Self {
            id: Uuid::new_v4(),
            dealer_id: draft.dealer_id,
            customer_id: draft.customer_id,
            lines: draft.lines,
            total_price,
            paid_amount: Decimal::ZERO,
            status: OrderStatus::Pending,
            cancellation_reason: None,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_customer_order(&self) -> bool {
        self.customer_id.is_some()
    }

    pub fn outstanding(&self) -> Decimal {
        (self.total_price - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn vehicle_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.vehicle_id).collect()
    }

    /// Plan a delivery-pipeline change without applying it
    pub fn plan(&self, change: &OrderChange) -> WorkflowResult<OrderPlan> {
        let target = change.target();
        if !self.status.can_transition_to(target) {
            return Err(WorkflowError::invalid_transition(
                "order",
                self.status,
                change.name(),
            ));
        }

        let cancellation_reason = match change {
            OrderChange::Cancel { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(WorkflowError::validation(
                        "reason",
                        "A cancellation reason is required",
                    ));
                }
                Some(reason.to_string())
            }
            _ => None,
        };

        Ok(OrderPlan {
            status: target,
            consumes_dealer_stock: matches!(change, OrderChange::CompleteDelivery),
            cancellation_reason,
        })
    }
}

/// Changes that carry side effects on vehicles or stock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum OrderChange {
    StartDelivery,
    CompleteDelivery,
    Cancel { reason: String },
}

impl OrderChange {
    pub fn name(&self) -> &'static str {
        match self {
            OrderChange::StartDelivery => "start_delivery",
            OrderChange::CompleteDelivery => "complete_delivery",
            OrderChange::Cancel { .. } => "cancel",
        }
    }

    pub fn target(&self) -> OrderStatus {
        match self {
            OrderChange::StartDelivery => OrderStatus::Shipped,
            OrderChange::CompleteDelivery => OrderStatus::Completed,
            OrderChange::Cancel { .. } => OrderStatus::Cancelled,
        }
    }

    /// New status of one order vehicle, or `None` when it stays as it is
    pub fn vehicle_status_after(&self, current: VehicleStatus) -> WorkflowResult<Option<VehicleStatus>> {
        match self {
            OrderChange::StartDelivery => current.apply(VehicleAction::Ship).map(Some),
            OrderChange::CompleteDelivery => current.apply(VehicleAction::MarkSold).map(Some),
            OrderChange::Cancel { .. } => match current {
                VehicleStatus::Shipping => current.apply(VehicleAction::ReturnToStock).map(Some),
                _ => Ok(None),
            },
        }
    }
}

/// Outcome of a planned order change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlan {
    pub status: OrderStatus,
    /// Completion is the sale: one unit per line leaves dealer stock
    pub consumes_dealer_stock: bool,
    pub cancellation_reason: Option<String>,
}
