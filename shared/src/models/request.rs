//! Distribution requests: a dealer's bulk request for vehicles from the manufacturer
//!
//! The request lifecycle is a closed state machine:
//!
//! ```text
//! PENDING --approve--> APPROVED --allocate--> SHIPPED --confirm_receipt--> DELIVERED
//!    |                    ^                      |
//!    |                    +-------recall---------+
//!    +--reject--> REJECTED
//!    +--cancel--> CANCELLED
//! ```

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::staff::Party;
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{sum_amounts, unknown_value, StockKey};

/// Status of a distribution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Shipped,
    Delivered,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Shipped,
        RequestStatus::Delivered,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Shipped => "SHIPPED",
            RequestStatus::Delivered => "DELIVERED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }

    /// The status reached by applying `action`, or `InvalidTransition`
    pub fn apply(self, action: RequestAction) -> WorkflowResult<RequestStatus> {
        use RequestAction as A;
        use RequestStatus as S;

        match (self, action) {
            (S::Pending, A::Approve) => Ok(S::Approved),
            (S::Pending, A::Reject) => Ok(S::Rejected),
            (S::Pending, A::Cancel) => Ok(S::Cancelled),
            (S::Approved, A::Allocate) => Ok(S::Shipped),
            (S::Shipped, A::ConfirmReceipt) => Ok(S::Delivered),
            (S::Shipped, A::Recall) => Ok(S::Approved),
            (from, action) => Err(WorkflowError::invalid_transition(
                "distribution request",
                from,
                action,
            )),
        }
    }

    pub fn allowed_actions(self) -> Vec<RequestAction> {
        RequestAction::ALL
            .into_iter()
            .filter(|action| self.apply(*action).is_ok())
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_actions().is_empty()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| unknown_value("status", s))
    }
}

/// A state-changing operation on a distribution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestAction {
    Approve,
    Reject,
    Allocate,
    ConfirmReceipt,
    Recall,
    Cancel,
}

impl RequestAction {
    pub const ALL: [RequestAction; 6] = [
        RequestAction::Approve,
        RequestAction::Reject,
        RequestAction::Allocate,
        RequestAction::ConfirmReceipt,
        RequestAction::Recall,
        RequestAction::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestAction::Approve => "approve",
            RequestAction::Reject => "reject",
            RequestAction::Allocate => "allocate",
            RequestAction::ConfirmReceipt => "confirm_receipt",
            RequestAction::Recall => "recall",
            RequestAction::Cancel => "cancel",
        }
    }

    /// Manufacturer staff decide and ship; the requesting dealer confirms or withdraws
    pub fn performed_by(&self) -> Party {
        match self {
            RequestAction::Approve
            | RequestAction::Reject
            | RequestAction::Allocate
            | RequestAction::Recall => Party::Manufacturer,
            RequestAction::ConfirmReceipt | RequestAction::Cancel => Party::OwningDealer,
        }
    }

    /// Whether the transition moves stock between locations
    pub fn moves_stock(&self) -> bool {
        matches!(self, RequestAction::Allocate | RequestAction::Recall)
    }
}

impl std::fmt::Display for RequestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestAction {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| unknown_value("action", s))
    }
}

/// Request urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
        }
    }
}

impl FromStr for Priority {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            other => Err(unknown_value("priority", other)),
        }
    }
}

/// Largest quantity a single request line may ask for
pub const MAX_LINE_QUANTITY: i64 = 10_000;

/// One variant/color/quantity line of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLine {
    pub variant_id: Uuid,
    pub color: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl RequestLine {
    pub fn new(key: StockKey, quantity: i64, unit_price: Decimal) -> WorkflowResult<Self> {
        if quantity <= 0 {
            return Err(WorkflowError::validation(
                "quantity",
                "Quantity must be positive",
            ));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(WorkflowError::validation(
                "quantity",
                format!("Quantity cannot exceed {}", MAX_LINE_QUANTITY),
            ));
        }
        if unit_price < Decimal::ZERO {
            return Err(WorkflowError::validation(
                "unit_price",
                "Unit price cannot be negative",
            ));
        }
        Ok(Self {
            variant_id: key.variant_id,
            color: key.color,
            quantity,
            unit_price,
            line_total: unit_price
                .checked_mul(Decimal::from(quantity))
                .ok_or_else(|| WorkflowError::validation("quantity", "Line total is too large"))?,
        })
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            variant_id: self.variant_id,
            color: self.color.clone(),
        }
    }
}

/// A dealer's request for vehicles from the manufacturer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub id: Uuid,
    pub dealer_id: Uuid,
    pub requested_by: Uuid,
    pub request_date: DateTime<Utc>,
    pub required_date: NaiveDate,
    pub priority: Priority,
    pub status: RequestStatus,
    pub lines: Vec<RequestLine>,
    pub total_amount: Decimal,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a dealer supplies when raising a request
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub dealer_id: Uuid,
    pub requested_by: Uuid,
    pub required_date: NaiveDate,
    pub priority: Priority,
    pub lines: Vec<RequestLine>,
    pub note: Option<String>,
}

impl DistributionRequest {
    /// Validate a draft and produce a PENDING request
    pub fn create(draft: RequestDraft, now: DateTime<Utc>) -> WorkflowResult<Self> {
        if draft.lines.is_empty() {
            return Err(WorkflowError::validation(
                "lines",
                "A request needs at least one line",
            ));
        }

        let mut seen = HashSet::new();
        for line in &draft.lines {
            if line.quantity <= 0 {
                return Err(WorkflowError::validation(
                    "quantity",
                    "Quantity must be positive",
                ));
            }
            if !seen.insert(line.key()) {
                return Err(WorkflowError::validation(
                    "lines",
                    format!(
                        "Variant {} in {} appears more than once",
                        line.variant_id, line.color
                    ),
                ));
            }
        }

        if draft.required_date < now.date_naive() {
            return Err(WorkflowError::validation(
                "required_date",
                "Required date cannot be before the request date",
            ));
        }

        let total_amount = sum_amounts("lines", draft.lines.iter().map(|l| l.line_total))?;

        Ok(Self {
            id: Uuid::new_v4(),
            dealer_id: draft.dealer_id,
            requested_by: draft.requested_by,
            request_date: now,
            required_date: draft.required_date,
            priority: draft.priority,
            status: RequestStatus::Pending,
            lines: draft.lines,
            total_amount,
            note: draft.note.filter(|n| !n.trim().is_empty()),
            updated_at: now,
        })
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// One committed transition of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHistoryEntry {
    pub request_id: Uuid,
    /// `None` for the creation entry
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub action: String,
    pub actor_id: Uuid,
    pub at: DateTime<Utc>,
}
