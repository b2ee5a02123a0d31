//! Payments against sale orders and order status reconciliation
//!
//! Reconciliation rule: the paid amount is the sum of every payment linked to
//! the order. A FULL payment marks the order PAID once the paid amount covers
//! the total price. An INSTALLMENT payment marks it PARTIAL whatever the
//! cumulative sum; staff move a fully paid installment order to PAID through
//! the guarded explicit status change.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{Order, OrderChange, OrderStatus};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{sum_amounts, unknown_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            other => Err(unknown_value("method", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Full,
    Installment,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Full => "FULL",
            PaymentType::Installment => "INSTALLMENT",
        }
    }
}

impl FromStr for PaymentType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL" => Ok(PaymentType::Full),
            "INSTALLMENT" => Ok(PaymentType::Installment),
            other => Err(unknown_value("payment_type", other)),
        }
    }
}

/// Append-only payment ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    /// Caller-supplied key; a repeat on the same order returns the first entry
    pub idempotency_key: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub idempotency_key: Option<String>,
    pub created_by: Uuid,
}

impl Payment {
    pub fn record(draft: PaymentDraft, now: DateTime<Utc>) -> WorkflowResult<Self> {
        if draft.amount <= Decimal::ZERO {
            return Err(WorkflowError::validation(
                "amount",
                "Payment amount must be positive",
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id: draft.order_id,
            amount: draft.amount,
            method: draft.method,
            payment_type: draft.payment_type,
            idempotency_key: draft
                .idempotency_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            created_by: draft.created_by,
            created_at: now,
        })
    }
}

/// Result of posting a payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub order: Order,
    /// True when an idempotency key matched an earlier payment
    pub replayed: bool,
}

/// Sum of the payments linked to `order_id`
pub fn paid_amount(order_id: Uuid, payments: &[Payment]) -> WorkflowResult<Decimal> {
    sum_amounts(
        "amount",
        payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .map(|p| p.amount),
    )
}

/// Order status right after a payment of `payment_type` brought the paid amount to `paid`
pub fn status_after_payment(total: Decimal, paid: Decimal, payment_type: PaymentType) -> OrderStatus {
    match payment_type {
        PaymentType::Full if paid >= total => OrderStatus::Paid,
        PaymentType::Full | PaymentType::Installment => OrderStatus::Partial,
    }
}

/// Check that an order may take another payment
pub fn ensure_accepts_payment(order: &Order) -> WorkflowResult<()> {
    if !order.is_customer_order() {
        return Err(WorkflowError::validation(
            "order_id",
            "Internal orders do not take customer payments",
        ));
    }
    if !order.status.accepts_payments() {
        return Err(WorkflowError::invalid_transition(
            "order",
            order.status,
            "record payment",
        ));
    }
    Ok(())
}

/// Paid amount once `amount` is added; overflow is a validation error
pub fn paid_after(order: &Order, amount: Decimal) -> WorkflowResult<Decimal> {
    order
        .paid_amount
        .checked_add(amount)
        .ok_or_else(|| WorkflowError::validation("amount", "Payment amount is too large"))
}

/// Status implied by the payment ledger alone.
///
/// Orders past the payment stage keep their status. Otherwise the most
/// recent payment decides, measured against the cumulative sum.
pub fn derive_status(order: &Order, payments: &[Payment]) -> WorkflowResult<OrderStatus> {
    if !matches!(
        order.status,
        OrderStatus::Pending | OrderStatus::Partial | OrderStatus::Paid
    ) {
        return Ok(order.status);
    }

    let mut linked: Vec<&Payment> = payments.iter().filter(|p| p.order_id == order.id).collect();
    linked.sort_by_key(|p| p.created_at);

    match linked.last() {
        None => Ok(OrderStatus::Pending),
        Some(last) => {
            let paid = sum_amounts("amount", linked.iter().map(|p| p.amount))?;
            let derived = status_after_payment(order.total_price, paid, last.payment_type);
            // A PAID order stays PAID: statuses never regress
            if order.status == OrderStatus::Paid {
                Ok(OrderStatus::Paid)
            } else {
                Ok(derived)
            }
        }
    }
}

/// What a guarded explicit status change resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDirective {
    /// Write the status directly
    Set(OrderStatus),
    /// Run the delivery operation that owns this status
    Delivery(OrderChange),
}

/// Compare-and-apply guard for callers that set an order status explicitly.
///
/// `expected` is the status the caller last read; a mismatch means another
/// writer got there first.
pub fn guard_status_change(
    order: &Order,
    expected: Option<OrderStatus>,
    target: OrderStatus,
) -> WorkflowResult<StatusDirective> {
    if let Some(expected) = expected {
        if expected != order.status {
            return Err(WorkflowError::invalid_transition(
                "order",
                order.status,
                format!("set {} (caller expected {})", target, expected),
            ));
        }
    }

    if target == order.status {
        return Ok(StatusDirective::Set(target));
    }

    if !order.status.can_transition_to(target) {
        return Err(WorkflowError::invalid_transition(
            "order",
            order.status,
            format!("set {}", target),
        ));
    }

    match target {
        OrderStatus::Paid if order.paid_amount < order.total_price => Err(WorkflowError::validation(
            "status",
            format!(
                "Paid amount {} does not cover total price {}",
                order.paid_amount, order.total_price
            ),
        )),
        OrderStatus::Partial if order.paid_amount <= Decimal::ZERO => Err(WorkflowError::validation(
            "status",
            "No payment has been recorded",
        )),
        OrderStatus::Paid | OrderStatus::Partial => Ok(StatusDirective::Set(target)),
        OrderStatus::Shipped => Ok(StatusDirective::Delivery(OrderChange::StartDelivery)),
        OrderStatus::Completed => Ok(StatusDirective::Delivery(OrderChange::CompleteDelivery)),
        OrderStatus::Cancelled => Err(WorkflowError::validation(
            "status",
            "Cancelling an order requires a reason",
        )),
        OrderStatus::Pending => Err(WorkflowError::invalid_transition(
            "order",
            order.status,
            "set PENDING",
        )),
    }
}
