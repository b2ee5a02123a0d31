//! Sale orders, payments and the delivery pipeline

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    derive_status, Actor, Order, OrderChange, OrderDraft, OrderLine, OrderStatus, Party, Payment,
    PaymentDraft, PaymentMethod, PaymentReceipt, PaymentType,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{require_party, require_view, scope_dealer};
use crate::config::WorkflowConfig;
use crate::error::{AppError, AppResult};
use crate::retry::retry_on_conflict;
use crate::store::{OrderFilter, WorkflowStore};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn WorkflowStore>,
    workflow: WorkflowConfig,
}

/// Input for raising an order; without a customer it is an internal order
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderInput {
    pub customer_id: Option<Uuid>,
    #[validate(length(min = 1, max = 50))]
    pub lines: Vec<OrderLineInput>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OrderLineInput {
    pub vehicle_id: Uuid,
    /// Defaults to the variant's list price
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    #[validate(length(min = 1, max = 100))]
    pub idempotency_key: Option<String>,
}

/// Explicit status change; statuses arrive as strings and must name a known status
#[derive(Debug, Deserialize)]
pub struct SetStatusInput {
    pub expected: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelOrderInput {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Payment ledger of one order with the reconciled figures
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLedger {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub derived_status: OrderStatus,
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    pub outstanding: Decimal,
    pub payments: Vec<Payment>,
}

impl OrderService {
    pub fn new(store: Arc<dyn WorkflowStore>, workflow: WorkflowConfig) -> Self {
        Self { store, workflow }
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn create_order(&self, actor: &Actor, input: CreateOrderInput) -> AppResult<Order> {
        let dealer_id = actor
            .dealer_id()
            .ok_or_else(|| AppError::Forbidden("Only dealer staff raise orders".to_string()))?;

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            let vehicle = self.store.get_vehicle(line.vehicle_id).await?.ok_or_else(|| {
                AppError::validation("vehicle_id", format!("Unknown vehicle {}", line.vehicle_id))
            })?;
            let unit_price = match line.unit_price {
                Some(price) => price,
                None => {
                    self.store
                        .get_variant(vehicle.variant_id)
                        .await?
                        .ok_or_else(|| AppError::Internal(format!("Vehicle {} has no variant", vehicle.vin)))?
                        .price
                }
            };
            lines.push(OrderLine::for_vehicle(&vehicle, unit_price));
        }

        let order = Order::create(
            OrderDraft {
                dealer_id,
                customer_id: input.customer_id,
                lines,
                created_by: actor.user_id,
            },
            Utc::now(),
        )?;

        // Availability of every vehicle is re-checked under lock by the store
        let order = retry_on_conflict(self.workflow.max_conflict_retries, "create_order", || {
            self.store.insert_order(order.clone())
        })
        .await?;

        info!(
            order_id = %order.id,
            dealer_id = %dealer_id,
            vehicles = order.lines.len(),
            total = %order.total_price,
            "Order created"
        );
        Ok(order)
    }

    async fn load(&self, id: Uuid) -> AppResult<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))
    }

    pub async fn get_order(&self, actor: &Actor, id: Uuid) -> AppResult<Order> {
        let order = self.load(id).await?;
        require_view(actor, order.dealer_id)?;
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        actor: &Actor,
        dealer_id: Option<Uuid>,
        status: Option<OrderStatus>,
    ) -> AppResult<Vec<Order>> {
        let filter = OrderFilter {
            dealer_id: scope_dealer(actor, dealer_id)?,
            status,
        };
        self.store.list_orders(filter).await
    }

    pub async fn payment_ledger(&self, actor: &Actor, id: Uuid) -> AppResult<PaymentLedger> {
        let order = self.get_order(actor, id).await?;
        let payments = self.store.list_payments(id).await?;

        Ok(PaymentLedger {
            order_id: order.id,
            status: order.status,
            derived_status: derive_status(&order, &payments)?,
            total_price: order.total_price,
            paid_amount: order.paid_amount,
            outstanding: order.outstanding(),
            payments,
        })
    }

    /// Append a payment and reconcile the order in one unit
    #[tracing::instrument(skip(self, input))]
    pub async fn record_payment(&self, actor: &Actor, order_id: Uuid, input: RecordPaymentInput) -> AppResult<PaymentReceipt> {
        let order = self.load(order_id).await?;
        require_party(actor, Party::OwningDealer, order.dealer_id)?;

        let draft = PaymentDraft {
            order_id,
            amount: input.amount,
            method: input.method,
            payment_type: input.payment_type,
            idempotency_key: input.idempotency_key,
            created_by: actor.user_id,
        };

        let receipt = retry_on_conflict(self.workflow.max_conflict_retries, "record_payment", || {
            self.store.record_payment(draft.clone(), Utc::now())
        })
        .await?;

        if receipt.replayed {
            info!(order_id = %order_id, payment_id = %receipt.payment.id, "Payment replayed by idempotency key");
        } else {
            info!(
                order_id = %order_id,
                payment_id = %receipt.payment.id,
                amount = %receipt.payment.amount,
                paid = %receipt.order.paid_amount,
                status = %receipt.order.status,
                "Payment recorded"
            );
        }
        Ok(receipt)
    }

    /// Guarded explicit status change
    #[tracing::instrument(skip(self, input))]
    pub async fn set_status(&self, actor: &Actor, id: Uuid, input: SetStatusInput) -> AppResult<Order> {
        let target: OrderStatus = input.status.trim().parse()?;
        let expected = input
            .expected
            .as_deref()
            .map(|s| s.trim().parse::<OrderStatus>())
            .transpose()?;

        let order = self.load(id).await?;
        require_party(actor, Party::OwningDealer, order.dealer_id)?;

        let order = retry_on_conflict(self.workflow.max_conflict_retries, "set_order_status", || {
            self.store.set_order_status(id, expected, target, Utc::now())
        })
        .await?;

        info!(order_id = %id, status = %order.status, "Order status set");
        Ok(order)
    }

    /// Hand the order's vehicles to delivery
    pub async fn start_delivery(&self, actor: &Actor, id: Uuid) -> AppResult<Order> {
        self.change(actor, id, OrderChange::StartDelivery).await
    }

    /// Mark the vehicles sold and take them out of dealer stock
    pub async fn complete_delivery(&self, actor: &Actor, id: Uuid) -> AppResult<Order> {
        self.change(actor, id, OrderChange::CompleteDelivery).await
    }

    pub async fn cancel_order(&self, actor: &Actor, id: Uuid, reason: String) -> AppResult<Order> {
        self.change(actor, id, OrderChange::Cancel { reason }).await
    }

    #[tracing::instrument(skip(self), fields(change = change.name()))]
    async fn change(&self, actor: &Actor, id: Uuid, change: OrderChange) -> AppResult<Order> {
        let order = self.load(id).await?;
        require_party(actor, Party::OwningDealer, order.dealer_id)?;

        let order = retry_on_conflict(self.workflow.max_conflict_retries, change.name(), || {
            self.store.apply_order_change(id, &change, Utc::now())
        })
        .await?;

        info!(order_id = %id, change = change.name(), status = %order.status, "Order changed");
        Ok(order)
    }
}
