//! HTTP handlers for order, payment and delivery endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::{Order, PaymentReceipt};
use uuid::Uuid;
use validator::Validate;

use super::parse_filter;
use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::orders::{
    CancelOrderInput, CreateOrderInput, OrderService, PaymentLedger, RecordPaymentInput,
    SetStatusInput,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub dealer_id: Option<Uuid>,
    pub status: Option<String>,
}

fn service(state: AppState) -> OrderService {
    OrderService::new(state.store, state.config.workflow.clone())
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<(StatusCode, Json<Order>)> {
    input.validate()?;
    let order = service(state).create_order(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let status = parse_filter(query.status.as_deref())?;
    let orders = service(state)
        .list_orders(&actor, query.dealer_id, status)
        .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(state).get_order(&actor, order_id).await?))
}

/// Record a payment. A replayed idempotency key answers 200 with the original entry.
pub async fn record_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(input): Json<RecordPaymentInput>,
) -> AppResult<(StatusCode, Json<PaymentReceipt>)> {
    input.validate()?;
    let receipt = service(state)
        .record_payment(&actor, order_id, input)
        .await?;
    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PaymentLedger>> {
    Ok(Json(service(state).payment_ledger(&actor, order_id).await?))
}

pub async fn set_order_status(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(input): Json<SetStatusInput>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(state).set_status(&actor, order_id, input).await?))
}

pub async fn start_delivery(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(state).start_delivery(&actor, order_id).await?))
}

pub async fn complete_delivery(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(state).complete_delivery(&actor, order_id).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(input): Json<CancelOrderInput>,
) -> AppResult<Json<Order>> {
    input.validate()?;
    Ok(Json(
        service(state)
            .cancel_order(&actor, order_id, input.reason)
            .await?,
    ))
}
