//! HTTP handlers for distribution request endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::{DistributionRequest, RequestHistoryEntry};
use uuid::Uuid;
use validator::Validate;

use super::parse_filter;
use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::distribution::{CreateRequestInput, DistributionService};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RequestListQuery {
    pub dealer_id: Option<Uuid>,
    pub status: Option<String>,
}

fn service(state: AppState) -> DistributionService {
    DistributionService::new(state.store, state.config.workflow.clone())
}

/// Raise a distribution request for the caller's dealer
pub async fn create_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<CreateRequestInput>,
) -> AppResult<(StatusCode, Json<DistributionRequest>)> {
    input.validate()?;
    let request = service(state).create_request(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<RequestListQuery>,
) -> AppResult<Json<Vec<DistributionRequest>>> {
    let status = parse_filter(query.status.as_deref())?;
    let requests = service(state)
        .list_requests(&actor, query.dealer_id, status)
        .await?;
    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).get_request(&actor, request_id).await?))
}

/// Audit trail of every committed transition
pub async fn get_request_history(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Vec<RequestHistoryEntry>>> {
    Ok(Json(service(state).request_history(&actor, request_id).await?))
}

pub async fn approve_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).approve(&actor, request_id).await?))
}

pub async fn reject_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).reject(&actor, request_id).await?))
}

pub async fn allocate_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).allocate(&actor, request_id).await?))
}

pub async fn confirm_request_receipt(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).confirm_receipt(&actor, request_id).await?))
}

pub async fn recall_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).recall(&actor, request_id).await?))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<DistributionRequest>> {
    Ok(Json(service(state).cancel(&actor, request_id).await?))
}
