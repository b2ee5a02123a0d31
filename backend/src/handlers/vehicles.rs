//! HTTP handlers for vehicle tracking endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::Vehicle;
use uuid::Uuid;
use validator::Validate;

use super::parse_filter;
use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::vehicles::{AssignDealerInput, RegisterVehicleInput, VehicleService};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VehicleListQuery {
    pub dealer_id: Option<Uuid>,
    pub status: Option<String>,
}

fn service(state: AppState) -> VehicleService {
    VehicleService::new(state.store, state.config.workflow.clone())
}

pub async fn register_vehicle(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<RegisterVehicleInput>,
) -> AppResult<(StatusCode, Json<Vehicle>)> {
    input.validate()?;
    let vehicle = service(state).register_vehicle(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(vehicle)))
}

pub async fn list_vehicles(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<VehicleListQuery>,
) -> AppResult<Json<Vec<Vehicle>>> {
    let status = parse_filter(query.status.as_deref())?;
    let vehicles = service(state)
        .list_vehicles(&actor, query.dealer_id, status)
        .await?;
    Ok(Json(vehicles))
}

pub async fn get_vehicle(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(vehicle_id): Path<Uuid>,
) -> AppResult<Json<Vehicle>> {
    Ok(Json(service(state).get_vehicle(&actor, vehicle_id).await?))
}

pub async fn assign_vehicle(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(vehicle_id): Path<Uuid>,
    Json(input): Json<AssignDealerInput>,
) -> AppResult<Json<Vehicle>> {
    let vehicle = service(state)
        .assign_to_dealer(&actor, vehicle_id, input.dealer_id)
        .await?;
    Ok(Json(vehicle))
}

pub async fn set_test_drive(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(vehicle_id): Path<Uuid>,
) -> AppResult<Json<Vehicle>> {
    Ok(Json(service(state).set_test_drive(&actor, vehicle_id).await?))
}

pub async fn clear_test_drive(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(vehicle_id): Path<Uuid>,
) -> AppResult<Json<Vehicle>> {
    Ok(Json(service(state).clear_test_drive(&actor, vehicle_id).await?))
}
