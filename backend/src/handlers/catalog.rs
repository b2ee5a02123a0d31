//! HTTP handlers for dealer and variant catalog endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{Dealer, Variant};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::catalog::{
    CatalogService, CreateDealerInput, CreateVariantInput, UpdatePriceInput,
};
use crate::AppState;

pub async fn create_dealer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<CreateDealerInput>,
) -> AppResult<(StatusCode, Json<Dealer>)> {
    input.validate()?;
    let service = CatalogService::new(state.store);
    let dealer = service.create_dealer(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(dealer)))
}

pub async fn list_dealers(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> AppResult<Json<Vec<Dealer>>> {
    let service = CatalogService::new(state.store);
    Ok(Json(service.list_dealers().await?))
}

pub async fn get_dealer(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Path(dealer_id): Path<Uuid>,
) -> AppResult<Json<Dealer>> {
    let service = CatalogService::new(state.store);
    Ok(Json(service.get_dealer(dealer_id).await?))
}

pub async fn create_variant(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<CreateVariantInput>,
) -> AppResult<(StatusCode, Json<Variant>)> {
    input.validate()?;
    let service = CatalogService::new(state.store);
    let variant = service.create_variant(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

pub async fn list_variants(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> AppResult<Json<Vec<Variant>>> {
    let service = CatalogService::new(state.store);
    Ok(Json(service.list_variants().await?))
}

pub async fn get_variant(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Path(variant_id): Path<Uuid>,
) -> AppResult<Json<Variant>> {
    let service = CatalogService::new(state.store);
    Ok(Json(service.get_variant(variant_id).await?))
}

/// Revise a variant's list price
pub async fn update_variant_price(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(variant_id): Path<Uuid>,
    Json(input): Json<UpdatePriceInput>,
) -> AppResult<Json<Variant>> {
    let service = CatalogService::new(state.store);
    let variant = service
        .update_variant_price(&actor, variant_id, input.price)
        .await?;
    Ok(Json(variant))
}
