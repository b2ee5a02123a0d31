//! HTTP handlers for inventory ledger endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use shared::{InventoryRecord, StockKey, StockLevel, StockLocation};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::inventory::{InventoryService, LedgerInput, ReplenishInput, TransferInput};
use crate::AppState;

/// `?location_kind=DEALER&dealer_id=...`; both absent means every location
#[derive(Debug, Default, Deserialize)]
pub struct LocationQuery {
    pub location_kind: Option<String>,
    pub dealer_id: Option<Uuid>,
}

impl LocationQuery {
    fn location(&self) -> AppResult<Option<StockLocation>> {
        match (self.location_kind.as_deref(), self.dealer_id) {
            (None, None) => Ok(None),
            (None, Some(dealer_id)) => Ok(Some(StockLocation::dealer(dealer_id))),
            (Some(kind), dealer_id) => Ok(Some(StockLocation::from_parts(kind, dealer_id)?)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StockLevelQuery {
    pub location_kind: Option<String>,
    pub dealer_id: Option<Uuid>,
    pub variant_id: Uuid,
    pub color: String,
}

fn service(state: AppState) -> InventoryService {
    InventoryService::new(state.store, state.config.workflow.clone())
}

/// List stock records with their low-stock flag
pub async fn list_inventory(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<LocationQuery>,
) -> AppResult<Json<Vec<StockLevel>>> {
    let location = query.location()?;
    let levels = service(state).list_stock(&actor, location).await?;
    Ok(Json(levels))
}

/// List records at or below the low-stock threshold
pub async fn list_low_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<LocationQuery>,
) -> AppResult<Json<Vec<StockLevel>>> {
    let location = query.location()?;
    let levels = service(state).low_stock(&actor, location).await?;
    Ok(Json(levels))
}

/// Quantity of one variant/color at one location
pub async fn get_stock_level(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<StockLevelQuery>,
) -> AppResult<Json<StockLevel>> {
    let location = LocationQuery {
        location_kind: query.location_kind,
        dealer_id: query.dealer_id,
    }
    .location()?
    .unwrap_or(StockLocation::Manufacturer);
    let key = StockKey::new(query.variant_id, &query.color)?;
    let level = service(state).stock_level(&actor, location, key).await?;
    Ok(Json(level))
}

pub async fn replenish_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<ReplenishInput>,
) -> AppResult<Json<InventoryRecord>> {
    input.validate()?;
    Ok(Json(service(state).replenish(&actor, input).await?))
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<LedgerInput>,
) -> AppResult<Json<InventoryRecord>> {
    input.validate()?;
    Ok(Json(service(state).reserve(&actor, input).await?))
}

pub async fn credit_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<LedgerInput>,
) -> AppResult<Json<InventoryRecord>> {
    input.validate()?;
    Ok(Json(service(state).credit(&actor, input).await?))
}

/// Manufacturer to dealer; returns the source and destination records
pub async fn transfer_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<TransferInput>,
) -> AppResult<Json<Vec<InventoryRecord>>> {
    input.validate()?;
    Ok(Json(service(state).transfer(&actor, input).await?))
}

/// Dealer to manufacturer; returns the source and destination records
pub async fn recall_stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<TransferInput>,
) -> AppResult<Json<Vec<InventoryRecord>>> {
    input.validate()?;
    Ok(Json(service(state).recall(&actor, input).await?))
}
