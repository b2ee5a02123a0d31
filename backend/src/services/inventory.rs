//! Inventory ledger service
//!
//! Quantities only move through the store's reserve, credit and transfer
//! units. Replenishment is the one operation that creates stock.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use shared::{Actor, InventoryRecord, StockKey, StockLevel, StockLocation, StockMovement};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::require_manufacturer;
use crate::config::WorkflowConfig;
use crate::error::{AppError, AppResult};
use crate::retry::retry_on_conflict;
use crate::store::WorkflowStore;

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn WorkflowStore>,
    workflow: WorkflowConfig,
}

/// Input naming a location and a quantity of one variant/color
#[derive(Debug, Deserialize, Validate)]
pub struct LedgerInput {
    pub location_kind: String,
    pub dealer_id: Option<Uuid>,
    pub variant_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub color: String,
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: i64,
}

/// Input for manufacturer to dealer movements in either direction
#[derive(Debug, Deserialize, Validate)]
pub struct TransferInput {
    pub dealer_id: Uuid,
    pub variant_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub color: String,
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: i64,
}

/// Input for new manufacturer stock
#[derive(Debug, Deserialize, Validate)]
pub struct ReplenishInput {
    pub variant_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub color: String,
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: i64,
}

impl InventoryService {
    pub fn new(store: Arc<dyn WorkflowStore>, workflow: WorkflowConfig) -> Self {
        Self { store, workflow }
    }

    /// Dealer staff read manufacturer stock and their own; manufacturer staff read everything
    fn visible_location(actor: &Actor, location: Option<StockLocation>) -> AppResult<Option<StockLocation>> {
        match (actor.dealer_id(), location) {
            (None, location) => Ok(location),
            (Some(own), None) => Ok(Some(StockLocation::dealer(own))),
            (Some(_), Some(StockLocation::Manufacturer)) => Ok(Some(StockLocation::Manufacturer)),
            (Some(own), Some(StockLocation::Dealer { dealer_id })) if dealer_id == own => {
                Ok(Some(StockLocation::dealer(own)))
            }
            (Some(_), Some(_)) => Err(AppError::Forbidden(
                "Dealer staff may only view their own dealer's stock".to_string(),
            )),
        }
    }

    async fn ensure_variant(&self, variant_id: Uuid) -> AppResult<()> {
        match self.store.get_variant(variant_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::validation(
                "variant_id",
                format!("Unknown variant {}", variant_id),
            )),
        }
    }

    async fn ensure_dealer(&self, dealer_id: Uuid) -> AppResult<()> {
        match self.store.get_dealer(dealer_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::validation(
                "dealer_id",
                format!("Unknown dealer {}", dealer_id),
            )),
        }
    }

    pub async fn list_stock(&self, actor: &Actor, location: Option<StockLocation>) -> AppResult<Vec<StockLevel>> {
        let location = Self::visible_location(actor, location)?;
        let threshold = self.workflow.low_stock_threshold;

        let records = self.store.list_inventory(location).await?;
        Ok(records
            .into_iter()
            .map(|record| StockLevel::from_record(record, threshold))
            .collect())
    }

    /// Records at or below the configured low-stock threshold
    pub async fn low_stock(&self, actor: &Actor, location: Option<StockLocation>) -> AppResult<Vec<StockLevel>> {
        Ok(self
            .list_stock(actor, location)
            .await?
            .into_iter()
            .filter(|level| level.low_stock)
            .collect())
    }

    pub async fn stock_level(&self, actor: &Actor, location: StockLocation, key: StockKey) -> AppResult<StockLevel> {
        let location = Self::visible_location(actor, Some(location))?.unwrap_or(location);
        let quantity = self.store.stock_level(location, &key).await?;
        Ok(StockLevel::from_record(
            InventoryRecord::new(location, key, quantity),
            self.workflow.low_stock_threshold,
        ))
    }

    /// New stock from production; the only operation that grows the network total
    #[tracing::instrument(skip(self, input), fields(variant_id = %input.variant_id))]
    pub async fn replenish(&self, actor: &Actor, input: ReplenishInput) -> AppResult<InventoryRecord> {
        require_manufacturer(actor)?;
        let key = StockKey::new(input.variant_id, &input.color)?;
        self.ensure_variant(key.variant_id).await?;

        let record = retry_on_conflict(self.workflow.max_conflict_retries, "replenish", || {
            self.store.credit(StockLocation::Manufacturer, &key, input.quantity)
        })
        .await?;

        info!(key = %key, quantity = input.quantity, on_hand = record.quantity, "Manufacturer stock replenished");
        Ok(record)
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn reserve(&self, actor: &Actor, input: LedgerInput) -> AppResult<InventoryRecord> {
        require_manufacturer(actor)?;
        let location = StockLocation::from_parts(&input.location_kind, input.dealer_id)?;
        let key = StockKey::new(input.variant_id, &input.color)?;

        let record = retry_on_conflict(self.workflow.max_conflict_retries, "reserve", || {
            self.store.reserve(location, &key, input.quantity)
        })
        .await?;

        info!(%location, key = %key, quantity = input.quantity, "Stock reserved");
        Ok(record)
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn credit(&self, actor: &Actor, input: LedgerInput) -> AppResult<InventoryRecord> {
        require_manufacturer(actor)?;
        let location = StockLocation::from_parts(&input.location_kind, input.dealer_id)?;
        let key = StockKey::new(input.variant_id, &input.color)?;
        self.ensure_variant(key.variant_id).await?;
        if let Some(dealer_id) = location.dealer_id() {
            self.ensure_dealer(dealer_id).await?;
        }

        let record = retry_on_conflict(self.workflow.max_conflict_retries, "credit", || {
            self.store.credit(location, &key, input.quantity)
        })
        .await?;

        info!(%location, key = %key, quantity = input.quantity, "Stock credited");
        Ok(record)
    }

    /// Move stock from the manufacturer to a dealer
    pub async fn transfer(&self, actor: &Actor, input: TransferInput) -> AppResult<Vec<InventoryRecord>> {
        self.move_stock(actor, input, false).await
    }

    /// Move stock from a dealer back to the manufacturer
    pub async fn recall(&self, actor: &Actor, input: TransferInput) -> AppResult<Vec<InventoryRecord>> {
        self.move_stock(actor, input, true).await
    }

    #[tracing::instrument(skip(self, input), fields(dealer_id = %input.dealer_id))]
    async fn move_stock(&self, actor: &Actor, input: TransferInput, back_to_manufacturer: bool) -> AppResult<Vec<InventoryRecord>> {
        require_manufacturer(actor)?;
        let key = StockKey::new(input.variant_id, &input.color)?;
        self.ensure_dealer(input.dealer_id).await?;

        let outbound = StockMovement {
            from: StockLocation::Manufacturer,
            to: StockLocation::dealer(input.dealer_id),
            key,
            quantity: input.quantity,
        };
        let movement = if back_to_manufacturer {
            outbound.reversed()
        } else {
            outbound
        };

        let operation = if back_to_manufacturer { "recall" } else { "transfer" };
        let records = retry_on_conflict(self.workflow.max_conflict_retries, operation, || {
            self.store.transfer(&movement)
        })
        .await?;

        info!(
            from = %movement.from,
            to = %movement.to,
            key = %movement.key,
            quantity = movement.quantity,
            "Stock moved"
        );
        Ok(records)
    }
}
