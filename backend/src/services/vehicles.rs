//! Per-VIN vehicle tracking service

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use shared::{
    normalize_vin, validate_vin, Actor, Party, StockKey, Vehicle, VehicleAction, VehicleStatus,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{require_manufacturer, require_party, scope_dealer, validate_field};
use crate::config::WorkflowConfig;
use crate::error::{AppError, AppResult};
use crate::retry::retry_on_conflict;
use crate::store::{VehicleFilter, WorkflowStore};

#[derive(Clone)]
pub struct VehicleService {
    store: Arc<dyn WorkflowStore>,
    workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterVehicleInput {
    #[validate(length(min = 1, max = 32))]
    pub vin: String,
    pub variant_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignDealerInput {
    pub dealer_id: Uuid,
}

impl VehicleService {
    pub fn new(store: Arc<dyn WorkflowStore>, workflow: WorkflowConfig) -> Self {
        Self { store, workflow }
    }

    /// Register a newly built vehicle in manufacturer stock
    #[tracing::instrument(skip(self, input))]
    pub async fn register_vehicle(&self, actor: &Actor, input: RegisterVehicleInput) -> AppResult<Vehicle> {
        require_manufacturer(actor)?;

        let vin = normalize_vin(&input.vin);
        validate_field("vin", validate_vin(&vin))?;
        let key = StockKey::new(input.variant_id, &input.color)?;
        if self.store.get_variant(key.variant_id).await?.is_none() {
            return Err(AppError::validation(
                "variant_id",
                format!("Unknown variant {}", key.variant_id),
            ));
        }

        let now = Utc::now();
        let vehicle = self
            .store
            .insert_vehicle(Vehicle {
                id: Uuid::new_v4(),
                vin,
                variant_id: key.variant_id,
                color: key.color,
                dealer_id: None,
                status: VehicleStatus::InManufacturerStock,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(vehicle_id = %vehicle.id, vin = %vehicle.vin, "Vehicle registered");
        Ok(vehicle)
    }

    async fn load(&self, id: Uuid) -> AppResult<Vehicle> {
        self.store
            .get_vehicle(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))
    }

    /// Dealer staff see only vehicles their dealer holds
    pub async fn get_vehicle(&self, actor: &Actor, id: Uuid) -> AppResult<Vehicle> {
        let vehicle = self.load(id).await?;
        if actor.is_manufacturer() || (vehicle.dealer_id.is_some() && vehicle.dealer_id == actor.dealer_id()) {
            Ok(vehicle)
        } else {
            Err(AppError::Forbidden(
                "Dealer staff may only view their own dealer's vehicles".to_string(),
            ))
        }
    }

    pub async fn list_vehicles(
        &self,
        actor: &Actor,
        dealer_id: Option<Uuid>,
        status: Option<VehicleStatus>,
    ) -> AppResult<Vec<Vehicle>> {
        let filter = VehicleFilter {
            dealer_id: scope_dealer(actor, dealer_id)?,
            status,
        };
        self.store.list_vehicles(filter).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_to_dealer(&self, actor: &Actor, id: Uuid, dealer_id: Uuid) -> AppResult<Vehicle> {
        require_manufacturer(actor)?;
        if self.store.get_dealer(dealer_id).await?.is_none() {
            return Err(AppError::validation(
                "dealer_id",
                format!("Unknown dealer {}", dealer_id),
            ));
        }

        self.transition(id, VehicleAction::AssignToDealer, Some(dealer_id)).await
    }

    /// Reserve a dealer-stock vehicle for a test drive
    pub async fn set_test_drive(&self, actor: &Actor, id: Uuid) -> AppResult<Vehicle> {
        self.dealer_transition(actor, id, VehicleAction::SetTestDrive).await
    }

    pub async fn clear_test_drive(&self, actor: &Actor, id: Uuid) -> AppResult<Vehicle> {
        self.dealer_transition(actor, id, VehicleAction::ClearTestDrive).await
    }

    async fn dealer_transition(&self, actor: &Actor, id: Uuid, action: VehicleAction) -> AppResult<Vehicle> {
        let vehicle = self.load(id).await?;
        match vehicle.dealer_id {
            Some(owner) => require_party(actor, Party::OwningDealer, owner)?,
            None => {
                return Err(AppError::Forbidden(
                    "Vehicle is not held by a dealer".to_string(),
                ))
            }
        }

        self.transition(id, action, None).await
    }

    async fn transition(&self, id: Uuid, action: VehicleAction, dealer_id: Option<Uuid>) -> AppResult<Vehicle> {
        let vehicle = retry_on_conflict(self.workflow.max_conflict_retries, action.as_str(), || {
            self.store.transition_vehicle(id, action, dealer_id, Utc::now())
        })
        .await?;

        info!(vehicle_id = %id, action = %action, status = %vehicle.status, "Vehicle status changed");
        Ok(vehicle)
    }
}
