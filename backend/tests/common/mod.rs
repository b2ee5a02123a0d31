//! Fixtures shared by the integration tests
//!
//! Every harness runs the real services over a fresh in-memory store unless
//! a store is handed in.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use ev_distribution_backend::config::WorkflowConfig;
use ev_distribution_backend::services::catalog::{CreateDealerInput, CreateVariantInput};
use ev_distribution_backend::services::distribution::{CreateRequestInput, RequestLineInput};
use ev_distribution_backend::services::inventory::ReplenishInput;
use ev_distribution_backend::services::orders::{CreateOrderInput, OrderLineInput};
use ev_distribution_backend::services::vehicles::RegisterVehicleInput;
use ev_distribution_backend::services::{
    CatalogService, DistributionService, InventoryService, OrderService, VehicleService,
};
use ev_distribution_backend::store::{MemoryStore, WorkflowStore};
use shared::{
    Actor, Dealer, DistributionRequest, Order, Priority, StockKey, StockLocation, Variant,
    Vehicle,
};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A syntactically valid VIN; random so that runs against a shared database do not collide
pub fn unique_vin() -> String {
    format!("5YJ3E1EA{:09}", Uuid::new_v4().as_u128() % 1_000_000_000)
}

/// A random dealer code in the accepted format
pub fn unique_dealer_code() -> String {
    format!("D{}", &Uuid::new_v4().simple().to_string()[..8]).to_ascii_uppercase()
}

pub fn next_week() -> NaiveDate {
    (Utc::now() + Duration::days(7)).date_naive()
}

pub struct Harness {
    pub store: Arc<dyn WorkflowStore>,
    pub workflow: WorkflowConfig,
    pub manufacturer: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_workflow(WorkflowConfig::default())
    }

    pub fn with_workflow(workflow: WorkflowConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), workflow)
    }

    pub fn with_store(store: Arc<dyn WorkflowStore>, workflow: WorkflowConfig) -> Self {
        Self {
            store,
            workflow,
            manufacturer: Actor::manufacturer(Uuid::new_v4()),
        }
    }

    pub fn catalog(&self) -> CatalogService {
        CatalogService::new(self.store.clone())
    }

    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(self.store.clone(), self.workflow.clone())
    }

    pub fn distribution(&self) -> DistributionService {
        DistributionService::new(self.store.clone(), self.workflow.clone())
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.store.clone(), self.workflow.clone())
    }

    pub fn vehicles(&self) -> VehicleService {
        VehicleService::new(self.store.clone(), self.workflow.clone())
    }

    /// A dealer and one of its staff members
    pub async fn dealer(&self) -> (Dealer, Actor) {
        let dealer = self
            .catalog()
            .create_dealer(
                &self.manufacturer,
                CreateDealerInput {
                    code: unique_dealer_code(),
                    name: "Hanoi Central EV".to_string(),
                    address: Some("12 Tran Hung Dao".to_string()),
                    phone: Some("+84 24 3825 1234".to_string()),
                    email: Some("sales@hanoi-ev.example".to_string()),
                },
            )
            .await
            .unwrap();
        let staff = Actor::dealer(Uuid::new_v4(), dealer.id);
        (dealer, staff)
    }

    pub async fn variant(&self, price: &str) -> Variant {
        self.catalog()
            .create_variant(
                &self.manufacturer,
                CreateVariantInput {
                    model: "VF 8".to_string(),
                    trim: format!("Plus {}", &Uuid::new_v4().simple().to_string()[..6]),
                    price: dec(price),
                },
            )
            .await
            .unwrap()
    }

    pub async fn replenish(&self, variant_id: Uuid, color: &str, quantity: i64) {
        self.inventory()
            .replenish(
                &self.manufacturer,
                ReplenishInput {
                    variant_id,
                    color: color.to_string(),
                    quantity,
                },
            )
            .await
            .unwrap();
    }

    pub async fn stock(&self, location: StockLocation, variant_id: Uuid, color: &str) -> i64 {
        self.store
            .stock_level(location, &StockKey::new(variant_id, color).unwrap())
            .await
            .unwrap()
    }

    /// A PENDING request raised by `staff` with `(variant, color, quantity)` lines
    pub async fn request(&self, staff: &Actor, lines: &[(Uuid, &str, i64)]) -> DistributionRequest {
        self.distribution()
            .create_request(
                staff,
                CreateRequestInput {
                    required_date: next_week(),
                    priority: Priority::Normal,
                    lines: lines
                        .iter()
                        .map(|(variant_id, color, quantity)| RequestLineInput {
                            variant_id: *variant_id,
                            color: color.to_string(),
                            quantity: *quantity,
                        })
                        .collect(),
                    note: None,
                },
            )
            .await
            .unwrap()
    }

    /// An APPROVED request
    pub async fn approved_request(&self, staff: &Actor, lines: &[(Uuid, &str, i64)]) -> DistributionRequest {
        let request = self.request(staff, lines).await;
        self.distribution()
            .approve(&self.manufacturer, request.id)
            .await
            .unwrap()
    }

    /// A vehicle sitting in `dealer`'s stock, with the aggregate dealer stock credited to match
    pub async fn dealer_vehicle(&self, dealer: &Dealer, variant: &Variant, color: &str) -> Vehicle {
        let vehicles = self.vehicles();
        let vehicle = vehicles
            .register_vehicle(
                &self.manufacturer,
                RegisterVehicleInput {
                    vin: unique_vin(),
                    variant_id: variant.id,
                    color: color.to_string(),
                },
            )
            .await
            .unwrap();

        self.store
            .credit(
                StockLocation::dealer(dealer.id),
                &StockKey::new(variant.id, color).unwrap(),
                1,
            )
            .await
            .unwrap();

        vehicles
            .assign_to_dealer(&self.manufacturer, vehicle.id, dealer.id)
            .await
            .unwrap()
    }

    /// A customer order over `vehicles` at list price
    pub async fn order(&self, staff: &Actor, vehicles: &[&Vehicle]) -> Order {
        self.orders()
            .create_order(
                staff,
                CreateOrderInput {
                    customer_id: Some(Uuid::new_v4()),
                    lines: vehicles
                        .iter()
                        .map(|v| OrderLineInput {
                            vehicle_id: v.id,
                            unit_price: None,
                        })
                        .collect(),
                },
            )
            .await
            .unwrap()
    }
}
