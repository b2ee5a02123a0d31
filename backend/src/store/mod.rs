//! Storage layer for the distribution workflow
//!
//! Each `WorkflowStore` method is one atomic unit: it reads the rows it needs,
//! decides with the rules in `shared`, and writes, without yielding a partial
//! result to other units. Services never split a read-decide-write across two
//! store calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    Dealer, DistributionRequest, InventoryRecord, Order, OrderChange, OrderStatus, Payment,
    PaymentDraft, PaymentReceipt, RequestAction, RequestHistoryEntry, RequestStatus, StockKey,
    StockLocation, StockMovement, Variant, Vehicle, VehicleAction, VehicleStatus,
};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFilter {
    pub dealer_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFilter {
    pub dealer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleFilter {
    pub dealer_id: Option<Uuid>,
    pub status: Option<VehicleStatus>,
}

impl RequestFilter {
    fn matches(&self, request: &DistributionRequest) -> bool {
        self.dealer_id.map_or(true, |d| request.dealer_id == d)
            && self.status.map_or(true, |s| request.status == s)
    }
}

impl OrderFilter {
    fn matches(&self, order: &Order) -> bool {
        self.dealer_id.map_or(true, |d| order.dealer_id == d)
            && self.status.map_or(true, |s| order.status == s)
    }
}

impl VehicleFilter {
    fn matches(&self, vehicle: &Vehicle) -> bool {
        self.dealer_id.map_or(true, |d| vehicle.dealer_id == Some(d))
            && self.status.map_or(true, |s| vehicle.status == s)
    }
}

/// Persistent state of the distribution network
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    // Catalog
    async fn insert_dealer(&self, dealer: Dealer) -> AppResult<Dealer>;
    async fn get_dealer(&self, id: Uuid) -> AppResult<Option<Dealer>>;
    async fn list_dealers(&self) -> AppResult<Vec<Dealer>>;
    async fn insert_variant(&self, variant: Variant) -> AppResult<Variant>;
    async fn get_variant(&self, id: Uuid) -> AppResult<Option<Variant>>;
    async fn list_variants(&self) -> AppResult<Vec<Variant>>;
    async fn update_variant_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<Variant>;

    // Inventory ledger
    async fn stock_level(&self, location: StockLocation, key: &StockKey) -> AppResult<i64>;
    async fn list_inventory(&self, location: Option<StockLocation>) -> AppResult<Vec<InventoryRecord>>;
    /// Decrement only if enough stock is on hand
    async fn reserve(
        &self,
        location: StockLocation,
        key: &StockKey,
        quantity: i64,
    ) -> AppResult<InventoryRecord>;
    /// Increment, creating the record when absent
    async fn credit(
        &self,
        location: StockLocation,
        key: &StockKey,
        quantity: i64,
    ) -> AppResult<InventoryRecord>;
    /// Reserve at the source and credit the destination; returns `[from, to]`
    async fn transfer(&self, movement: &StockMovement) -> AppResult<Vec<InventoryRecord>>;

    // Distribution requests
    async fn insert_request(
        &self,
        request: DistributionRequest,
        created: RequestHistoryEntry,
    ) -> AppResult<DistributionRequest>;
    async fn get_request(&self, id: Uuid) -> AppResult<Option<DistributionRequest>>;
    async fn list_requests(&self, filter: RequestFilter) -> AppResult<Vec<DistributionRequest>>;
    async fn request_history(&self, id: Uuid) -> AppResult<Vec<RequestHistoryEntry>>;
    /// Apply `action` to the current status; allocate and recall move every
    /// line's stock in the same unit.
    async fn transition_request(
        &self,
        id: Uuid,
        action: RequestAction,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<DistributionRequest>;

    // Orders and payments
    /// Insert after checking every vehicle is unclaimed dealer stock
    async fn insert_order(&self, order: Order) -> AppResult<Order>;
    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>>;
    async fn list_orders(&self, filter: OrderFilter) -> AppResult<Vec<Order>>;
    async fn list_payments(&self, order_id: Uuid) -> AppResult<Vec<Payment>>;
    /// Insert the payment and recompute paid amount and status under the order lock
    async fn record_payment(&self, draft: PaymentDraft, now: DateTime<Utc>) -> AppResult<PaymentReceipt>;
    async fn set_order_status(
        &self,
        id: Uuid,
        expected: Option<OrderStatus>,
        target: OrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Order>;
    async fn apply_order_change(
        &self,
        id: Uuid,
        change: &OrderChange,
        now: DateTime<Utc>,
    ) -> AppResult<Order>;

    // Vehicles
    async fn insert_vehicle(&self, vehicle: Vehicle) -> AppResult<Vehicle>;
    async fn get_vehicle(&self, id: Uuid) -> AppResult<Option<Vehicle>>;
    async fn list_vehicles(&self, filter: VehicleFilter) -> AppResult<Vec<Vehicle>>;
    /// `dealer_id` is required for `AssignToDealer` and ignored otherwise
    async fn transition_vehicle(
        &self,
        id: Uuid,
        action: VehicleAction,
        dealer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vehicle>;
}

pub(crate) fn history_entry(
    request: &DistributionRequest,
    from: RequestStatus,
    action: RequestAction,
    actor_id: Uuid,
    at: DateTime<Utc>,
) -> RequestHistoryEntry {
    RequestHistoryEntry {
        request_id: request.id,
        from_status: Some(from),
        to_status: request.status,
        action: action.as_str().to_string(),
        actor_id,
        at,
    }
}
