//! In-memory workflow store
//!
//! One mutex guards the whole state and every trait method runs inside a
//! single critical section with no `.await` while the lock is held, which
//! makes each method an atomic unit. Decisions are made on copies and written
//! back only once every check has passed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::allocation::{plan_allocation, plan_recall, request_keys};
use shared::ledger::{aggregate_demand, shortfalls, StockBook};
use shared::{
    ensure_accepts_payment, ensure_orderable, guard_status_change, paid_after, status_after_payment,
    Dealer, DistributionRequest, InventoryRecord, Order, OrderChange, OrderStatus, Payment,
    PaymentDraft, PaymentReceipt, RequestAction, RequestHistoryEntry, StatusDirective, StockKey,
    StockLocation, StockMovement, Variant, Vehicle, VehicleAction,
};

use super::{history_entry, OrderFilter, RequestFilter, VehicleFilter, WorkflowStore};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct State {
    dealers: HashMap<Uuid, Dealer>,
    variants: HashMap<Uuid, Variant>,
    book: StockBook,
    requests: HashMap<Uuid, DistributionRequest>,
    history: Vec<RequestHistoryEntry>,
    orders: HashMap<Uuid, Order>,
    payments: Vec<Payment>,
    vehicles: HashMap<Uuid, Vehicle>,
}

/// Workflow store kept in process memory, for tests and demo runs
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn record(book: &StockBook, location: StockLocation, key: &StockKey) -> InventoryRecord {
    InventoryRecord::new(location, key.clone(), book.quantity(&location, key))
}

impl State {
    fn order(&self, id: Uuid) -> AppResult<Order> {
        self.orders
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Order".to_string()))
    }

    fn on_active_order(&self, vehicle_id: Uuid) -> bool {
        self.orders
            .values()
            .any(|o| o.status.is_active() && o.lines.iter().any(|l| l.vehicle_id == vehicle_id))
    }

    fn apply_order_change(&mut self, id: Uuid, change: &OrderChange, now: DateTime<Utc>) -> AppResult<Order> {
        let mut order = self.order(id)?;
        let plan = order.plan(change)?;

        let mut vehicles = Vec::with_capacity(order.lines.len());
        for vehicle_id in order.vehicle_ids() {
            let vehicle = self.vehicles.get(&vehicle_id).ok_or_else(|| {
                AppError::Internal(format!("Order {} references missing vehicle {}", id, vehicle_id))
            })?;
            if let Some(status) = change.vehicle_status_after(vehicle.status)? {
                let mut vehicle = vehicle.clone();
                vehicle.status = status;
                vehicle.updated_at = now;
                vehicles.push(vehicle);
            }
        }

        if plan.consumes_dealer_stock {
            let location = StockLocation::dealer(order.dealer_id);
            let demand = aggregate_demand(order.lines.iter().map(|l| (l.key(), 1)))?;
            let available = self.book.snapshot(&location, demand.keys());
            let missing = shortfalls(&demand, &available);
            if !missing.is_empty() {
                return Err(AppError::InsufficientStock(missing));
            }
            for (key, quantity) in &demand {
                self.book.reserve(&location, key, *quantity)?;
            }
        }

        for vehicle in vehicles {
            self.vehicles.insert(vehicle.id, vehicle);
        }
        order.status = plan.status;
        if plan.cancellation_reason.is_some() {
            order.cancellation_reason = plan.cancellation_reason;
        }
        order.updated_at = now;
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn insert_dealer(&self, dealer: Dealer) -> AppResult<Dealer> {
        let mut state = self.state.lock();
        if state.dealers.values().any(|d| d.code == dealer.code) {
            return Err(AppError::Conflict {
                resource: "code".to_string(),
                message: format!("Dealer code {} is already in use", dealer.code),
            });
        }
        state.dealers.insert(dealer.id, dealer.clone());
        Ok(dealer)
    }

    async fn get_dealer(&self, id: Uuid) -> AppResult<Option<Dealer>> {
        Ok(self.state.lock().dealers.get(&id).cloned())
    }

    async fn list_dealers(&self) -> AppResult<Vec<Dealer>> {
        let mut dealers: Vec<Dealer> = self.state.lock().dealers.values().cloned().collect();
        dealers.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(dealers)
    }

    async fn insert_variant(&self, variant: Variant) -> AppResult<Variant> {
        self.state.lock().variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    async fn get_variant(&self, id: Uuid) -> AppResult<Option<Variant>> {
        Ok(self.state.lock().variants.get(&id).cloned())
    }

    async fn list_variants(&self) -> AppResult<Vec<Variant>> {
        let mut variants: Vec<Variant> = self.state.lock().variants.values().cloned().collect();
        variants.sort_by(|a, b| (&a.model, &a.trim).cmp(&(&b.model, &b.trim)));
        Ok(variants)
    }

    async fn update_variant_price(&self, id: Uuid, price: Decimal, now: DateTime<Utc>) -> AppResult<Variant> {
        let mut state = self.state.lock();
        let variant = state
            .variants
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Variant".to_string()))?;
        variant.price = price;
        variant.updated_at = now;
        Ok(variant.clone())
    }

    async fn stock_level(&self, location: StockLocation, key: &StockKey) -> AppResult<i64> {
        Ok(self.state.lock().book.quantity(&location, key))
    }

    async fn list_inventory(&self, location: Option<StockLocation>) -> AppResult<Vec<InventoryRecord>> {
        Ok(self.state.lock().book.records(location.as_ref()))
    }

    async fn reserve(&self, location: StockLocation, key: &StockKey, quantity: i64) -> AppResult<InventoryRecord> {
        let mut state = self.state.lock();
        state.book.reserve(&location, key, quantity)?;
        Ok(record(&state.book, location, key))
    }

    async fn credit(&self, location: StockLocation, key: &StockKey, quantity: i64) -> AppResult<InventoryRecord> {
        let mut state = self.state.lock();
        state.book.credit(&location, key, quantity)?;
        Ok(record(&state.book, location, key))
    }

    async fn transfer(&self, movement: &StockMovement) -> AppResult<Vec<InventoryRecord>> {
        let mut state = self.state.lock();
        state.book.transfer(movement)?;
        Ok(vec![
            record(&state.book, movement.from, &movement.key),
            record(&state.book, movement.to, &movement.key),
        ])
    }

    async fn insert_request(
        &self,
        request: DistributionRequest,
        created: RequestHistoryEntry,
    ) -> AppResult<DistributionRequest> {
        let mut state = self.state.lock();
        state.requests.insert(request.id, request.clone());
        state.history.push(created);
        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<DistributionRequest>> {
        Ok(self.state.lock().requests.get(&id).cloned())
    }

    async fn list_requests(&self, filter: RequestFilter) -> AppResult<Vec<DistributionRequest>> {
        let mut requests: Vec<DistributionRequest> = self
            .state
            .lock()
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        Ok(requests)
    }

    async fn request_history(&self, id: Uuid) -> AppResult<Vec<RequestHistoryEntry>> {
        Ok(self
            .state
            .lock()
            .history
            .iter()
            .filter(|e| e.request_id == id)
            .cloned()
            .collect())
    }

    async fn transition_request(
        &self,
        id: Uuid,
        action: RequestAction,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<DistributionRequest> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut request = state
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Distribution request".to_string()))?;
        let from = request.status;

        let next = match action {
            RequestAction::Allocate | RequestAction::Recall => {
                let keys = request_keys(&request);
                let plan = if action == RequestAction::Allocate {
                    let snapshot = state.book.snapshot(&StockLocation::Manufacturer, &keys);
                    plan_allocation(&request, &snapshot)?
                } else {
                    let snapshot = state.book.snapshot(&StockLocation::dealer(request.dealer_id), &keys);
                    plan_recall(&request, &snapshot)?
                };
                state.book.apply_all(&plan.movements)?;
                plan.next_status
            }
            _ => from.apply(action)?,
        };

        request.status = next;
        request.updated_at = now;
        state.history.push(history_entry(&request, from, action, actor_id, now));
        state.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn insert_order(&self, order: Order) -> AppResult<Order> {
        let mut state = self.state.lock();
        for line in &order.lines {
            let vehicle = state
                .vehicles
                .get(&line.vehicle_id)
                .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))?;
            ensure_orderable(vehicle, order.dealer_id, state.on_active_order(vehicle.id))?;
        }
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.state.lock().orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: OrderFilter) -> AppResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_payments(&self, order_id: Uuid) -> AppResult<Vec<Payment>> {
        Ok(self
            .state
            .lock()
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn record_payment(&self, draft: PaymentDraft, now: DateTime<Utc>) -> AppResult<PaymentReceipt> {
        let mut state = self.state.lock();
        let mut order = state.order(draft.order_id)?;

        let key = draft.idempotency_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
        if let Some(key) = key {
            let earlier = state
                .payments
                .iter()
                .find(|p| p.order_id == order.id && p.idempotency_key.as_deref() == Some(key));
            if let Some(payment) = earlier {
                return Ok(PaymentReceipt {
                    payment: payment.clone(),
                    order,
                    replayed: true,
                });
            }
        }

        ensure_accepts_payment(&order)?;
        let payment = Payment::record(draft, now)?;
        let paid = paid_after(&order, payment.amount)?;
        state.payments.push(payment.clone());

        order.paid_amount = paid;
        order.status = status_after_payment(order.total_price, order.paid_amount, payment.payment_type);
        order.updated_at = now;
        state.orders.insert(order.id, order.clone());

        Ok(PaymentReceipt {
            payment,
            order,
            replayed: false,
        })
    }

    async fn set_order_status(
        &self,
        id: Uuid,
        expected: Option<OrderStatus>,
        target: OrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Order> {
        let mut state = self.state.lock();
        let mut order = state.order(id)?;

        match guard_status_change(&order, expected, target)? {
            StatusDirective::Set(status) => {
                order.status = status;
                order.updated_at = now;
                state.orders.insert(id, order.clone());
                Ok(order)
            }
            StatusDirective::Delivery(change) => state.apply_order_change(id, &change, now),
        }
    }

    async fn apply_order_change(&self, id: Uuid, change: &OrderChange, now: DateTime<Utc>) -> AppResult<Order> {
        self.state.lock().apply_order_change(id, change, now)
    }

    async fn insert_vehicle(&self, vehicle: Vehicle) -> AppResult<Vehicle> {
        let mut state = self.state.lock();
        if state.vehicles.values().any(|v| v.vin == vehicle.vin) {
            return Err(AppError::Conflict {
                resource: "vin".to_string(),
                message: format!("Vehicle {} is already registered", vehicle.vin),
            });
        }
        state.vehicles.insert(vehicle.id, vehicle.clone());
        Ok(vehicle)
    }

    async fn get_vehicle(&self, id: Uuid) -> AppResult<Option<Vehicle>> {
        Ok(self.state.lock().vehicles.get(&id).cloned())
    }

    async fn list_vehicles(&self, filter: VehicleFilter) -> AppResult<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = self
            .state
            .lock()
            .vehicles
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        vehicles.sort_by(|a, b| a.vin.cmp(&b.vin));
        Ok(vehicles)
    }

    async fn transition_vehicle(
        &self,
        id: Uuid,
        action: VehicleAction,
        dealer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vehicle> {
        let mut state = self.state.lock();
        let on_active_order = state.on_active_order(id);
        let vehicle = state
            .vehicles
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))?;

        let next = vehicle.next_status(action, on_active_order)?;
        if action == VehicleAction::AssignToDealer {
            let dealer_id =
                dealer_id.ok_or_else(|| AppError::validation("dealer_id", "A dealer is required"))?;
            vehicle.dealer_id = Some(dealer_id);
        }
        vehicle.status = next;
        vehicle.updated_at = now;
        Ok(vehicle.clone())
    }
}
