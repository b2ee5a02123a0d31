//! PostgreSQL workflow store
//!
//! Every mutating method is one transaction. The request or order row is
//! locked first with `FOR UPDATE`, inventory rows are then locked manufacturer
//! side first and in `(variant, color)` order, and quantities only ever move
//! through conditional updates. A rolled-back transaction leaves nothing behind.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::allocation::{plan_allocation, plan_recall, request_keys};
use shared::ledger::{aggregate_demand, ensure_positive_quantity, shortfalls};
use shared::{
    ensure_accepts_payment, ensure_orderable, guard_status_change, paid_after, status_after_payment,
    Dealer, DistributionRequest, InventoryRecord, Order, OrderChange, OrderLine, OrderStatus, Payment,
    PaymentDraft, PaymentReceipt, RequestAction, RequestHistoryEntry, RequestLine, Shortfall,
    StatusDirective, StockKey, StockLocation, StockMovement, Variant, Vehicle, VehicleAction,
    WorkflowError,
};

use super::{history_entry, OrderFilter, RequestFilter, VehicleFilter, WorkflowStore};
use crate::error::{AppError, AppResult};

/// Workflow store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresStore {
    db: PgPool,
}

impl PostgresStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Parse a status-like column written by this store
fn parse<T>(column: &str, value: &str) -> AppResult<T>
where
    T: FromStr<Err = WorkflowError>,
{
    value
        .parse()
        .map_err(|_| AppError::Internal(format!("Unrecognized {} '{}' in database", column, value)))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct DealerRow {
    id: Uuid,
    code: String,
    name: String,
    address: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DealerRow> for Dealer {
    fn from(row: DealerRow) -> Self {
        Dealer {
            id: row.id,
            code: row.code,
            name: row.name,
            address: row.address,
            phone: row.phone,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct VariantRow {
    id: Uuid,
    model: String,
    trim_name: String,
    price: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Variant {
            id: row.id,
            model: row.model,
            trim: row.trim_name,
            price: row.price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InventoryRow {
    dealer_id: Option<Uuid>,
    variant_id: Uuid,
    color: String,
    quantity: i64,
}

impl From<InventoryRow> for InventoryRecord {
    fn from(row: InventoryRow) -> Self {
        let location = match row.dealer_id {
            Some(dealer_id) => StockLocation::dealer(dealer_id),
            None => StockLocation::Manufacturer,
        };
        InventoryRecord {
            location,
            variant_id: row.variant_id,
            color: row.color,
            quantity: row.quantity,
        }
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    dealer_id: Uuid,
    requested_by: Uuid,
    request_date: DateTime<Utc>,
    required_date: NaiveDate,
    priority: String,
    status: String,
    total_amount: Decimal,
    note: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct RequestLineRow {
    request_id: Uuid,
    variant_id: Uuid,
    color: String,
    quantity: i64,
    unit_price: Decimal,
    line_total: Decimal,
}

impl RequestRow {
    fn into_request(self, lines: Vec<RequestLine>) -> AppResult<DistributionRequest> {
        Ok(DistributionRequest {
            id: self.id,
            dealer_id: self.dealer_id,
            requested_by: self.requested_by,
            request_date: self.request_date,
            required_date: self.required_date,
            priority: parse("priority", &self.priority)?,
            status: parse("request status", &self.status)?,
            lines,
            total_amount: self.total_amount,
            note: self.note,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    request_id: Uuid,
    from_status: Option<String>,
    to_status: String,
    action: String,
    actor_id: Uuid,
    at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> AppResult<RequestHistoryEntry> {
        Ok(RequestHistoryEntry {
            request_id: self.request_id,
            from_status: self
                .from_status
                .as_deref()
                .map(|s| parse("request status", s))
                .transpose()?,
            to_status: parse("request status", &self.to_status)?,
            action: self.action,
            actor_id: self.actor_id,
            at: self.at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    dealer_id: Uuid,
    customer_id: Option<Uuid>,
    total_price: Decimal,
    paid_amount: Decimal,
    status: String,
    cancellation_reason: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderLineRow {
    order_id: Uuid,
    vehicle_id: Uuid,
    variant_id: Uuid,
    color: String,
    unit_price: Decimal,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> AppResult<Order> {
        Ok(Order {
            id: self.id,
            dealer_id: self.dealer_id,
            customer_id: self.customer_id,
            lines,
            total_price: self.total_price,
            paid_amount: self.paid_amount,
            status: parse("order status", &self.status)?,
            cancellation_reason: self.cancellation_reason,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    amount: Decimal,
    method: String,
    payment_type: String,
    idempotency_key: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> AppResult<Payment> {
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            amount: self.amount,
            method: parse("payment method", &self.method)?,
            payment_type: parse("payment type", &self.payment_type)?,
            idempotency_key: self.idempotency_key,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct VehicleRow {
    id: Uuid,
    vin: String,
    variant_id: Uuid,
    color: String,
    dealer_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VehicleRow {
    fn into_vehicle(self) -> AppResult<Vehicle> {
        Ok(Vehicle {
            id: self.id,
            vin: self.vin,
            variant_id: self.variant_id,
            color: self.color,
            dealer_id: self.dealer_id,
            status: parse("vehicle status", &self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const REQUEST_COLUMNS: &str = "id, dealer_id, requested_by, request_date, required_date, priority, \
                               status, total_amount, note, updated_at";
const ORDER_COLUMNS: &str = "id, dealer_id, customer_id, total_price, paid_amount, status, \
                             cancellation_reason, created_by, created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, method, payment_type, idempotency_key, created_by, created_at";
const VEHICLE_COLUMNS: &str = "id, vin, variant_id, color, dealer_id, status, created_at, updated_at";

// ============================================================================
// Inventory primitives (run inside a caller's transaction)
// ============================================================================

async fn current_quantity(conn: &mut PgConnection, location: StockLocation, key: &StockKey) -> AppResult<i64> {
    let quantity = match location {
        StockLocation::Manufacturer => {
            sqlx::query_scalar::<_, i64>(
                "SELECT quantity FROM manufacturer_inventory WHERE variant_id = $1 AND color = $2",
            )
            .bind(key.variant_id)
            .bind(&key.color)
            .fetch_optional(&mut *conn)
            .await?
        }
        StockLocation::Dealer { dealer_id } => {
            sqlx::query_scalar::<_, i64>(
                "SELECT quantity FROM dealer_inventory \
                 WHERE dealer_id = $1 AND variant_id = $2 AND color = $3",
            )
            .bind(dealer_id)
            .bind(key.variant_id)
            .bind(&key.color)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(quantity.unwrap_or(0))
}

/// Lock the existing records for `keys` at `location` and return their quantities
async fn lock_quantities(
    conn: &mut PgConnection,
    location: StockLocation,
    keys: &[StockKey],
) -> AppResult<HashMap<StockKey, i64>> {
    let mut sorted = keys.to_vec();
    sorted.sort();

    let mut snapshot = HashMap::with_capacity(sorted.len());
    for key in sorted {
        let quantity = match location {
            StockLocation::Manufacturer => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT quantity FROM manufacturer_inventory \
                     WHERE variant_id = $1 AND color = $2 FOR UPDATE",
                )
                .bind(key.variant_id)
                .bind(&key.color)
                .fetch_optional(&mut *conn)
                .await?
            }
            StockLocation::Dealer { dealer_id } => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT quantity FROM dealer_inventory \
                     WHERE dealer_id = $1 AND variant_id = $2 AND color = $3 FOR UPDATE",
                )
                .bind(dealer_id)
                .bind(key.variant_id)
                .bind(&key.color)
                .fetch_optional(&mut *conn)
                .await?
            }
        };
        snapshot.insert(key, quantity.unwrap_or(0));
    }
    Ok(snapshot)
}

/// Lock both sides of a set of movements, manufacturer side first
async fn lock_movements(conn: &mut PgConnection, movements: &[StockMovement]) -> AppResult<()> {
    let mut by_location: Vec<(StockLocation, Vec<StockKey>)> = Vec::new();
    for movement in movements {
        for location in [movement.from, movement.to] {
            match by_location.iter_mut().find(|(l, _)| *l == location) {
                Some((_, keys)) => keys.push(movement.key.clone()),
                None => by_location.push((location, vec![movement.key.clone()])),
            }
        }
    }
    by_location.sort_by(|a, b| a.0.cmp(&b.0));

    for (location, keys) in by_location {
        lock_quantities(conn, location, &keys).await?;
    }
    Ok(())
}

/// Conditional decrement; fails with the shortfall and changes nothing
async fn take_stock(
    conn: &mut PgConnection,
    location: StockLocation,
    key: &StockKey,
    quantity: i64,
) -> AppResult<i64> {
    ensure_positive_quantity(quantity)?;
    let remaining = match location {
        StockLocation::Manufacturer => {
            sqlx::query_scalar::<_, i64>(
                "UPDATE manufacturer_inventory SET quantity = quantity - $3 \
                 WHERE variant_id = $1 AND color = $2 AND quantity >= $3 \
                 RETURNING quantity",
            )
            .bind(key.variant_id)
            .bind(&key.color)
            .bind(quantity)
            .fetch_optional(&mut *conn)
            .await?
        }
        StockLocation::Dealer { dealer_id } => {
            sqlx::query_scalar::<_, i64>(
                "UPDATE dealer_inventory SET quantity = quantity - $4 \
                 WHERE dealer_id = $1 AND variant_id = $2 AND color = $3 AND quantity >= $4 \
                 RETURNING quantity",
            )
            .bind(dealer_id)
            .bind(key.variant_id)
            .bind(&key.color)
            .bind(quantity)
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    match remaining {
        Some(remaining) => Ok(remaining),
        None => {
            let available = current_quantity(conn, location, key).await?;
            Err(AppError::InsufficientStock(vec![Shortfall::new(
                key.variant_id,
                key.color.clone(),
                quantity,
                available,
            )]))
        }
    }
}

/// Upsert increment; creates the record when absent
async fn add_stock(
    conn: &mut PgConnection,
    location: StockLocation,
    key: &StockKey,
    quantity: i64,
) -> AppResult<i64> {
    ensure_positive_quantity(quantity)?;
    let total = match location {
        StockLocation::Manufacturer => {
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO manufacturer_inventory (variant_id, color, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (variant_id, color)
                DO UPDATE SET quantity = manufacturer_inventory.quantity + EXCLUDED.quantity
                RETURNING quantity
                "#,
            )
            .bind(key.variant_id)
            .bind(&key.color)
            .bind(quantity)
            .fetch_one(&mut *conn)
            .await?
        }
        StockLocation::Dealer { dealer_id } => {
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO dealer_inventory (dealer_id, variant_id, color, quantity)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (dealer_id, variant_id, color)
                DO UPDATE SET quantity = dealer_inventory.quantity + EXCLUDED.quantity
                RETURNING quantity
                "#,
            )
            .bind(dealer_id)
            .bind(key.variant_id)
            .bind(&key.color)
            .bind(quantity)
            .fetch_one(&mut *conn)
            .await?
        }
    };
    Ok(total)
}

async fn apply_movements(conn: &mut PgConnection, movements: &[StockMovement]) -> AppResult<()> {
    for movement in movements {
        take_stock(conn, movement.from, &movement.key, movement.quantity).await?;
        add_stock(conn, movement.to, &movement.key, movement.quantity).await?;
    }
    Ok(())
}

// ============================================================================
// Aggregate loaders
// ============================================================================

async fn load_request_lines(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<RequestLine>>> {
    let rows = sqlx::query_as::<_, RequestLineRow>(
        r#"
        SELECT request_id, variant_id, color, quantity, unit_price, line_total
        FROM request_lines
        WHERE request_id = ANY($1)
        ORDER BY request_id, line_no
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<Uuid, Vec<RequestLine>> = HashMap::new();
    for row in rows {
        lines.entry(row.request_id).or_default().push(RequestLine {
            variant_id: row.variant_id,
            color: row.color,
            quantity: row.quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
        });
    }
    Ok(lines)
}

async fn assemble_requests(conn: &mut PgConnection, rows: Vec<RequestRow>) -> AppResult<Vec<DistributionRequest>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut lines = load_request_lines(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let request_lines = lines.remove(&row.id).unwrap_or_default();
            row.into_request(request_lines)
        })
        .collect()
}

async fn fetch_request(conn: &mut PgConnection, id: Uuid, for_update: bool) -> AppResult<Option<DistributionRequest>> {
    let sql = format!(
        "SELECT {} FROM distribution_requests WHERE id = $1{}",
        REQUEST_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(assemble_requests(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn load_order_lines(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<OrderLine>>> {
    let rows = sqlx::query_as::<_, OrderLineRow>(
        r#"
        SELECT order_id, vehicle_id, variant_id, color, unit_price
        FROM order_lines
        WHERE order_id = ANY($1)
        ORDER BY order_id, line_no
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
    for row in rows {
        lines.entry(row.order_id).or_default().push(OrderLine {
            vehicle_id: row.vehicle_id,
            variant_id: row.variant_id,
            color: row.color,
            unit_price: row.unit_price,
        });
    }
    Ok(lines)
}

async fn assemble_orders(conn: &mut PgConnection, rows: Vec<OrderRow>) -> AppResult<Vec<Order>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut lines = load_order_lines(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let order_lines = lines.remove(&row.id).unwrap_or_default();
            row.into_order(order_lines)
        })
        .collect()
}

async fn fetch_order(conn: &mut PgConnection, id: Uuid, for_update: bool) -> AppResult<Option<Order>> {
    let sql = format!(
        "SELECT {} FROM orders WHERE id = $1{}",
        ORDER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(assemble_orders(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn on_active_order(conn: &mut PgConnection, vehicle_id: Uuid) -> AppResult<bool> {
    let claimed = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM order_lines ol
            JOIN orders o ON o.id = ol.order_id
            WHERE ol.vehicle_id = $1 AND o.status NOT IN ('COMPLETED', 'CANCELLED')
        )
        "#,
    )
    .bind(vehicle_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(claimed)
}

async fn fetch_vehicle(conn: &mut PgConnection, id: Uuid, for_update: bool) -> AppResult<Option<Vehicle>> {
    let sql = format!(
        "SELECT {} FROM vehicles WHERE id = $1{}",
        VEHICLE_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, VehicleRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(VehicleRow::into_vehicle)
        .transpose()
}

async fn insert_history(conn: &mut PgConnection, entry: &RequestHistoryEntry) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO request_history (request_id, from_status, to_status, action, actor_id, at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.request_id)
    .bind(entry.from_status.map(|s| s.as_str()))
    .bind(entry.to_status.as_str())
    .bind(&entry.action)
    .bind(entry.actor_id)
    .bind(entry.at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Run a delivery-pipeline change on an order already locked by the caller
async fn apply_change(
    conn: &mut PgConnection,
    mut order: Order,
    change: &OrderChange,
    now: DateTime<Utc>,
) -> AppResult<Order> {
    let plan = order.plan(change)?;

    let vehicle_ids = order.vehicle_ids();
    let rows = sqlx::query_as::<_, VehicleRow>(&format!(
        "SELECT {} FROM vehicles WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        VEHICLE_COLUMNS
    ))
    .bind(&vehicle_ids)
    .fetch_all(&mut *conn)
    .await?;
    if rows.len() != vehicle_ids.len() {
        return Err(AppError::Internal(format!(
            "Order {} references missing vehicles",
            order.id
        )));
    }

    let mut updates = Vec::with_capacity(rows.len());
    for row in rows {
        let vehicle = row.into_vehicle()?;
        if let Some(status) = change.vehicle_status_after(vehicle.status)? {
            updates.push((vehicle.id, status));
        }
    }

    if plan.consumes_dealer_stock {
        let location = StockLocation::dealer(order.dealer_id);
        let demand = aggregate_demand(order.lines.iter().map(|l| (l.key(), 1)))?;
        let keys: Vec<StockKey> = demand.keys().cloned().collect();
        let available = lock_quantities(conn, location, &keys).await?;
        let missing = shortfalls(&demand, &available);
        if !missing.is_empty() {
            return Err(AppError::InsufficientStock(missing));
        }
        for (key, quantity) in &demand {
            take_stock(conn, location, key, *quantity).await?;
        }
    }

    for (vehicle_id, status) in updates {
        sqlx::query("UPDATE vehicles SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(vehicle_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }

    if plan.cancellation_reason.is_some() {
        order.cancellation_reason = plan.cancellation_reason;
    }
    order.status = plan.status;
    order.updated_at = now;

    sqlx::query(
        "UPDATE orders SET status = $2, cancellation_reason = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(order.id)
    .bind(order.status.as_str())
    .bind(&order.cancellation_reason)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(order)
}

fn location_record(location: StockLocation, key: &StockKey, quantity: i64) -> InventoryRecord {
    InventoryRecord::new(location, key.clone(), quantity)
}

#[async_trait]
impl WorkflowStore for PostgresStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn insert_dealer(&self, dealer: Dealer) -> AppResult<Dealer> {
        let row = sqlx::query_as::<_, DealerRow>(
            r#"
            INSERT INTO dealers (id, code, name, address, phone, email, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, code, name, address, phone, email, created_at
            "#,
        )
        .bind(dealer.id)
        .bind(&dealer.code)
        .bind(&dealer.name)
        .bind(&dealer.address)
        .bind(&dealer.phone)
        .bind(&dealer.email)
        .bind(dealer.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn get_dealer(&self, id: Uuid) -> AppResult<Option<Dealer>> {
        let row = sqlx::query_as::<_, DealerRow>(
            "SELECT id, code, name, address, phone, email, created_at FROM dealers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_dealers(&self) -> AppResult<Vec<Dealer>> {
        let rows = sqlx::query_as::<_, DealerRow>(
            "SELECT id, code, name, address, phone, email, created_at FROM dealers ORDER BY code",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_variant(&self, variant: Variant) -> AppResult<Variant> {
        let row = sqlx::query_as::<_, VariantRow>(
            r#"
            INSERT INTO variants (id, model, trim_name, price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, model, trim_name, price, created_at, updated_at
            "#,
        )
        .bind(variant.id)
        .bind(&variant.model)
        .bind(&variant.trim)
        .bind(variant.price)
        .bind(variant.created_at)
        .bind(variant.updated_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn get_variant(&self, id: Uuid) -> AppResult<Option<Variant>> {
        let row = sqlx::query_as::<_, VariantRow>(
            "SELECT id, model, trim_name, price, created_at, updated_at FROM variants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_variants(&self) -> AppResult<Vec<Variant>> {
        let rows = sqlx::query_as::<_, VariantRow>(
            "SELECT id, model, trim_name, price, created_at, updated_at FROM variants \
             ORDER BY model, trim_name",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_variant_price(&self, id: Uuid, price: Decimal, now: DateTime<Utc>) -> AppResult<Variant> {
        let row = sqlx::query_as::<_, VariantRow>(
            r#"
            UPDATE variants SET price = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, model, trim_name, price, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(price)
        .bind(now)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Variant".to_string()))?;
        Ok(row.into())
    }

    async fn stock_level(&self, location: StockLocation, key: &StockKey) -> AppResult<i64> {
        let mut conn = self.db.acquire().await?;
        current_quantity(&mut conn, location, key).await
    }

    async fn list_inventory(&self, location: Option<StockLocation>) -> AppResult<Vec<InventoryRecord>> {
        let manufacturer_sql = "SELECT NULL::uuid AS dealer_id, variant_id, color, quantity \
                                FROM manufacturer_inventory ORDER BY variant_id, color";

        let rows = match location {
            Some(StockLocation::Manufacturer) => {
                sqlx::query_as::<_, InventoryRow>(manufacturer_sql)
                    .fetch_all(&self.db)
                    .await?
            }
            Some(StockLocation::Dealer { dealer_id }) => {
                sqlx::query_as::<_, InventoryRow>(
                    "SELECT dealer_id, variant_id, color, quantity FROM dealer_inventory \
                     WHERE dealer_id = $1 ORDER BY variant_id, color",
                )
                .bind(dealer_id)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                let mut rows = sqlx::query_as::<_, InventoryRow>(manufacturer_sql)
                    .fetch_all(&self.db)
                    .await?;
                rows.extend(
                    sqlx::query_as::<_, InventoryRow>(
                        "SELECT dealer_id, variant_id, color, quantity FROM dealer_inventory \
                         ORDER BY dealer_id, variant_id, color",
                    )
                    .fetch_all(&self.db)
                    .await?,
                );
                rows
            }
        };
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reserve(&self, location: StockLocation, key: &StockKey, quantity: i64) -> AppResult<InventoryRecord> {
        let mut tx = self.db.begin().await?;
        let remaining = take_stock(&mut tx, location, key, quantity).await?;
        tx.commit().await?;
        Ok(location_record(location, key, remaining))
    }

    async fn credit(&self, location: StockLocation, key: &StockKey, quantity: i64) -> AppResult<InventoryRecord> {
        let mut tx = self.db.begin().await?;
        let total = add_stock(&mut tx, location, key, quantity).await?;
        tx.commit().await?;
        Ok(location_record(location, key, total))
    }

    async fn transfer(&self, movement: &StockMovement) -> AppResult<Vec<InventoryRecord>> {
        let mut tx = self.db.begin().await?;
        lock_movements(&mut tx, std::slice::from_ref(movement)).await?;
        let remaining = take_stock(&mut tx, movement.from, &movement.key, movement.quantity).await?;
        let total = add_stock(&mut tx, movement.to, &movement.key, movement.quantity).await?;
        tx.commit().await?;
        Ok(vec![
            location_record(movement.from, &movement.key, remaining),
            location_record(movement.to, &movement.key, total),
        ])
    }

    async fn insert_request(
        &self,
        request: DistributionRequest,
        created: RequestHistoryEntry,
    ) -> AppResult<DistributionRequest> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO distribution_requests (
                id, dealer_id, requested_by, request_date, required_date, priority,
                status, total_amount, note, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(request.dealer_id)
        .bind(request.requested_by)
        .bind(request.request_date)
        .bind(request.required_date)
        .bind(request.priority.as_str())
        .bind(request.status.as_str())
        .bind(request.total_amount)
        .bind(&request.note)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in request.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO request_lines (
                    request_id, line_no, variant_id, color, quantity, unit_price, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(request.id)
            .bind(line_no as i32)
            .bind(line.variant_id)
            .bind(&line.color)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total)
            .execute(&mut *tx)
            .await?;
        }

        insert_history(&mut tx, &created).await?;
        tx.commit().await?;

        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<DistributionRequest>> {
        let mut conn = self.db.acquire().await?;
        fetch_request(&mut conn, id, false).await
    }

    async fn list_requests(&self, filter: RequestFilter) -> AppResult<Vec<DistributionRequest>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM distribution_requests \
             WHERE ($1::uuid IS NULL OR dealer_id = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY request_date DESC",
            REQUEST_COLUMNS
        ))
        .bind(filter.dealer_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await?;
        assemble_requests(&mut conn, rows).await
    }

    async fn request_history(&self, id: Uuid) -> AppResult<Vec<RequestHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT request_id, from_status, to_status, action, actor_id, at
            FROM request_history
            WHERE request_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    async fn transition_request(
        &self,
        id: Uuid,
        action: RequestAction,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<DistributionRequest> {
        let mut tx = self.db.begin().await?;

        let mut request = fetch_request(&mut tx, id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Distribution request".to_string()))?;
        let from = request.status;

        let next = match action {
            RequestAction::Allocate | RequestAction::Recall => {
                // Reject a wrong status before touching inventory rows
                from.apply(action)?;

                let keys = request_keys(&request);
                let dealer = StockLocation::dealer(request.dealer_id);
                let manufacturer_stock = lock_quantities(&mut tx, StockLocation::Manufacturer, &keys).await?;
                let dealer_stock = lock_quantities(&mut tx, dealer, &keys).await?;

                let plan = if action == RequestAction::Allocate {
                    plan_allocation(&request, &manufacturer_stock)?
                } else {
                    plan_recall(&request, &dealer_stock)?
                };
                apply_movements(&mut tx, &plan.movements).await?;
                plan.next_status
            }
            _ => from.apply(action)?,
        };

        request.status = next;
        request.updated_at = now;

        sqlx::query("UPDATE distribution_requests SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(next.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        insert_history(&mut tx, &history_entry(&request, from, action, actor_id, now)).await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn insert_order(&self, order: Order) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;

        let mut vehicle_ids = order.vehicle_ids();
        vehicle_ids.sort();
        for vehicle_id in vehicle_ids {
            let vehicle = fetch_vehicle(&mut tx, vehicle_id, true)
                .await?
                .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))?;
            let claimed = on_active_order(&mut tx, vehicle_id).await?;
            ensure_orderable(&vehicle, order.dealer_id, claimed)?;
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, dealer_id, customer_id, total_price, paid_amount, status,
                cancellation_reason, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.dealer_id)
        .bind(order.customer_id)
        .bind(order.total_price)
        .bind(order.paid_amount)
        .bind(order.status.as_str())
        .bind(&order.cancellation_reason)
        .bind(order.created_by)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, vehicle_id, variant_id, color, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id)
            .bind(line_no as i32)
            .bind(line.vehicle_id)
            .bind(line.variant_id)
            .bind(&line.color)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        let mut conn = self.db.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn list_orders(&self, filter: OrderFilter) -> AppResult<Vec<Order>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders \
             WHERE ($1::uuid IS NULL OR dealer_id = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(filter.dealer_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await?;
        assemble_orders(&mut conn, rows).await
    }

    async fn list_payments(&self, order_id: Uuid) -> AppResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    async fn record_payment(&self, draft: PaymentDraft, now: DateTime<Utc>) -> AppResult<PaymentReceipt> {
        let mut tx = self.db.begin().await?;

        let mut order = fetch_order(&mut tx, draft.order_id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let key = draft
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        if let Some(key) = key {
            let earlier = sqlx::query_as::<_, PaymentRow>(&format!(
                "SELECT {} FROM payments WHERE order_id = $1 AND idempotency_key = $2",
                PAYMENT_COLUMNS
            ))
            .bind(order.id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = earlier {
                return Ok(PaymentReceipt {
                    payment: row.into_payment()?,
                    order,
                    replayed: true,
                });
            }
        }

        ensure_accepts_payment(&order)?;
        let payment = Payment::record(draft, now)?;
        paid_after(&order, payment.amount)?;

        // A key committed by a racing transaction turns this post into a replay
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, amount, method, payment_type, idempotency_key, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(payment.payment_type.as_str())
        .bind(&payment.idempotency_key)
        .bind(payment.created_by)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let existing = sqlx::query_as::<_, PaymentRow>(&format!(
                "SELECT {} FROM payments WHERE order_id = $1 AND idempotency_key = $2",
                PAYMENT_COLUMNS
            ))
            .bind(order.id)
            .bind(&payment.idempotency_key)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(PaymentReceipt {
                payment: existing.into_payment()?,
                order,
                replayed: true,
            });
        }

        // Summed under the order lock, so every committed payment is counted
        let paid = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE order_id = $1",
        )
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?;

        order.paid_amount = paid;
        order.status = status_after_payment(order.total_price, paid, payment.payment_type);
        order.updated_at = now;

        sqlx::query("UPDATE orders SET paid_amount = $2, status = $3, updated_at = $4 WHERE id = $1")
            .bind(order.id)
            .bind(order.paid_amount)
            .bind(order.status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

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
        let mut tx = self.db.begin().await?;

        let mut order = fetch_order(&mut tx, id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let order = match guard_status_change(&order, expected, target)? {
            StatusDirective::Set(status) => {
                sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
                    .bind(id)
                    .bind(status.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                order.status = status;
                order.updated_at = now;
                order
            }
            StatusDirective::Delivery(change) => apply_change(&mut tx, order, &change, now).await?,
        };

        tx.commit().await?;
        Ok(order)
    }

    async fn apply_order_change(&self, id: Uuid, change: &OrderChange, now: DateTime<Utc>) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;

        let order = fetch_order(&mut tx, id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
        let order = apply_change(&mut tx, order, change, now).await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn insert_vehicle(&self, vehicle: Vehicle) -> AppResult<Vehicle> {
        let row = sqlx::query_as::<_, VehicleRow>(&format!(
            r#"
            INSERT INTO vehicles (id, vin, variant_id, color, dealer_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            VEHICLE_COLUMNS
        ))
        .bind(vehicle.id)
        .bind(&vehicle.vin)
        .bind(vehicle.variant_id)
        .bind(&vehicle.color)
        .bind(vehicle.dealer_id)
        .bind(vehicle.status.as_str())
        .bind(vehicle.created_at)
        .bind(vehicle.updated_at)
        .fetch_one(&self.db)
        .await?;
        row.into_vehicle()
    }

    async fn get_vehicle(&self, id: Uuid) -> AppResult<Option<Vehicle>> {
        let mut conn = self.db.acquire().await?;
        fetch_vehicle(&mut conn, id, false).await
    }

    async fn list_vehicles(&self, filter: VehicleFilter) -> AppResult<Vec<Vehicle>> {
        let rows = sqlx::query_as::<_, VehicleRow>(&format!(
            "SELECT {} FROM vehicles \
             WHERE ($1::uuid IS NULL OR dealer_id = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY vin",
            VEHICLE_COLUMNS
        ))
        .bind(filter.dealer_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(VehicleRow::into_vehicle).collect()
    }

    async fn transition_vehicle(
        &self,
        id: Uuid,
        action: VehicleAction,
        dealer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vehicle> {
        let mut tx = self.db.begin().await?;

        let mut vehicle = fetch_vehicle(&mut tx, id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))?;

        let claimed = on_active_order(&mut tx, id).await?;
        let next = vehicle.next_status(action, claimed)?;
        if action == VehicleAction::AssignToDealer {
            let dealer_id =
                dealer_id.ok_or_else(|| AppError::validation("dealer_id", "A dealer is required"))?;
            vehicle.dealer_id = Some(dealer_id);
        }
        vehicle.status = next;
        vehicle.updated_at = now;

        sqlx::query("UPDATE vehicles SET status = $2, dealer_id = $3, updated_at = $4 WHERE id = $1")
            .bind(vehicle.id)
            .bind(vehicle.status.as_str())
            .bind(vehicle.dealer_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(vehicle)
    }
}
