//! Route definitions for the EV Distribution Platform

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/dealers", dealer_routes())
        .nest("/variants", variant_routes())
        .nest("/inventory", inventory_routes())
        .nest("/requests", request_routes())
        .nest("/orders", order_routes())
        .nest("/vehicles", vehicle_routes())
}

fn dealer_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_dealers).post(handlers::create_dealer))
        .route("/:dealer_id", get(handlers::get_dealer))
}

fn variant_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_variants).post(handlers::create_variant))
        .route("/:variant_id", get(handlers::get_variant))
        .route("/:variant_id/price", put(handlers::update_variant_price))
}

/// Inventory ledger routes
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_inventory))
        .route("/low-stock", get(handlers::list_low_stock))
        .route("/level", get(handlers::get_stock_level))
        .route("/replenish", post(handlers::replenish_stock))
        .route("/reserve", post(handlers::reserve_stock))
        .route("/credit", post(handlers::credit_stock))
        .route("/transfer", post(handlers::transfer_stock))
        .route("/recall", post(handlers::recall_stock))
}

/// Distribution request lifecycle routes
fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_requests).post(handlers::create_request))
        .route("/:request_id", get(handlers::get_request))
        .route("/:request_id/history", get(handlers::get_request_history))
        .route("/:request_id/approve", post(handlers::approve_request))
        .route("/:request_id/reject", post(handlers::reject_request))
        .route("/:request_id/allocate", post(handlers::allocate_request))
        .route(
            "/:request_id/confirm-receipt",
            post(handlers::confirm_request_receipt),
        )
        .route("/:request_id/recall", post(handlers::recall_request))
        .route("/:request_id/cancel", post(handlers::cancel_request))
}

/// Order, payment and delivery routes
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_orders).post(handlers::create_order))
        .route("/:order_id", get(handlers::get_order))
        .route(
            "/:order_id/payments",
            get(handlers::list_payments).post(handlers::record_payment),
        )
        .route("/:order_id/status", put(handlers::set_order_status))
        .route("/:order_id/start-delivery", put(handlers::start_delivery))
        .route("/:order_id/complete-delivery", put(handlers::complete_delivery))
        .route("/:order_id/cancel", post(handlers::cancel_order))
}

fn vehicle_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_vehicles).post(handlers::register_vehicle))
        .route("/:vehicle_id", get(handlers::get_vehicle))
        .route("/:vehicle_id/assign", put(handlers::assign_vehicle))
        .route(
            "/:vehicle_id/test-drive",
            put(handlers::set_test_drive).delete(handlers::clear_test_drive),
        )
}
