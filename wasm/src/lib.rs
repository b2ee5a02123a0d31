//! WebAssembly module for the EV Distribution Platform dashboards
//!
//! Provides client-side previews for:
//! - Which request actions a status allows
//! - Order status after a payment is posted
//! - Low-stock flags
//! - VIN and dealer code checks before submission

use std::str::FromStr;

use rust_decimal::Decimal;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

fn js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

fn parse_amount(field: &str, value: &str) -> Result<Decimal, JsValue> {
    Decimal::from_str(value.trim()).map_err(|e| js_error(format!("Invalid {}: {}", field, e)))
}

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::debug_1(&JsValue::from_str("ev-distribution dashboard helpers loaded"));
}

fn action_names(status: &str) -> Result<Vec<&'static str>, shared::WorkflowError> {
    let status = RequestStatus::from_str(&status.trim().to_ascii_uppercase())?;
    Ok(status.allowed_actions().iter().map(|a| a.as_str()).collect())
}

/// Actions a distribution request in `status` accepts, as a JSON array of action names
#[wasm_bindgen]
pub fn request_actions(status: &str) -> Result<String, JsValue> {
    let actions = action_names(status).map_err(js_error)?;
    serde_json::to_string(&actions).map_err(js_error)
}

/// Same as `request_actions`, as a JS array for direct use in templates
#[wasm_bindgen]
pub fn request_action_list(status: &str) -> Result<js_sys::Array, JsValue> {
    let actions = action_names(status).map_err(js_error)?;
    Ok(actions.into_iter().map(JsValue::from_str).collect())
}

/// Status a request would reach after `action`, or an error naming the refused transition
#[wasm_bindgen]
pub fn preview_request_transition(status: &str, action: &str) -> Result<String, JsValue> {
    let status = RequestStatus::from_str(status.trim()).map_err(js_error)?;
    let action = RequestAction::from_str(action.trim()).map_err(js_error)?;
    let next = status.apply(action).map_err(js_error)?;
    Ok(next.to_string())
}

/// Order status right after a payment brings the paid amount to `paid`
#[wasm_bindgen]
pub fn preview_payment_status(total: &str, paid: &str, payment_type: &str) -> Result<String, JsValue> {
    let total = parse_amount("total", total)?;
    let paid = parse_amount("paid", paid)?;
    let payment_type = PaymentType::from_str(payment_type.trim()).map_err(js_error)?;

    Ok(status_after_payment(total, paid, payment_type).to_string())
}

/// Amount still owed on an order, never negative
#[wasm_bindgen]
pub fn outstanding_amount(total: &str, paid: &str) -> Result<String, JsValue> {
    let total = parse_amount("total", total)?;
    let paid = parse_amount("paid", paid)?;
    Ok((total - paid).max(Decimal::ZERO).to_string())
}

#[wasm_bindgen]
pub fn low_stock_flag(quantity: i64, threshold: i64) -> bool {
    is_low_stock(quantity, threshold)
}

/// Normalized VIN, or the reason it is rejected
#[wasm_bindgen]
pub fn check_vin(vin: &str) -> Result<String, JsValue> {
    let vin = normalize_vin(vin);
    validate_vin(&vin).map_err(js_error)?;
    Ok(vin)
}

#[wasm_bindgen]
pub fn check_dealer_code(code: &str) -> bool {
    validate_dealer_code(code.trim()).is_ok()
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn request_action_list_is_a_js_array() {
        let list = request_action_list("PENDING").unwrap();
        assert_eq!(list.length(), 3);
        assert_eq!(list.get(0).as_string().as_deref(), Some("approve"));
    }

    #[wasm_bindgen_test]
    fn unknown_status_is_reported() {
        assert!(request_action_list("LOST").is_err());
    }
}
