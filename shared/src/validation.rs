//! Validation utilities for the EV distribution platform

use rust_decimal::Decimal;

// ============================================================================
// Vehicle Validations
// ============================================================================

/// Validate a vehicle identification number (ISO 3779: 17 characters, no I, O or Q)
pub fn validate_vin(vin: &str) -> Result<(), &'static str> {
    if vin.len() != 17 {
        return Err("VIN must be exactly 17 characters");
    }
    if !vin.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("VIN must be uppercase alphanumeric");
    }
    if vin.chars().any(|c| matches!(c, 'I' | 'O' | 'Q')) {
        return Err("VIN cannot contain I, O or Q");
    }
    Ok(())
}

/// Normalize user-entered VINs before validation
pub fn normalize_vin(vin: &str) -> String {
    vin.trim().to_ascii_uppercase()
}

/// Validate a list or sale price
pub fn validate_price(price: Decimal) -> Result<(), &'static str> {
    if price <= Decimal::ZERO {
        return Err("Price must be positive");
    }
    Ok(())
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.contains('@') && email.contains('.') && email.len() >= 5 {
        Ok(())
    } else {
        Err("Invalid email format")
    }
}

/// Validate dealer code format (3-10 uppercase alphanumeric)
pub fn validate_dealer_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 3 {
        return Err("Dealer code must be at least 3 characters");
    }
    if code.len() > 10 {
        return Err("Dealer code must be at most 10 characters");
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("Dealer code must be uppercase alphanumeric only");
    }
    Ok(())
}

/// Validate a phone number: 9 to 15 digits, optional leading +, spaces and dashes allowed
pub fn validate_phone(phone: &str) -> Result<(), &'static str> {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    if !body.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
        return Err("Phone number contains invalid characters");
    }
    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    if !(9..=15).contains(&digits) {
        return Err("Phone number must have 9 to 15 digits");
    }
    Ok(())
}

/// Validate that a free-text field is not blank
pub fn validate_required(value: &str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        return Err("Value is required");
    }
    Ok(())
}
