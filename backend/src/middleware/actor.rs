//! Caller identity
//!
//! Token handling lives in the gateway in front of this service. The gateway
//! asserts who is calling through three headers, which this extractor turns
//! into an `Actor`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use shared::Actor;
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const STAFF_ROLE_HEADER: &str = "x-staff-role";
pub const DEALER_ID_HEADER: &str = "x-dealer-id";

/// Extractor for the calling staff member
#[derive(Clone, Copy, Debug)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CurrentActor)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    header(headers, name)
        .map(|v| {
            Uuid::parse_str(v)
                .map_err(|_| AppError::Forbidden(format!("Header {} is not a valid id", name)))
        })
        .transpose()
}

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let user_id = uuid_header(headers, USER_ID_HEADER)?
        .ok_or_else(|| AppError::Forbidden("Caller identity is required".to_string()))?;
    let role = header(headers, STAFF_ROLE_HEADER)
        .ok_or_else(|| AppError::Forbidden("Staff role is required".to_string()))?;
    let dealer_id = uuid_header(headers, DEALER_ID_HEADER)?;

    Actor::from_parts(user_id, role, dealer_id)
        .map_err(|e| AppError::Forbidden(e.to_string()))
}
