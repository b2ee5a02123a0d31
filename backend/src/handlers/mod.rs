//! HTTP handlers
//!
//! Handlers decode the request, build the service for the call and encode the
//! result. Every rule lives in the services and in `shared`.

pub mod catalog;
pub mod distribution;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod vehicles;

pub use catalog::*;
pub use distribution::*;
pub use health::*;
pub use inventory::*;
pub use orders::*;
pub use vehicles::*;

use std::str::FromStr;

use shared::WorkflowError;

use crate::error::AppResult;

/// Parse an optional query-string filter naming a closed enum member
pub(crate) fn parse_filter<T>(value: Option<&str>) -> AppResult<Option<T>>
where
    T: FromStr<Err = WorkflowError>,
{
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_ascii_uppercase().parse::<T>())
        .transpose()
        .map_err(Into::into)
}
