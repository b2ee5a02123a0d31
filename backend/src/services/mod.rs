//! Business logic services for the EV Distribution Platform
//!
//! Services check who is calling, load what the decision needs and hand each
//! atomic unit to the store, retrying units that lost a concurrency race.

use shared::{Actor, Party};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod catalog;
pub mod distribution;
pub mod inventory;
pub mod orders;
pub mod vehicles;

pub use catalog::CatalogService;
pub use distribution::DistributionService;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use vehicles::VehicleService;

pub(crate) fn require_manufacturer(actor: &Actor) -> AppResult<()> {
    if actor.is_manufacturer() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only manufacturer staff may do this".to_string(),
        ))
    }
}

/// The actor must be `party` for a record owned by `owner`
pub(crate) fn require_party(actor: &Actor, party: Party, owner: Uuid) -> AppResult<()> {
    if actor.is_party(party, owner) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Only {} may do this", party)))
    }
}

pub(crate) fn require_view(actor: &Actor, owner: Uuid) -> AppResult<()> {
    if actor.can_view(owner) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Dealer staff may only view their own dealer's records".to_string(),
        ))
    }
}

/// Dealer staff are pinned to their own dealer; manufacturer staff keep the filter they asked for
pub(crate) fn scope_dealer(actor: &Actor, requested: Option<Uuid>) -> AppResult<Option<Uuid>> {
    match actor.dealer_id() {
        None => Ok(requested),
        Some(own) => match requested {
            Some(other) if other != own => Err(AppError::Forbidden(
                "Dealer staff may only view their own dealer's records".to_string(),
            )),
            _ => Ok(Some(own)),
        },
    }
}

pub(crate) fn validate_field(
    field: &str,
    result: Result<(), &'static str>,
) -> AppResult<()> {
    result.map_err(|message| AppError::validation(field, message))
}
