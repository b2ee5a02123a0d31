//! Allocation engine: turns a distribution request into stock movements
//!
//! Both functions are pure. They take the request and a snapshot of the
//! quantities at the source location and return either the full set of
//! movements with the resulting status, or every line that cannot be covered.
//! Callers apply the plan inside the same atomic unit that read the snapshot.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Shortfall, WorkflowError, WorkflowResult};
use crate::models::{DistributionRequest, RequestAction, RequestStatus, StockMovement};
use crate::types::{StockKey, StockLocation};

/// Movements and resulting status for an allocate or recall
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationPlan {
    pub request_id: Uuid,
    pub action: RequestAction,
    pub movements: Vec<StockMovement>,
    pub next_status: RequestStatus,
}

/// Keys a request touches, in lock order
pub fn request_keys(request: &DistributionRequest) -> Vec<StockKey> {
    let mut keys: Vec<StockKey> = request.lines.iter().map(|l| l.key()).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Plan an APPROVED → SHIPPED allocation from manufacturer stock
pub fn plan_allocation(
    request: &DistributionRequest,
    manufacturer_stock: &HashMap<StockKey, i64>,
) -> WorkflowResult<AllocationPlan> {
    plan(
        request,
        RequestAction::Allocate,
        StockLocation::Manufacturer,
        StockLocation::dealer(request.dealer_id),
        manufacturer_stock,
    )
}

/// Plan a SHIPPED → APPROVED recall from the dealer's stock
pub fn plan_recall(
    request: &DistributionRequest,
    dealer_stock: &HashMap<StockKey, i64>,
) -> WorkflowResult<AllocationPlan> {
    plan(
        request,
        RequestAction::Recall,
        StockLocation::dealer(request.dealer_id),
        StockLocation::Manufacturer,
        dealer_stock,
    )
}

fn plan(
    request: &DistributionRequest,
    action: RequestAction,
    from: StockLocation,
    to: StockLocation,
    available: &HashMap<StockKey, i64>,
) -> WorkflowResult<AllocationPlan> {
    let next_status = request.status.apply(action)?;

    let mut remaining = available.clone();
    let mut movements = Vec::with_capacity(request.lines.len());
    let mut shortfalls = Vec::new();

    for line in &request.lines {
        let key = line.key();
        let on_hand = remaining.get(&key).copied().unwrap_or(0);
        if on_hand < line.quantity {
            shortfalls.push(Shortfall::new(
                line.variant_id,
                line.color.clone(),
                line.quantity,
                on_hand,
            ));
            continue;
        }
        remaining.insert(key.clone(), on_hand - line.quantity);
        movements.push(StockMovement {
            from,
            to,
            key,
            quantity: line.quantity,
        });
    }

    if !shortfalls.is_empty() {
        return Err(WorkflowError::InsufficientStock(shortfalls));
    }

    Ok(AllocationPlan {
        request_id: request.id,
        action,
        movements,
        next_status,
    })
}
