//! Distribution request service
//!
//! Dealers raise requests, manufacturer staff approve, reject, allocate and
//! recall them, and the requesting dealer confirms receipt or withdraws a
//! pending request.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    Actor, DistributionRequest, Priority, RequestAction, RequestDraft, RequestHistoryEntry,
    RequestLine, RequestStatus, StockKey,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{require_party, require_view, scope_dealer};
use crate::config::WorkflowConfig;
use crate::error::{AppError, AppResult};
use crate::retry::retry_on_conflict;
use crate::store::{RequestFilter, WorkflowStore};

#[derive(Clone)]
pub struct DistributionService {
    store: Arc<dyn WorkflowStore>,
    workflow: WorkflowConfig,
}

/// Input for raising a distribution request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestInput {
    pub required_date: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, max = 100))]
    pub lines: Vec<RequestLineInput>,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct RequestLineInput {
    pub variant_id: Uuid,
    pub color: String,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i64,
}

impl DistributionService {
    pub fn new(store: Arc<dyn WorkflowStore>, workflow: WorkflowConfig) -> Self {
        Self { store, workflow }
    }

    /// Raise a PENDING request for the caller's dealer, priced from the current variant list prices
    #[tracing::instrument(skip(self, input))]
    pub async fn create_request(&self, actor: &Actor, input: CreateRequestInput) -> AppResult<DistributionRequest> {
        let dealer_id = actor.dealer_id().ok_or_else(|| {
            AppError::Forbidden("Only dealer staff raise distribution requests".to_string())
        })?;
        if self.store.get_dealer(dealer_id).await?.is_none() {
            return Err(AppError::validation(
                "dealer_id",
                format!("Unknown dealer {}", dealer_id),
            ));
        }

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in input.lines {
            line.validate()?;
            let key = StockKey::new(line.variant_id, &line.color)?;
            let variant = self.store.get_variant(key.variant_id).await?.ok_or_else(|| {
                AppError::validation("variant_id", format!("Unknown variant {}", key.variant_id))
            })?;
            lines.push(RequestLine::new(key, line.quantity, variant.price)?);
        }

        let now = Utc::now();
        let request = DistributionRequest::create(
            RequestDraft {
                dealer_id,
                requested_by: actor.user_id,
                required_date: input.required_date,
                priority: input.priority,
                lines,
                note: input.note,
            },
            now,
        )?;
        let created = RequestHistoryEntry {
            request_id: request.id,
            from_status: None,
            to_status: request.status,
            action: "create".to_string(),
            actor_id: actor.user_id,
            at: now,
        };

        let request = self.store.insert_request(request, created).await?;

        info!(
            request_id = %request.id,
            dealer_id = %dealer_id,
            lines = request.lines.len(),
            total = %request.total_amount,
            "Distribution request created"
        );
        Ok(request)
    }

    async fn load(&self, id: Uuid) -> AppResult<DistributionRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Distribution request".to_string()))
    }

    pub async fn get_request(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        let request = self.load(id).await?;
        require_view(actor, request.dealer_id)?;
        Ok(request)
    }

    pub async fn list_requests(
        &self,
        actor: &Actor,
        dealer_id: Option<Uuid>,
        status: Option<RequestStatus>,
    ) -> AppResult<Vec<DistributionRequest>> {
        let filter = RequestFilter {
            dealer_id: scope_dealer(actor, dealer_id)?,
            status,
        };
        self.store.list_requests(filter).await
    }

    pub async fn request_history(&self, actor: &Actor, id: Uuid) -> AppResult<Vec<RequestHistoryEntry>> {
        let request = self.load(id).await?;
        require_view(actor, request.dealer_id)?;
        self.store.request_history(id).await
    }

    pub async fn approve(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::Approve).await
    }

    pub async fn reject(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::Reject).await
    }

    /// Ship every line from manufacturer stock, or nothing
    pub async fn allocate(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::Allocate).await
    }

    pub async fn confirm_receipt(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::ConfirmReceipt).await
    }

    /// Pull every shipped line back into manufacturer stock, or nothing
    pub async fn recall(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::Recall).await
    }

    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> AppResult<DistributionRequest> {
        self.transition(actor, id, RequestAction::Cancel).await
    }

    #[tracing::instrument(skip(self), fields(action = %action))]
    async fn transition(&self, actor: &Actor, id: Uuid, action: RequestAction) -> AppResult<DistributionRequest> {
        // The owning dealer never changes, so the check can precede the atomic unit
        let current = self.load(id).await?;
        require_party(actor, action.performed_by(), current.dealer_id)?;

        let request = retry_on_conflict(self.workflow.max_conflict_retries, action.as_str(), || {
            self.store.transition_request(id, action, actor.user_id, Utc::now())
        })
        .await?;

        info!(
            request_id = %id,
            action = %action,
            status = %request.status,
            "Distribution request transitioned"
        );
        Ok(request)
    }
}
