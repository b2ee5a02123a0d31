//! Dealer and variant catalog service

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    validate_dealer_code, validate_email, validate_phone, validate_price, validate_required,
    Actor, Dealer, Variant,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{require_manufacturer, validate_field};
use crate::error::{AppError, AppResult};
use crate::store::WorkflowStore;

/// Catalog service for dealers and sellable variants
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn WorkflowStore>,
}

/// Input for registering a dealer
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDealerInput {
    #[validate(length(min = 3, max = 10))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

/// Input for adding a variant
#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantInput {
    #[validate(length(min = 1, max = 100))]
    pub model: String,
    #[validate(length(min = 1, max = 100))]
    pub trim: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriceInput {
    pub price: Decimal,
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CatalogService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn create_dealer(&self, actor: &Actor, input: CreateDealerInput) -> AppResult<Dealer> {
        require_manufacturer(actor)?;

        let code = input.code.trim().to_ascii_uppercase();
        validate_field("code", validate_dealer_code(&code))?;
        validate_field("name", validate_required(&input.name))?;

        let phone = optional_text(input.phone);
        if let Some(phone) = &phone {
            validate_field("phone", validate_phone(phone))?;
        }
        let email = optional_text(input.email);
        if let Some(email) = &email {
            validate_field("email", validate_email(email))?;
        }

        let dealer = self
            .store
            .insert_dealer(Dealer {
                id: Uuid::new_v4(),
                code,
                name: input.name.trim().to_string(),
                address: optional_text(input.address),
                phone,
                email,
                created_at: Utc::now(),
            })
            .await?;

        info!(dealer_id = %dealer.id, code = %dealer.code, "Dealer registered");
        Ok(dealer)
    }

    pub async fn get_dealer(&self, id: Uuid) -> AppResult<Dealer> {
        self.store
            .get_dealer(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Dealer".to_string()))
    }

    pub async fn list_dealers(&self) -> AppResult<Vec<Dealer>> {
        self.store.list_dealers().await
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn create_variant(&self, actor: &Actor, input: CreateVariantInput) -> AppResult<Variant> {
        require_manufacturer(actor)?;

        validate_field("model", validate_required(&input.model))?;
        validate_field("trim", validate_required(&input.trim))?;
        validate_field("price", validate_price(input.price))?;

        let now = Utc::now();
        let variant = self
            .store
            .insert_variant(Variant {
                id: Uuid::new_v4(),
                model: input.model.trim().to_string(),
                trim: input.trim.trim().to_string(),
                price: input.price,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(variant_id = %variant.id, name = %variant.display_name(), "Variant added");
        Ok(variant)
    }

    pub async fn get_variant(&self, id: Uuid) -> AppResult<Variant> {
        self.store
            .get_variant(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Variant".to_string()))
    }

    pub async fn list_variants(&self) -> AppResult<Vec<Variant>> {
        self.store.list_variants().await
    }

    /// Revise the list price; existing request lines keep the price they were raised at
    #[tracing::instrument(skip(self))]
    pub async fn update_variant_price(&self, actor: &Actor, id: Uuid, price: Decimal) -> AppResult<Variant> {
        require_manufacturer(actor)?;
        validate_field("price", validate_price(price))?;

        let variant = self.store.update_variant_price(id, price, Utc::now()).await?;
        info!(variant_id = %id, price = %price, "Variant price revised");
        Ok(variant)
    }
}
