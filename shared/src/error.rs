//! Errors raised by the pure workflow rules

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One line that could not be covered by the stock at its source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub variant_id: Uuid,
    pub color: String,
    pub requested: i64,
    pub available: i64,
    pub shortfall: i64,
}

impl Shortfall {
    pub fn new(variant_id: Uuid, color: impl Into<String>, requested: i64, available: i64) -> Self {
        Self {
            variant_id,
            color: color.into(),
            requested,
            available,
            shortfall: requested - available,
        }
    }
}

/// Rule violations shared by every component of the workflow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("cannot {action} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: String,
    },

    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<Shortfall>),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        action: impl std::fmt::Display,
    ) -> Self {
        WorkflowError::InvalidTransition {
            entity,
            from: from.to_string(),
            action: action.to_string(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
