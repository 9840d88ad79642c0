//! Error handling module
//!
//! Centralized error type for event application.

use crate::aggregate::AggregateId;
use crate::domain::{ConfigurationError, ValidationError};
use crate::event::PayloadError;
use crate::event_store::StoreError;

/// Every failure aborts the whole unit of work; nothing is partially
/// committed.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Fatal setup problem in the event catalog
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A target id was given but no such aggregate exists
    #[error("{aggregate_type} not found: {id}")]
    NotFound {
        aggregate_type: &'static str,
        id: AggregateId,
    },

    /// The mutated aggregate failed its own constraints
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A listed event type has no mutation rule
    #[error("Event type '{0}' has no mutation rule")]
    UnimplementedMutation(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    /// Storage failure, never reported as success
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } => {
                EventError::Validation(ValidationError::Taken { constraint })
            }
            other => EventError::Store(other),
        }
    }
}

impl EventError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            EventError::Configuration(_) => "configuration_error",
            EventError::NotFound { .. } => "not_found",
            EventError::Validation(_) => "validation_failed",
            EventError::UnimplementedMutation(_) => "unimplemented_mutation",
            EventError::Payload(_) => "invalid_payload",
            EventError::Store(StoreError::LockTimeout) => "lock_timeout",
            EventError::Store(StoreError::Deadlock) => "deadlock",
            EventError::Store(_) => "storage_error",
        }
    }

    /// Whether the caller can act on the error (bad input, missing target)
    /// rather than it being a setup or infrastructure fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EventError::NotFound { .. } | EventError::Validation(_) | EventError::Payload(_)
        )
    }
}
