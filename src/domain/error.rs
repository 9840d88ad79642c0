//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// A mutated aggregate failed its own field constraints.
///
/// Raised before anything is written; the surrounding transaction is
/// rolled back and no event record exists for the attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty
    #[error("{field} can't be blank")]
    Blank { field: &'static str },

    /// A field is present but malformed
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A uniqueness constraint enforced by storage was violated
    #[error("{constraint} has already been taken")]
    Taken { constraint: String },
}

impl ValidationError {
    pub fn blank(field: &'static str) -> Self {
        Self::Blank { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The field (or constraint) the error is about
    pub fn field(&self) -> &str {
        match self {
            Self::Blank { field } | Self::Invalid { field, .. } => field,
            Self::Taken { constraint } => constraint,
        }
    }
}

/// Setup-time misconfiguration of the event catalog.
///
/// These are fatal: a process that hits one at startup should not accept
/// events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A stored or requested tag has no variant in the catalog
    #[error("Unknown event type '{event_type}' for aggregate {aggregate_type}")]
    UnknownEventType {
        aggregate_type: &'static str,
        event_type: String,
    },

    /// The catalog's aggregate declares no kind or no tables
    #[error("Event catalog for '{0}' has no target aggregate kind")]
    MissingAggregateKind(&'static str),

    /// The catalog lists no event types at all
    #[error("Event catalog for aggregate {0} declares no event types")]
    EmptyCatalog(&'static str),

    /// Two variants of one aggregate kind share a tag
    #[error("Event type '{0}' is declared more than once")]
    DuplicateEventType(&'static str),

    /// A tag that is not a bare short name
    #[error("Event type '{0}' is not a short name")]
    InvalidEventType(&'static str),
}
