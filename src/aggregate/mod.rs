//! Aggregate module
//!
//! Entities that events are applied to, and the repository that resolves them.

pub mod repository;
pub mod user;

pub use repository::AggregateRepository;
pub use user::User;

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::ValidationError;

/// Storage-assigned aggregate identifier
pub type AggregateId = i64;

/// Aggregate trait that all aggregates must implement
///
/// `Default` is the fresh, not-yet-persisted instance a creation event
/// starts from.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Get the aggregate type name
    fn aggregate_type() -> &'static str;

    /// Table holding the aggregate rows
    fn table_name() -> &'static str;

    /// Table holding this kind's event log
    fn events_table() -> &'static str;

    /// Identifier, `None` until first persisted
    fn id(&self) -> Option<AggregateId>;

    /// Record the identifier storage assigned on insert
    fn assign_id(&mut self, id: AggregateId);

    /// Soft-delete flag
    fn is_deleted(&self) -> bool;

    /// Field constraints checked before every save
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Values that must be unique across the kind, as `(constraint, value)`.
    /// Named like the database constraint that enforces them.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
