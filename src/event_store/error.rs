//! Event Store Errors
//!
//! Error types for event store operations.

use crate::aggregate::AggregateId;

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row lock not acquired within the configured lock timeout
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    /// Storage aborted the transaction to break a deadlock
    #[error("Deadlock detected")]
    Deadlock,

    /// A unique constraint rejected the write
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// An event referenced a row that does not exist
    #[error("Foreign key violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    /// An update matched no row
    #[error("No {table} row with id {id}")]
    RowMissing { table: &'static str, id: AggregateId },

    /// Update requested for an aggregate that was never inserted
    #[error("{0} aggregate has not been persisted")]
    Unpersisted(&'static str),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Lock contention that a caller may choose to retry; the store never
    /// retries on its own.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, StoreError::LockTimeout | StoreError::Deadlock)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let classified = err.as_database_error().and_then(|db| {
            let constraint = || db.constraint().unwrap_or_default().to_string();
            match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) => Some(StoreError::LockTimeout),
                Some(DEADLOCK_DETECTED) => Some(StoreError::Deadlock),
                Some(UNIQUE_VIOLATION) => Some(StoreError::UniqueViolation {
                    constraint: constraint(),
                }),
                Some(FOREIGN_KEY_VIOLATION) => Some(StoreError::ForeignKeyViolation {
                    constraint: constraint(),
                }),
                _ => None,
            }
        });

        classified.unwrap_or(StoreError::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention() {
        assert!(StoreError::LockTimeout.is_lock_contention());
        assert!(StoreError::Deadlock.is_lock_contention());
        assert!(!StoreError::Unpersisted("User").is_lock_contention());
    }

    #[test]
    fn test_non_database_sqlx_error_is_kept() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
