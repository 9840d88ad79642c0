//! Event Store module
//!
//! Append-only event logs, one per aggregate kind, and the transactional
//! unit of work events are applied in. Backed by PostgreSQL or, for tests
//! and local runs, by process memory.

mod error;
mod memory;
mod postgres;

pub use error::StoreError;
pub use memory::{MemoryEventStore, MemoryUnitOfWork};
pub use postgres::{PgEventStore, PgUnitOfWork};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateId};
use crate::event::Payload;

/// Stored event from an aggregate kind's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub aggregate_id: AggregateId,
    /// Tag as written at persistence time, never re-derived
    pub event_type: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

/// Event record about to be appended
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_id: AggregateId,
    pub event_type: &'static str,
    pub payload: Payload,
}

/// Durable storage for aggregates and their event logs
#[async_trait]
pub trait EventStore: Send + Sync {
    type UnitOfWork: UnitOfWork;

    /// Open a transaction
    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError>;

    /// Full history of one aggregate, oldest first
    async fn events_for(
        &self,
        events_table: &'static str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, StoreError>;
}

/// One open transaction. Dropping it without `commit` rolls it back and
/// releases every row lock it holds.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Append an event record; its id and timestamp are assigned here
    async fn append(
        &mut self,
        events_table: &'static str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Row access for one aggregate kind inside a unit of work
#[async_trait]
pub trait AggregateRows<A: Aggregate>: UnitOfWork {
    /// Plain read, no lock
    async fn find(&mut self, id: AggregateId) -> Result<Option<A>, StoreError>;

    /// Read and hold an exclusive row lock until the unit of work ends
    async fn find_for_update(&mut self, id: AggregateId) -> Result<Option<A>, StoreError>;

    /// Insert a fresh aggregate, returning its assigned id
    async fn insert(&mut self, aggregate: &A) -> Result<AggregateId, StoreError>;

    async fn update(&mut self, aggregate: &A) -> Result<(), StoreError>;
}
