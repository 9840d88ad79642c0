//! PostgreSQL Event Store
//!
//! Each aggregate kind owns a `<kind>_events` table; events are inserted in
//! the same transaction that saves the aggregate row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::aggregate::AggregateId;
use crate::event::Payload;

use super::{EventStore, NewEvent, StoreError, StoredEvent, UnitOfWork};

type EventRow = (i64, AggregateId, String, Json<Payload>, DateTime<Utc>);

fn stored_event((id, aggregate_id, event_type, payload, created_at): EventRow) -> StoredEvent {
    StoredEvent {
        id,
        aggregate_id,
        event_type,
        payload: payload.0,
        created_at,
    }
}

/// Event Store for persisting and retrieving events
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgEventStore {
    /// Create a new PgEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound how long a transaction waits for a row lock
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    type UnitOfWork = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not take bind parameters
            let statement = format!("SET LOCAL lock_timeout = {}", timeout.as_millis());
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(PgUnitOfWork { tx })
    }

    async fn events_for(
        &self,
        events_table: &'static str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let sql = format!(
            r#"
            SELECT id, aggregate_id, event_type, payload, created_at
            FROM {events_table}
            WHERE aggregate_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        );

        let events = sqlx::query_as::<_, EventRow>(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(stored_event)
            .collect();

        Ok(events)
    }
}

/// An open PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// Connection the transaction runs on, for aggregate row mappings
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn append(
        &mut self,
        events_table: &'static str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {events_table} (aggregate_id, event_type, payload)
            VALUES ($1, $2, $3)
            RETURNING id, aggregate_id, event_type, payload, created_at
            "#
        );

        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event.aggregate_id)
            .bind(event.event_type)
            .bind(Json(&event.payload))
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(stored_event(row))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
