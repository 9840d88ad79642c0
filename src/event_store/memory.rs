//! In-memory Event Store
//!
//! Keeps aggregate rows and event logs in process memory. Useful for tests
//! and local runs; nothing survives a restart.
//!
//! Writes are staged in the unit of work and become visible on commit.
//! Row locks are async mutexes held by the unit of work until it commits,
//! rolls back or is dropped. Unique keys are claimed when a row is staged,
//! so a second writer fails at once instead of at commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::aggregate::{Aggregate, AggregateId};

use super::{AggregateRows, EventStore, NewEvent, StoreError, StoredEvent, UnitOfWork};

type RowKey = (&'static str, AggregateId);

/// `(constraint, value)`
type UniqueKey = (&'static str, String);

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<&'static str, BTreeMap<AggregateId, Value>>,
    logs: HashMap<&'static str, Vec<StoredEvent>>,
    /// Like database sequences, never rewound on rollback
    sequences: HashMap<&'static str, i64>,
    /// Row owning each unique key, committed or claimed by an open unit of work
    unique: HashMap<UniqueKey, RowKey>,
    /// Committed unique keys per row
    row_keys: HashMap<RowKey, Vec<UniqueKey>>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let sequence = self.sequences.entry(table).or_insert(0);
        *sequence += 1;
        *sequence
    }

    fn row(&self, (table, id): RowKey) -> Option<&Value> {
        self.rows.get(table).and_then(|rows| rows.get(&id))
    }

    /// Claim `keys` for `row`, returning the ones that were not yet held
    fn claim(&mut self, row: RowKey, keys: &[UniqueKey]) -> Result<Vec<UniqueKey>, StoreError> {
        let taken = keys
            .iter()
            .find(|key| self.unique.get(*key).is_some_and(|owner| *owner != row));
        if let Some((constraint, _)) = taken {
            return Err(StoreError::UniqueViolation {
                constraint: constraint.to_string(),
            });
        }

        let mut claimed = Vec::new();
        for key in keys {
            if !self.unique.contains_key(key) {
                self.unique.insert(key.clone(), row);
                claimed.push(key.clone());
            }
        }
        Ok(claimed)
    }

    fn release(&mut self, row: RowKey, key: &UniqueKey) {
        if self.unique.get(key) == Some(&row) {
            self.unique.remove(key);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowLock<()>>>>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_locks(&self) -> MutexGuard<'_, HashMap<RowKey, Arc<RowLock<()>>>> {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, key: RowKey) -> Arc<RowLock<()>> {
        self.row_locks().entry(key).or_default().clone()
    }

    /// Forget locks of `keys` that no guard or waiter still references
    fn prune_row_locks<'k>(&self, keys: impl IntoIterator<Item = &'k RowKey>) {
        let mut locks = self.row_locks();
        for key in keys {
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

/// In-memory event store; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    shared: Arc<Shared>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows in an aggregate table
    pub fn row_count(&self, table: &str) -> usize {
        self.shared.tables().rows.get(table).map_or(0, BTreeMap::len)
    }

    /// Committed events in an event log
    pub fn event_count(&self, events_table: &str) -> usize {
        self.shared.tables().logs.get(events_table).map_or(0, Vec::len)
    }

    /// Rows with a live lock entry
    pub fn locked_row_count(&self) -> usize {
        self.shared.row_locks().len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    type UnitOfWork = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, StoreError> {
        Ok(MemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            rows: Vec::new(),
            events: Vec::new(),
            claims: Vec::new(),
            held: HashSet::new(),
            guards: Vec::new(),
        })
    }

    async fn events_for(
        &self,
        events_table: &'static str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events: Vec<StoredEvent> = self
            .shared
            .tables()
            .logs
            .get(events_table)
            .map(|log| {
                log.iter()
                    .filter(|event| event.aggregate_id == aggregate_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        events.sort_by_key(|event| (event.created_at, event.id));
        Ok(events)
    }
}

/// Staged writes, claimed unique keys and held row locks of one in-memory
/// transaction
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    rows: Vec<(RowKey, Value, Vec<UniqueKey>)>,
    events: Vec<(&'static str, StoredEvent)>,
    claims: Vec<(RowKey, UniqueKey)>,
    held: HashSet<RowKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryUnitOfWork {
    /// Latest staged version of a row, else the committed one
    fn read(&self, key: RowKey) -> Option<Value> {
        if let Some((_, value, _)) = self.rows.iter().rev().find(|(staged, ..)| *staged == key) {
            return Some(value.clone());
        }
        self.shared.tables().row(key).cloned()
    }

    fn stage(&mut self, row: RowKey, value: Value, keys: Vec<UniqueKey>) -> Result<(), StoreError> {
        let claimed = self.shared.tables().claim(row, &keys)?;
        self.claims.extend(claimed.into_iter().map(|key| (row, key)));
        self.rows.push((row, value, keys));
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        // Whatever was not committed is rolled back
        if !self.claims.is_empty() {
            let mut tables = self.shared.tables();
            for (row, key) in &self.claims {
                tables.release(*row, key);
            }
        }

        self.guards.clear();
        self.shared.prune_row_locks(&self.held);
    }
}

fn decode<A: DeserializeOwned>(value: Value) -> Result<A, StoreError> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn append(
        &mut self,
        events_table: &'static str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError> {
        let id = self.shared.tables().next_id(events_table);
        let stored = StoredEvent {
            id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.to_string(),
            payload: event.payload,
            created_at: Utc::now(),
        };

        self.events.push((events_table, stored.clone()));
        Ok(stored)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let rows = std::mem::take(&mut self.rows);
        let events = std::mem::take(&mut self.events);
        let claims = std::mem::take(&mut self.claims);
        let (row_count, event_count) = (rows.len(), events.len());

        let mut tables = self.shared.tables();

        // Later stagings of a row replace earlier ones
        let mut committed: HashMap<RowKey, Vec<UniqueKey>> = HashMap::new();
        for (row, value, keys) in rows {
            tables.rows.entry(row.0).or_default().insert(row.1, value);
            committed.insert(row, keys);
        }

        // Keys a row held before this commit, or claimed along the way,
        // but no longer has
        for (row, keys) in &committed {
            let previous = tables.row_keys.insert(*row, keys.clone()).unwrap_or_default();
            for key in previous.iter().filter(|key| !keys.contains(*key)) {
                tables.release(*row, key);
            }
        }
        for (row, key) in &claims {
            if !committed.get(row).is_some_and(|keys| keys.contains(key)) {
                tables.release(*row, key);
            }
        }

        for (table, event) in events {
            tables.logs.entry(table).or_default().push(event);
        }
        drop(tables);

        tracing::trace!(rows = row_count, events = event_count, "Memory unit of work committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        tracing::trace!(
            rows = self.rows.len(),
            events = self.events.len(),
            "Memory unit of work rolled back"
        );
        Ok(())
    }
}

#[async_trait]
impl<A: Aggregate> AggregateRows<A> for MemoryUnitOfWork {
    async fn find(&mut self, id: AggregateId) -> Result<Option<A>, StoreError> {
        self.read((A::table_name(), id)).map(decode).transpose()
    }

    async fn find_for_update(&mut self, id: AggregateId) -> Result<Option<A>, StoreError> {
        let key = (A::table_name(), id);

        if !self.held.contains(&key) {
            // Rows are never physically deleted, so existence cannot change
            // while we wait for the lock.
            if self.read(key).is_none() {
                return Ok(None);
            }

            let guard = self.shared.row_lock(key).lock_owned().await;
            self.held.insert(key);
            self.guards.push(guard);
        }

        // Re-read after the lock so we see whatever the previous holder committed
        self.read(key).map(decode).transpose()
    }

    async fn insert(&mut self, aggregate: &A) -> Result<AggregateId, StoreError> {
        let table = A::table_name();
        let id = self.shared.tables().next_id(table);

        let mut row = aggregate.clone();
        row.assign_id(id);
        let value = serde_json::to_value(&row)?;
        self.stage((table, id), value, row.unique_keys())?;

        Ok(id)
    }

    async fn update(&mut self, aggregate: &A) -> Result<(), StoreError> {
        let id = aggregate
            .id()
            .ok_or(StoreError::Unpersisted(A::aggregate_type()))?;
        let key = (A::table_name(), id);

        if self.read(key).is_none() {
            return Err(StoreError::RowMissing { table: key.0, id });
        }

        let value = serde_json::to_value(aggregate)?;
        self.stage(key, value, aggregate.unique_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::User;
    use crate::domain::Created;
    use crate::event::DomainEvent;

    fn user(email: &str) -> User {
        Created {
            name: "Ongo".to_string(),
            email: email.to_string(),
            password: "x".to_string(),
        }
        .apply(User::default())
    }

    async fn insert_user(store: &MemoryEventStore, email: &str) -> Result<AggregateId, StoreError> {
        let mut uow = store.begin().await?;
        let id = AggregateRows::<User>::insert(&mut uow, &user(email)).await?;
        uow.commit().await?;
        Ok(id)
    }

    #[tokio::test]
    async fn test_duplicate_unique_key_is_rejected() {
        let store = MemoryEventStore::new();
        insert_user(&store, "a@b.com").await.unwrap();

        let err = insert_user(&store, "a@b.com").await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::UniqueViolation { ref constraint } if constraint == "users_email_key"
        ));
        assert_eq!(store.row_count("users"), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_claim_blocks_then_releases() {
        let store = MemoryEventStore::new();

        let mut first = store.begin().await.unwrap();
        AggregateRows::<User>::insert(&mut first, &user("a@b.com")).await.unwrap();

        // Claimed by an open unit of work
        assert!(insert_user(&store, "a@b.com").await.is_err());

        first.rollback().await.unwrap();
        assert!(insert_user(&store, "a@b.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_changed_key_frees_old_value() {
        let store = MemoryEventStore::new();
        let id = insert_user(&store, "a@b.com").await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let locked: User = AggregateRows::<User>::find_for_update(&mut uow, id)
            .await
            .unwrap()
            .unwrap();
        let renamed = Created {
            name: "Ongo".to_string(),
            email: "c@d.com".to_string(),
            password: "x".to_string(),
        }
        .apply(locked);
        AggregateRows::<User>::update(&mut uow, &renamed).await.unwrap();
        uow.commit().await.unwrap();

        assert!(insert_user(&store, "a@b.com").await.is_ok());
        assert!(insert_user(&store, "c@d.com").await.is_err());
    }

    #[tokio::test]
    async fn test_row_locks_are_pruned() {
        let store = MemoryEventStore::new();
        let id = insert_user(&store, "a@b.com").await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let found: Option<User> = AggregateRows::<User>::find_for_update(&mut uow, id)
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(store.locked_row_count(), 1);

        uow.commit().await.unwrap();
        assert_eq!(store.locked_row_count(), 0);
    }
}
