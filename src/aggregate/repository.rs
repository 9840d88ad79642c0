//! Aggregate Repository
//!
//! Resolves an existing aggregate by id, or builds a fresh one.

use std::marker::PhantomData;

use crate::error::EventError;
use crate::event_store::{AggregateRows, EventStore, UnitOfWork};

use super::{Aggregate, AggregateId};

/// Repository for one aggregate kind
#[derive(Debug)]
pub struct AggregateRepository<A> {
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Default for AggregateRepository<A> {
    fn default() -> Self {
        Self {
            _aggregate: PhantomData,
        }
    }
}

impl<A> Clone for AggregateRepository<A> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<A: Aggregate> AggregateRepository<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh, not-yet-persisted aggregate
    pub fn create(&self) -> A {
        A::default()
    }

    /// Look up an existing aggregate and lock its row for the rest of the
    /// unit of work. Never creates one.
    pub async fn resolve<U>(&self, uow: &mut U, id: AggregateId) -> Result<A, EventError>
    where
        U: AggregateRows<A>,
    {
        uow.find_for_update(id)
            .await?
            .ok_or(EventError::NotFound {
                aggregate_type: A::aggregate_type(),
                id,
            })
    }

    /// Validate and write the aggregate, returning its id. A fresh
    /// aggregate is inserted and given the id storage assigned.
    pub async fn save<U>(&self, uow: &mut U, aggregate: &mut A) -> Result<AggregateId, EventError>
    where
        U: AggregateRows<A>,
    {
        aggregate.validate()?;

        match aggregate.id() {
            Some(id) => {
                uow.update(aggregate).await?;
                Ok(id)
            }
            None => {
                let id = uow.insert(aggregate).await?;
                aggregate.assign_id(id);
                Ok(id)
            }
        }
    }

    /// Read an aggregate outside of any event application, without locking
    pub async fn find<S>(&self, store: &S, id: AggregateId) -> Result<Option<A>, EventError>
    where
        S: EventStore,
        S::UnitOfWork: AggregateRows<A>,
    {
        let mut uow = store.begin().await?;
        let found = uow.find(id).await;
        uow.rollback().await?;
        Ok(found?)
    }
}
