//! Event Applier
//!
//! Applies one event to one aggregate inside a single unit of work:
//! resolve (and lock) or build the aggregate, run the event's mutation rule,
//! save the aggregate, back-fill the event's aggregate id, append the event.
//! Either the aggregate change and the event record both commit, or neither
//! does. Failures are surfaced, never retried.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateId, AggregateRepository};
use crate::domain::ValidationError;
use crate::error::EventError;
use crate::event::{DomainEvent, EventCatalog, EventRegistry, Payload, PendingEvent};
use crate::event_store::{AggregateRows, EventStore, NewEvent, StoredEvent, UnitOfWork};

/// Persisted event and the aggregate it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Applied<A> {
    pub event: StoredEvent,
    pub aggregate: A,
}

/// Apply request in its raw form: tag, optional target id, field map
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    pub event_type: String,
    #[serde(default)]
    pub aggregate_id: Option<AggregateId>,
    #[serde(default)]
    pub payload: Payload,
}

/// Progress of one application attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Constructed,
    AggregateResolved,
    Mutated,
    AggregatePersisted,
    EventPersisted,
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyStage::Constructed => "constructed",
            ApplyStage::AggregateResolved => "aggregate_resolved",
            ApplyStage::Mutated => "mutated",
            ApplyStage::AggregatePersisted => "aggregate_persisted",
            ApplyStage::EventPersisted => "event_persisted",
        };
        f.write_str(name)
    }
}

/// Applies events of catalog `C` against store `S`
pub struct EventApplier<S, C: EventCatalog> {
    store: S,
    registry: EventRegistry<C>,
    repository: AggregateRepository<C::Aggregate>,
}

impl<S, C> EventApplier<S, C>
where
    S: EventStore,
    C: EventCatalog,
    S::UnitOfWork: AggregateRows<C::Aggregate>,
{
    /// Build the applier, validating the event catalog up front
    pub fn new(store: S) -> Result<Self, EventError> {
        Ok(Self {
            store,
            registry: EventRegistry::new()?,
            repository: AggregateRepository::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &EventRegistry<C> {
        &self.registry
    }

    /// Apply a typed event variant
    pub async fn apply_event<E>(
        &self,
        aggregate_id: Option<AggregateId>,
        event: E,
    ) -> Result<Applied<C::Aggregate>, EventError>
    where
        E: DomainEvent<Aggregate = C::Aggregate> + Into<C>,
    {
        let pending = match aggregate_id {
            Some(id) => PendingEvent::for_aggregate(id, event),
            None => PendingEvent::new(event),
        };
        self.apply(pending).await
    }

    /// Apply an event given by tag and raw fields. Fields the variant does
    /// not declare are dropped.
    pub async fn apply_fields(
        &self,
        event_type: &str,
        aggregate_id: Option<AggregateId>,
        fields: Payload,
    ) -> Result<Applied<C::Aggregate>, EventError> {
        let event = self.registry.construct(event_type, &fields)?;
        let pending = match aggregate_id {
            Some(id) => PendingEvent::for_aggregate(id, event),
            None => PendingEvent::new(event),
        };
        self.apply(pending).await
    }

    pub async fn apply_request(
        &self,
        request: ApplyRequest,
    ) -> Result<Applied<C::Aggregate>, EventError> {
        self.apply_fields(&request.event_type, request.aggregate_id, request.payload)
            .await
    }

    /// Apply a constructed event in its own unit of work
    pub async fn apply(
        &self,
        pending: PendingEvent<C>,
    ) -> Result<Applied<C::Aggregate>, EventError> {
        let span = tracing::info_span!(
            "apply_event",
            correlation_id = %Uuid::new_v4(),
            aggregate_type = C::Aggregate::aggregate_type(),
            event_type = pending.event_type(),
            aggregate_id = ?pending.aggregate_id(),
        );

        self.apply_in_unit_of_work(pending).instrument(span).await
    }

    async fn apply_in_unit_of_work(
        &self,
        pending: PendingEvent<C>,
    ) -> Result<Applied<C::Aggregate>, EventError> {
        let mut uow = self.store.begin().await?;
        let mut stage = ApplyStage::Constructed;

        match self.run(&mut uow, pending, &mut stage).await {
            Ok(applied) => {
                uow.commit().await?;
                tracing::info!(
                    event_id = applied.event.id,
                    aggregate_id = applied.event.aggregate_id,
                    "Event applied"
                );
                Ok(applied)
            }
            Err(err) => {
                tracing::warn!(%stage, error = %err, "Event application failed, rolling back");
                if let Err(rollback_err) = uow.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        uow: &mut S::UnitOfWork,
        mut pending: PendingEvent<C>,
        stage: &mut ApplyStage,
    ) -> Result<Applied<C::Aggregate>, EventError> {
        // A payload that names an aggregate must name the one being targeted
        if let (Some(id), Some(named)) = (pending.aggregate_id(), pending.event().target()) {
            if id != named {
                return Err(ValidationError::invalid(
                    "id",
                    format!("names aggregate {named} but the event targets {id}"),
                )
                .into());
            }
        }

        let payload = pending.event().payload()?;

        // Resolve-or-build. Resolving locks the row until the unit of work
        // ends; a fresh aggregate is invisible to others and needs no lock.
        let aggregate = match pending.aggregate_id() {
            Some(id) => self.repository.resolve(uow, id).await?,
            None => self.repository.create(),
        };
        *stage = ApplyStage::AggregateResolved;

        let mut aggregate = pending.event().apply(aggregate);
        *stage = ApplyStage::Mutated;

        let saved_id = self.repository.save(uow, &mut aggregate).await?;
        *stage = ApplyStage::AggregatePersisted;

        let aggregate_id = pending.backfill(saved_id);
        let event = uow
            .append(
                C::Aggregate::events_table(),
                NewEvent {
                    aggregate_id,
                    event_type: pending.event_type(),
                    payload,
                },
            )
            .await?;
        *stage = ApplyStage::EventPersisted;

        Ok(Applied { event, aggregate })
    }

    /// Current state of an aggregate, read without locking
    pub async fn find(&self, id: AggregateId) -> Result<Option<C::Aggregate>, EventError> {
        self.repository.find(&self.store, id).await
    }

    /// Every event recorded for an aggregate, oldest first
    pub async fn history(&self, id: AggregateId) -> Result<Vec<StoredEvent>, EventError> {
        Ok(self
            .store
            .events_for(C::Aggregate::events_table(), id)
            .await?)
    }
}
