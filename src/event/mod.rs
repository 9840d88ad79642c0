//! Event module
//!
//! An event variant is a plain struct whose fields are its payload, bound at
//! definition time to one aggregate kind and one type tag. Each aggregate
//! kind groups its variants into a closed catalog enum that the applier and
//! the registry dispatch through.

mod payload;
mod registry;

pub use payload::{Payload, PayloadCodec, PayloadError};
pub use registry::EventRegistry;

use serde::{de::DeserializeOwned, Serialize};

use crate::aggregate::{Aggregate, AggregateId};
use crate::domain::ConfigurationError;
use crate::error::EventError;

/// One event variant: its tag, its payload fields and its mutation rule.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type tag, the variant's short name. Stored verbatim with every event.
    const EVENT_TYPE: &'static str;

    /// Payload fields, in declaration order
    const FIELDS: &'static [&'static str];

    /// The aggregate kind this variant applies to
    type Aggregate: Aggregate;

    /// Mutation rule. Reads only the event's own fields and writes only onto
    /// the aggregate passed in.
    fn apply(&self, aggregate: Self::Aggregate) -> Self::Aggregate;

    /// Aggregate the payload itself names, for variants that carry one
    fn target(&self) -> Option<AggregateId> {
        None
    }

    fn codec() -> PayloadCodec {
        PayloadCodec::from_fields(Self::FIELDS)
    }

    fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        Self::codec().decode(Some(payload))
    }

    fn to_payload(&self) -> Result<Payload, PayloadError> {
        Self::codec().encode(self)
    }
}

/// Closed set of event variants for one aggregate kind.
///
/// Implemented by an enum with one arm per variant, so dispatch from a tag
/// to a mutation rule is checked by the compiler.
pub trait EventCatalog: Clone + Send + Sync + Sized + 'static {
    type Aggregate: Aggregate;

    /// Every tag in the catalog
    const EVENT_TYPES: &'static [&'static str];

    fn event_type(&self) -> &'static str;

    /// Build the variant named by `event_type` from its payload
    fn decode(event_type: &str, payload: &Payload) -> Result<Self, EventError>;

    fn payload(&self) -> Result<Payload, EventError>;

    fn apply(&self, aggregate: Self::Aggregate) -> Self::Aggregate;

    fn target(&self) -> Option<AggregateId> {
        None
    }
}

/// Error for a tag the catalog of `A` does not contain
pub fn unknown_event_type<A: Aggregate>(event_type: &str) -> EventError {
    ConfigurationError::UnknownEventType {
        aggregate_type: A::aggregate_type(),
        event_type: event_type.to_string(),
    }
    .into()
}

/// An event that has been constructed but not yet applied.
///
/// `aggregate_id` is absent for events that create their aggregate and is
/// back-filled once, after the aggregate is first persisted. An event whose
/// payload names its aggregate starts out targeting it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<C> {
    aggregate_id: Option<AggregateId>,
    event: C,
}

impl<C: EventCatalog> PendingEvent<C> {
    pub fn new(event: impl Into<C>) -> Self {
        let event = event.into();
        Self {
            aggregate_id: event.target(),
            event,
        }
    }

    pub fn for_aggregate(aggregate_id: AggregateId, event: impl Into<C>) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            event: event.into(),
        }
    }

    pub fn aggregate_id(&self) -> Option<AggregateId> {
        self.aggregate_id
    }

    pub fn event(&self) -> &C {
        &self.event
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Set the target id if it is still unknown; an id already present is
    /// never replaced.
    pub fn backfill(&mut self, aggregate_id: AggregateId) -> AggregateId {
        *self.aggregate_id.get_or_insert(aggregate_id)
    }
}
