//! evented Library
//!
//! Event-sourced aggregate persistence. Callers construct events; each event
//! resolves or builds its aggregate, mutates it by its own rule, and is
//! stored together with the updated aggregate in one transaction.

pub mod aggregate;
pub mod applier;
pub mod domain;
pub mod event;
pub mod event_store;

// Used by the main.rs binary
pub mod config;
pub mod db;
mod error;

pub use aggregate::{Aggregate, AggregateId, AggregateRepository, User};
pub use applier::{Applied, ApplyRequest, ApplyStage, EventApplier};
pub use config::Config;
pub use domain::{ConfigurationError, Created, Destroyed, UserEvent, ValidationError};
pub use error::EventError;
pub use event::{DomainEvent, EventCatalog, EventRegistry, Payload, PayloadCodec, PendingEvent};
pub use event_store::{EventStore, MemoryEventStore, PgEventStore, StoreError, StoredEvent};
