//! Domain Events
//!
//! Event definitions for the User aggregate.
//! Events are immutable facts that have happened in the system.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateId, User};
use crate::error::EventError;
use crate::event::{unknown_event_type, DomainEvent, EventCatalog, Payload};

/// User was created
///
/// Missing fields decode as empty strings and are reported by the
/// aggregate's validation rather than by the codec.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Created")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[FILTERED]")
            .finish()
    }
}

impl DomainEvent for Created {
    const EVENT_TYPE: &'static str = "Created";
    const FIELDS: &'static [&'static str] = &["name", "email", "password"];
    type Aggregate = User;

    fn apply(&self, mut user: User) -> User {
        user.register(&self.name, &self.email, &self.password);
        user
    }
}

/// User was destroyed (soft delete)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destroyed {
    pub id: AggregateId,
}

impl DomainEvent for Destroyed {
    const EVENT_TYPE: &'static str = "Destroyed";
    const FIELDS: &'static [&'static str] = &["id"];
    type Aggregate = User;

    // No guard on an already deleted user: every destroy is recorded.
    fn apply(&self, mut user: User) -> User {
        user.soft_delete();
        user
    }

    fn target(&self) -> Option<AggregateId> {
        Some(self.id)
    }
}

/// User-related events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    Created(Created),
    Destroyed(Destroyed),
}

impl From<Created> for UserEvent {
    fn from(event: Created) -> Self {
        UserEvent::Created(event)
    }
}

impl From<Destroyed> for UserEvent {
    fn from(event: Destroyed) -> Self {
        UserEvent::Destroyed(event)
    }
}

impl EventCatalog for UserEvent {
    type Aggregate = User;

    const EVENT_TYPES: &'static [&'static str] = &[Created::EVENT_TYPE, Destroyed::EVENT_TYPE];

    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => Created::EVENT_TYPE,
            UserEvent::Destroyed(_) => Destroyed::EVENT_TYPE,
        }
    }

    fn decode(event_type: &str, payload: &Payload) -> Result<Self, EventError> {
        if event_type == Created::EVENT_TYPE {
            Ok(Created::from_payload(payload)?.into())
        } else if event_type == Destroyed::EVENT_TYPE {
            Ok(Destroyed::from_payload(payload)?.into())
        } else {
            Err(unknown_event_type::<User>(event_type))
        }
    }

    fn payload(&self) -> Result<Payload, EventError> {
        let payload = match self {
            UserEvent::Created(event) => event.to_payload()?,
            UserEvent::Destroyed(event) => event.to_payload()?,
        };
        Ok(payload)
    }

    fn apply(&self, user: User) -> User {
        match self {
            UserEvent::Created(event) => event.apply(user),
            UserEvent::Destroyed(event) => event.apply(user),
        }
    }

    fn target(&self) -> Option<AggregateId> {
        match self {
            UserEvent::Created(event) => event.target(),
            UserEvent::Destroyed(event) => event.target(),
        }
    }
}
