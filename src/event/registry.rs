//! Event Type Registry
//!
//! Resolves stored type tags to catalog variants. Built once at startup;
//! building it checks the catalog exhaustively so that misconfiguration
//! fails before any event is accepted.

use std::collections::HashSet;
use std::marker::PhantomData;

use crate::aggregate::Aggregate;
use crate::domain::ConfigurationError;
use crate::error::EventError;
use crate::event_store::StoredEvent;

use super::{EventCatalog, Payload};

/// Validated tag table for one event catalog
#[derive(Debug, Clone)]
pub struct EventRegistry<C> {
    aggregate_type: &'static str,
    event_types: Vec<&'static str>,
    _catalog: PhantomData<fn() -> C>,
}

impl<C: EventCatalog> EventRegistry<C> {
    /// Build and validate the registry for catalog `C`
    pub fn new() -> Result<Self, EventError> {
        let aggregate_type = C::Aggregate::aggregate_type();
        let kind = [
            aggregate_type,
            C::Aggregate::table_name(),
            C::Aggregate::events_table(),
        ];
        if kind.iter().any(|name| name.trim().is_empty()) {
            let first = C::EVENT_TYPES.first().copied().unwrap_or_default();
            return Err(ConfigurationError::MissingAggregateKind(first).into());
        }

        if C::EVENT_TYPES.is_empty() {
            return Err(ConfigurationError::EmptyCatalog(aggregate_type).into());
        }

        let mut seen = HashSet::new();
        for &event_type in C::EVENT_TYPES {
            if !is_short_name(event_type) {
                return Err(ConfigurationError::InvalidEventType(event_type).into());
            }
            if !seen.insert(event_type) {
                return Err(ConfigurationError::DuplicateEventType(event_type).into());
            }

            // A listed tag the catalog cannot build has no mutation rule.
            // Any other decode error just means the empty probe payload is
            // not a valid instance, which is fine.
            if let Err(EventError::Configuration(ConfigurationError::UnknownEventType { .. })) =
                C::decode(event_type, &Payload::new())
            {
                return Err(EventError::UnimplementedMutation(event_type.to_string()));
            }
        }

        tracing::debug!(
            aggregate_type,
            event_types = ?C::EVENT_TYPES,
            "Event registry built"
        );

        Ok(Self {
            aggregate_type,
            event_types: C::EVENT_TYPES.to_vec(),
            _catalog: PhantomData,
        })
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn event_types(&self) -> &[&'static str] {
        &self.event_types
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|known| *known == event_type)
    }

    /// Construct a variant from its tag and raw fields
    pub fn construct(&self, event_type: &str, fields: &Payload) -> Result<C, EventError> {
        if !self.contains(event_type) {
            return Err(super::unknown_event_type::<C::Aggregate>(event_type));
        }
        C::decode(event_type, fields)
    }

    /// Rebuild the variant of a persisted event from its stored tag
    pub fn replay(&self, stored: &StoredEvent) -> Result<C, EventError> {
        self.construct(&stored.event_type, &stored.payload)
    }
}

fn is_short_name(event_type: &str) -> bool {
    !event_type.is_empty()
        && !event_type.contains("::")
        && !event_type.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateId, User};
    use crate::domain::{Created, Destroyed, UserEvent};
    use serde::{Deserialize, Serialize};
    use crate::event::DomainEvent;
    use chrono::Utc;
    use serde_json::json;

    #[derive(Debug, Clone)]
    enum Broken {
        Created(Created),
    }

    impl EventCatalog for Broken {
        type Aggregate = User;
        const EVENT_TYPES: &'static [&'static str] = &["Created", "Renamed"];

        fn event_type(&self) -> &'static str {
            Created::EVENT_TYPE
        }

        fn decode(event_type: &str, payload: &Payload) -> Result<Self, EventError> {
            if event_type == Created::EVENT_TYPE {
                return Ok(Broken::Created(Created::from_payload(payload)?));
            }
            Err(crate::event::unknown_event_type::<User>(event_type))
        }

        fn payload(&self) -> Result<Payload, EventError> {
            let Broken::Created(event) = self;
            Ok(event.to_payload()?)
        }

        fn apply(&self, user: User) -> User {
            let Broken::Created(event) = self;
            event.apply(user)
        }
    }

    /// Catalog over aggregate `$aggregate` listing `$tags`, decoding any tag
    macro_rules! listed {
        ($name:ident, $aggregate:ty, [$($tag:expr),*]) => {
            #[derive(Debug, Clone)]
            struct $name;

            impl EventCatalog for $name {
                type Aggregate = $aggregate;
                const EVENT_TYPES: &'static [&'static str] = &[$($tag),*];

                fn event_type(&self) -> &'static str {
                    Created::EVENT_TYPE
                }

                fn decode(_event_type: &str, _payload: &Payload) -> Result<Self, EventError> {
                    Ok($name)
                }

                fn payload(&self) -> Result<Payload, EventError> {
                    Ok(Payload::new())
                }

                fn apply(&self, aggregate: $aggregate) -> $aggregate {
                    aggregate
                }
            }
        };
    }

    /// Aggregate kind without a table
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Tableless {
        id: Option<AggregateId>,
    }

    impl Aggregate for Tableless {
        fn aggregate_type() -> &'static str {
            "Tableless"
        }

        fn table_name() -> &'static str {
            ""
        }

        fn events_table() -> &'static str {
            "tableless_events"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn assign_id(&mut self, id: AggregateId) {
            self.id = Some(id);
        }

        fn is_deleted(&self) -> bool {
            false
        }
    }

    listed!(Empty, User, []);
    listed!(Duplicated, User, ["Created", "Destroyed", "Created"]);
    listed!(Qualified, User, ["events::Created"]);
    listed!(Unbound, Tableless, ["Opened"]);

    #[test]
    fn test_empty_catalog_is_rejected() {
        let err = EventRegistry::<Empty>::new().unwrap_err();
        assert!(matches!(
            err,
            EventError::Configuration(ConfigurationError::EmptyCatalog("User"))
        ));
    }

    #[test]
    fn test_duplicate_tag_is_rejected() {
        let err = EventRegistry::<Duplicated>::new().unwrap_err();
        assert!(matches!(
            err,
            EventError::Configuration(ConfigurationError::DuplicateEventType("Created"))
        ));
    }

    #[test]
    fn test_qualified_tag_is_rejected() {
        let err = EventRegistry::<Qualified>::new().unwrap_err();
        assert!(matches!(
            err,
            EventError::Configuration(ConfigurationError::InvalidEventType("events::Created"))
        ));
    }

    #[test]
    fn test_aggregate_without_table_is_rejected() {
        let err = EventRegistry::<Unbound>::new().unwrap_err();
        assert!(matches!(
            err,
            EventError::Configuration(ConfigurationError::MissingAggregateKind("Opened"))
        ));
    }

    #[test]
    fn test_user_registry_is_valid() {
        let registry = EventRegistry::<UserEvent>::new().unwrap();

        assert_eq!(registry.aggregate_type(), "User");
        assert_eq!(registry.event_types(), &["Created", "Destroyed"]);
        assert!(registry.contains("Destroyed"));
        assert!(!registry.contains("UserEvent::Destroyed"));
    }

    #[test]
    fn test_listed_tag_without_variant_is_rejected() {
        let err = EventRegistry::<Broken>::new().unwrap_err();
        assert!(matches!(err, EventError::UnimplementedMutation(tag) if tag == "Renamed"));
    }

    #[test]
    fn test_unknown_tag_is_configuration_error() {
        let registry = EventRegistry::<UserEvent>::new().unwrap();

        let err = registry.construct("Renamed", &Payload::new()).unwrap_err();
        assert!(matches!(
            err,
            EventError::Configuration(ConfigurationError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn test_replay_uses_stored_tag() {
        let registry = EventRegistry::<UserEvent>::new().unwrap();
        let mut payload = Payload::new();
        payload.insert("id".to_string(), json!(7));

        let stored = StoredEvent {
            id: 1,
            aggregate_id: 7,
            event_type: "Destroyed".to_string(),
            payload,
            created_at: Utc::now(),
        };

        let event = registry.replay(&stored).unwrap();
        assert_eq!(event, UserEvent::Destroyed(Destroyed { id: 7 }));
        assert_eq!(event.event_type(), stored.event_type);
    }

    #[test]
    fn test_short_name_rule() {
        assert!(is_short_name("Created"));
        assert!(!is_short_name(""));
        assert!(!is_short_name("events::Created"));
        assert!(!is_short_name("User Created"));
    }
}
