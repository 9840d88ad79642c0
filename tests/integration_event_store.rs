//! Integration tests for the PostgreSQL event store
//!
//! Ignored by default: `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::sync::Arc;

use evented::event_store::StoredEvent;
use evented::{
    Aggregate, Destroyed, EventApplier, EventError, EventStore, PgEventStore, UserEvent,
    ValidationError,
};
use serde_json::json;

mod common;

fn applier(store: PgEventStore) -> EventApplier<PgEventStore, UserEvent> {
    EventApplier::new(store).unwrap()
}

async fn user_row_count(store: &PgEventStore, email: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_create_persists_user_and_event() {
    let store = common::setup_test_store().await;
    let applier = applier(store);
    let created = common::unique_user("Ongo");

    let applied = applier.apply_event(None, created.clone()).await.unwrap();

    let id = applied.aggregate.id().expect("user persisted");
    assert_eq!(applied.event.aggregate_id, id);
    assert_eq!(applied.event.event_type, "Created");
    assert_eq!(
        applied.event.payload.keys().collect::<Vec<_>>(),
        vec!["name", "email", "password"]
    );
    assert_eq!(applied.event.payload.get("email"), Some(&json!(created.email)));

    let user = applier.find(id).await.unwrap().expect("user row");
    assert_eq!(user.name(), "Ongo");
    assert!(user.authenticate("x"));

    // Reading the record back yields the tag fixed on the variant
    let history = applier.history(id).await.unwrap();
    assert_eq!(history, vec![applied.event]);
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_destroy_twice_appends_two_events() {
    let store = common::setup_test_store().await;
    let applier = applier(store);
    let id = applier
        .apply_event(None, common::unique_user("Ongo"))
        .await
        .unwrap()
        .event
        .aggregate_id;

    for _ in 0..2 {
        let applied = applier.apply_event(Some(id), Destroyed { id }).await.unwrap();
        assert!(applied.aggregate.is_deleted());
    }

    let types: Vec<String> = applier
        .history(id)
        .await
        .unwrap()
        .into_iter()
        .map(|event: StoredEvent| event.event_type)
        .collect();
    assert_eq!(types, vec!["Created", "Destroyed", "Destroyed"]);
    assert!(applier.find(id).await.unwrap().unwrap().is_deleted());
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_destroy_unknown_id_is_not_found() {
    let store = common::setup_test_store().await;
    let applier = applier(store);
    let id = i64::MAX;

    let err = applier.apply_event(Some(id), Destroyed { id }).await.unwrap_err();

    assert!(matches!(err, EventError::NotFound { aggregate_type: "User", id: missing } if missing == id));
    assert!(applier.history(id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_invalid_user_leaves_nothing_behind() {
    let store = common::setup_test_store().await;
    let applier = applier(store.clone());
    let created = common::unique_user("");
    let email = created.email.clone();

    let err = applier.apply_event(None, created).await.unwrap_err();

    assert!(matches!(err, EventError::Validation(ValidationError::Blank { field: "name" })));
    assert_eq!(user_row_count(&store, &email).await, 0);
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_duplicate_email_is_taken() {
    let store = common::setup_test_store().await;
    let applier = applier(store.clone());
    let first = common::unique_user("Ongo");
    let mut second = common::unique_user("Gablogian");
    second.email = first.email.clone();

    applier.apply_event(None, first.clone()).await.unwrap();
    let err = applier.apply_event(None, second).await.unwrap_err();

    assert!(matches!(err, EventError::Validation(ValidationError::Taken { .. })));
    assert_eq!(err.error_code(), "validation_failed");
    assert_eq!(user_row_count(&store, &first.email).await, 1);
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_unknown_event_type_is_configuration_error() {
    let store = common::setup_test_store().await;
    let applier = applier(store);

    let err = applier
        .apply_fields("Renamed", Some(1), serde_json::Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EventError::Configuration(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_concurrent_destroys_serialize_on_row_lock() {
    let store = common::setup_test_store().await;
    let applier = Arc::new(applier(store));
    let id = applier
        .apply_event(None, common::unique_user("Ongo"))
        .await
        .unwrap()
        .event
        .aggregate_id;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let applier = Arc::clone(&applier);
            tokio::spawn(async move { applier.apply_event(Some(id), Destroyed { id }).await })
        })
        .collect();

    for handle in handles {
        let applied = handle.await.unwrap().unwrap();
        assert!(applied.aggregate.is_deleted());
    }

    assert_eq!(applier.history(id).await.unwrap().len(), 5);
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_event_log_is_append_only() {
    let store = common::setup_test_store().await;
    let applier = applier(store.clone());
    let event = applier
        .apply_event(None, common::unique_user("Ongo"))
        .await
        .unwrap()
        .event;

    let update = sqlx::query("UPDATE user_events SET event_type = 'Destroyed' WHERE id = $1")
        .bind(event.id)
        .execute(store.pool())
        .await;
    assert!(update.is_err(), "UPDATE on user_events must be rejected");

    let delete = sqlx::query("DELETE FROM user_events WHERE id = $1")
        .bind(event.id)
        .execute(store.pool())
        .await;
    assert!(delete.is_err(), "DELETE on user_events must be rejected");

    assert_eq!(applier.history(event.aggregate_id).await.unwrap(), vec![event]);
}

#[tokio::test]
#[ignore = "needs PostgreSQL (DATABASE_URL)"]
async fn test_lock_timeout_is_reported() {
    use evented::event_store::{AggregateRows, UnitOfWork};
    use evented::User;
    use std::time::Duration;

    let store = common::setup_test_store().await;
    let id = applier(store.clone())
        .apply_event(None, common::unique_user("Ongo"))
        .await
        .unwrap()
        .event
        .aggregate_id;
    let applier = applier(store.clone().with_lock_timeout(Some(Duration::from_millis(100))));

    // Hold the row lock in a separate transaction
    let mut holder = store.begin().await.unwrap();
    let locked: Option<User> = holder.find_for_update(id).await.unwrap();
    assert!(locked.is_some());

    let err = applier.apply_event(Some(id), Destroyed { id }).await.unwrap_err();
    assert_eq!(err.error_code(), "lock_timeout");

    holder.rollback().await.unwrap();
    assert_eq!(applier.history(id).await.unwrap().len(), 1);
}
