//! Common test utilities

#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use uuid::Uuid;

use evented::{Created, PgEventStore};

const SCHEMA: &str = include_str!("../../migrations/0001_create_users.sql");

/// Serializes schema setup across concurrently running test binaries
const SCHEMA_LOCK_KEY: i64 = 0x6576_656e_7465_64;

/// Connect to the test database and make sure the schema exists.
///
/// Tests using this are `#[ignore]`d; run them with
/// `DATABASE_URL=... cargo test -- --ignored`.
pub async fn setup_test_store() -> PgEventStore {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for PostgreSQL tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // One simple-protocol batch runs as one implicit transaction, so the
    // advisory lock is held until the whole schema is in place.
    let setup = format!("SELECT pg_advisory_xact_lock({SCHEMA_LOCK_KEY});\n{SCHEMA}");
    pool.execute(setup.as_str())
        .await
        .expect("Failed to apply schema");

    PgEventStore::new(pool)
}

/// A valid creation event with an email no other test uses
pub fn unique_user(name: &str) -> Created {
    Created {
        name: name.to_string(),
        email: format!("{}@example.com", Uuid::new_v4()),
        password: "x".to_string(),
    }
}
