//! evented - event application runner
//!
//! Reads newline-delimited JSON apply requests from stdin, applies each one,
//! and writes the persisted event (or the error) as one JSON line to stdout.
//!
//! ```text
//! {"event_type": "Created", "payload": {"name": "Ongo", "email": "a@b.com", "password": "x"}}
//! {"event_type": "Destroyed", "aggregate_id": 1, "payload": {"id": 1}}
//! ```

use evented::config::{Config, LogFormat, StoreBackend};
use evented::event_store::AggregateRows;
use evented::{
    db, Aggregate, ApplyRequest, EventApplier, EventStore, MemoryEventStore, PgEventStore, User,
    UserEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "evented=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries results
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!(store = ?config.store, environment = %config.environment, "Starting evented");

    match config.store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres store"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(database_url, config.database_max_connections).await?;

            if !db::check_schema::<User>(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }

            let store = PgEventStore::new(pool.clone()).with_lock_timeout(config.lock_timeout);
            run(EventApplier::new(store)?).await?;

            pool.close().await;
            tracing::info!("Database connections closed");
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing is persisted");
            run(EventApplier::new(MemoryEventStore::new())?).await?;
        }
    }

    Ok(())
}

async fn run<S>(applier: EventApplier<S, UserEvent>) -> anyhow::Result<()>
where
    S: EventStore,
    S::UnitOfWork: AggregateRows<User>,
{
    tracing::info!(
        aggregate_type = User::aggregate_type(),
        event_types = ?applier.registry().event_types(),
        "Ready for events on stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: ApplyRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed request");
                println!(
                    "{}",
                    serde_json::json!({ "error": e.to_string(), "error_code": "malformed_request" })
                );
                continue;
            }
        };

        match applier.apply_request(request).await {
            Ok(applied) => println!("{}", serde_json::to_string(&applied.event)?),
            Err(e) => println!(
                "{}",
                serde_json::json!({ "error": e.to_string(), "error_code": e.error_code() })
            ),
        }
    }

    tracing::info!("Input closed, shutting down");
    Ok(())
}
