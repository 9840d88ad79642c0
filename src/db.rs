//! Database module
//!
//! Pool construction and schema checks.
//! Note: the schema lives in raw SQL files in migrations/

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::aggregate::Aggregate;

/// Connect a pool to `database_url`
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    verify_connection(&pool).await?;
    Ok(pool)
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check that the row and event tables of aggregate kind `A` exist
pub async fn check_schema<A: Aggregate>(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in [A::table_name(), A::events_table()] {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                aggregate_type = A::aggregate_type(),
                "Required table '{}' does not exist",
                table
            );
            return Ok(false);
        }
    }

    tracing::info!(aggregate_type = A::aggregate_type(), "Schema verified");
    Ok(true)
}
