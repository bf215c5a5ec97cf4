//! Postgres access: pool construction, migrations, and row models.
//!
//! Queries live with the services that own them (ledger, ingest, evidence,
//! webhooks, auth); this module provides the shared pool, the embedded
//! migrator, and the `FromRow` models.

pub mod models;

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Embedded migrations, applied at startup and checked by readiness.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Builds the connection pool with per-statement timeouts.
///
/// # Errors
///
/// Returns the underlying sqlx error if the database is unreachable.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(5))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-statement ceiling; ingest must finish well inside it.
                sqlx::query("SET statement_timeout = 5000")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Liveness probe: `SELECT 1`.
///
/// # Errors
///
/// Returns the underlying sqlx error if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// True when every embedded migration has been applied and nothing newer
/// is missing. Readiness treats anything else as failure.
///
/// # Errors
///
/// Returns the underlying sqlx error if the migrations table cannot be
/// read.
pub async fn migrations_at_head(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let applied: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    let expected: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
    Ok(applied == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrator_is_non_empty() {
        assert!(MIGRATOR.iter().next().is_some());
    }
}
