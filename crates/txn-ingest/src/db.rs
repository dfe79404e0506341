use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::error::{IngestError, IngestResult};

/// Open a connection pool and verify it with a round trip
pub async fn connect(config: &DatabaseConfig) -> IngestResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect_with(config.connect_options())
        .await
        .map_err(IngestError::Connection)?;

    health_check(&pool).await?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.dbname,
        max_connections = config.max_connections,
        "Connected to database"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> IngestResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(IngestError::Connection)
}
