//! Shared helpers for txn-ingest integration tests using testcontainers
//!
//! Each test starts its own PostgreSQL container, so tests never share
//! tables. Docker must be available; the tests are `#[ignore]`d by default.
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tempfile::NamedTempFile;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use txn_ingest::dedup::DedupPolicy;
use txn_ingest::orchestrator::{Orchestrator, PgIngestSteps, TracingReporter};
use txn_ingest::validator::{RecordValidator, TransactionLoader};

pub const HEADER: &str =
    "transaction_id,agent_name,amount,status,created_at,updated_at,lat,lon,email,phone_number";

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with a connected pool
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A data row with every column supplied
pub fn row(id: &str, phone: &str, email: &str, created_at: &str) -> String {
    format!(
        "{},Asha Verma,1500.00,Success,{},2024-01-02T08:30:00.000000,19.076090,72.877426,{},{}",
        id, created_at, email, phone
    )
}

/// Write a CSV file with the standard header and `rows`
pub fn csv_file(rows: &[String]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new().context("Failed to create temp file")?;
    writeln!(file, "{}", HEADER)?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    file.flush()?;
    Ok(file)
}

/// Orchestrator wired to the container pool
pub fn orchestrator(
    pool: PgPool,
    policy: DedupPolicy,
) -> Result<Orchestrator<PgIngestSteps, TracingReporter>> {
    let loader = TransactionLoader::new(pool.clone(), RecordValidator::new()?, policy);
    Ok(Orchestrator::new(
        PgIngestSteps::new(pool, loader),
        TracingReporter,
    ))
}

pub async fn run_file(pool: &PgPool, path: &Path) -> Result<txn_ingest::orchestrator::RunSummary> {
    let mut orchestrator = orchestrator(pool.clone(), DedupPolicy::FirstWriteWins)?;
    Ok(orchestrator.run(path).await?)
}

pub async fn count(pool: &PgPool, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    Ok(sqlx::query_scalar(&sql).fetch_one(pool).await?)
}

/// Route test logs through the test harness
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("txn_ingest=debug,sqlx=warn")
        .with_test_writer()
        .try_init();
}
