//! txn Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads transaction records from a CSV file into PostgreSQL.
//!
//! # Pipeline
//!
//! - **Staging**: the file is copied verbatim into an all-text staging table
//! - **Schema**: the `transactions` table is created if missing
//! - **Validation**: rows are normalized (phone, email, timestamps), invalid
//!   ones are dropped and the rest are inserted in one transaction, first
//!   write wins per `transaction_id`
//! - **Indexing**: secondary indexes are created after the bulk insert
//! - **Cleanup**: staging is emptied once everything committed
//!
//! The [`reports`] module holds the read-only fraud detection queries.
//!
//! # Example
//!
//! ```no_run
//! use txn_ingest::config::IngestConfig;
//! use txn_ingest::orchestrator::{Orchestrator, PgIngestSteps, TracingReporter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pool = txn_ingest::db::connect(&config.database).await?;
//!
//!     let steps = PgIngestSteps::from_config(pool, &config)?;
//!     let mut orchestrator = Orchestrator::new(steps, TracingReporter);
//!     let summary = orchestrator.run(config.require_csv_path()?).await?;
//!
//!     println!("inserted {} rows", summary.load.inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod reports;
pub mod schema;
pub mod sink;
pub mod staging;
pub mod validator;

pub use error::{IngestError, IngestResult};
