//! Invalid-record sinks
//!
//! The validator hands every rejected row to a [`RejectSink`] once the
//! destination batch has committed. The default sink discards them.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::models::{RejectedRecord, ERROR_TABLE, SOURCE_COLUMNS};

/// Rows per multi-row insert (12 bind parameters each)
const SINK_BATCH_ROWS: usize = 4_000;

/// Destination for rows that failed validation
#[async_trait]
pub trait RejectSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Record one run's rejected rows
    async fn record(&self, rejected: &[RejectedRecord]) -> Result<(), SinkError>;
}

/// Sink that drops rejected rows
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRejectSink;

#[async_trait]
impl RejectSink for NoopRejectSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn record(&self, rejected: &[RejectedRecord]) -> Result<(), SinkError> {
        debug!(rejected = rejected.len(), "Discarding rejected rows");
        Ok(())
    }
}

/// Sink that copies rejected rows, with their reason, into `error_transactions`
#[derive(Debug, Clone)]
pub struct PgRejectSink {
    db: PgPool,
}

impl PgRejectSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create the error table if it does not exist
    pub async fn ensure_table(&self) -> Result<(), SinkError> {
        let columns = SOURCE_COLUMNS
            .iter()
            .map(|c| format!("{} TEXT", c))
            .collect::<Vec<_>>()
            .join(", ");

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id BIGSERIAL PRIMARY KEY, \
                source_row BIGINT NOT NULL, \
                {}, \
                reason TEXT NOT NULL, \
                rejected_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\
            )",
            ERROR_TABLE, columns
        );

        sqlx::query(&create).execute(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl RejectSink for PgRejectSink {
    fn name(&self) -> &'static str {
        "error_table"
    }

    async fn record(&self, rejected: &[RejectedRecord]) -> Result<(), SinkError> {
        if rejected.is_empty() {
            return Ok(());
        }

        self.ensure_table().await?;

        let mut tx = self.db.begin().await?;

        for chunk in rejected.chunks(SINK_BATCH_ROWS) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (source_row, {}, reason) ",
                ERROR_TABLE,
                SOURCE_COLUMNS.join(", ")
            ));

            query_builder.push_values(chunk.iter(), |mut b, rejected| {
                let raw = &rejected.raw;
                b.push_bind(raw.row_number)
                    .push_bind(&raw.transaction_id)
                    .push_bind(&raw.agent_name)
                    .push_bind(&raw.amount)
                    .push_bind(&raw.status)
                    .push_bind(&raw.created_at)
                    .push_bind(&raw.updated_at)
                    .push_bind(&raw.lat)
                    .push_bind(&raw.lon)
                    .push_bind(&raw.email)
                    .push_bind(&raw.phone_number)
                    .push_bind(rejected.reason.as_str());
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        info!(
            rows = rejected.len(),
            table = ERROR_TABLE,
            "Moved invalid records to error table"
        );
        Ok(())
    }
}
