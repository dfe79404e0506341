//! Validation and transformation of staged rows
//!
//! Reads the whole staging table in one ordered query, normalizes and filters
//! it in process, then writes the survivors with multi-row
//! `INSERT ... ON CONFLICT` statements inside a single transaction. Either
//! every accepted row is committed or none is.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::dedup::DedupPolicy;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    RawRecord, RejectReason, RejectedRecord, TransactionRecord, SOURCE_COLUMNS, STAGING_TABLE,
    TRANSACTIONS_TABLE,
};
use crate::normalize::{
    clean_text, is_valid_phone, normalize_email, normalize_phone, parse_decimal, parse_timestamp,
    EmailValidator,
};
use crate::sink::{NoopRejectSink, RejectSink};

/// Rows per multi-row insert. Ten bind parameters per row keeps each
/// statement well under PostgreSQL's 65,535 parameter limit.
const INSERT_BATCH_ROWS: usize = 5_000;

/// Applies the per-row normalization and validation rules
#[derive(Debug, Clone)]
pub struct RecordValidator {
    email: EmailValidator,
}

impl RecordValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: EmailValidator::new()?,
        })
    }

    /// Normalize one staged row, or report the first rule it breaks
    pub fn validate(&self, raw: &RawRecord) -> Result<TransactionRecord, RejectReason> {
        let transaction_id =
            clean_text(raw.transaction_id.as_deref()).ok_or(RejectReason::MissingTransactionId)?;

        let phone_number = normalize_phone(raw.phone_number.as_deref().unwrap_or_default());
        if !is_valid_phone(&phone_number) {
            return Err(RejectReason::InvalidPhoneNumber);
        }

        let email = normalize_email(raw.email.as_deref().unwrap_or_default());
        if !self.email.is_valid(&email) {
            return Err(RejectReason::InvalidEmail);
        }

        let created_at = raw
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(RejectReason::InvalidCreatedAt)?;
        let updated_at = raw
            .updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(RejectReason::InvalidUpdatedAt)?;

        let amount =
            parse_decimal(raw.amount.as_deref()).map_err(|_| RejectReason::InvalidAmount)?;
        let lat = parse_decimal(raw.lat.as_deref()).map_err(|_| RejectReason::InvalidLatitude)?;
        let lon = parse_decimal(raw.lon.as_deref()).map_err(|_| RejectReason::InvalidLongitude)?;

        Ok(TransactionRecord {
            transaction_id,
            agent_name: clean_text(raw.agent_name.as_deref()),
            amount,
            status: clean_text(raw.status.as_deref()),
            created_at,
            updated_at,
            lat,
            lon,
            email,
            phone_number,
        })
    }
}

/// Result of the in-process transform pass
#[derive(Debug, Default)]
pub struct TransformOutcome {
    /// Valid rows, one per business key, in file order
    pub accepted: Vec<TransactionRecord>,
    pub rejected: Vec<RejectedRecord>,
    /// Valid rows dropped because an earlier row had the same key
    pub duplicates_in_file: usize,
}

impl TransformOutcome {
    pub fn rejects_by_reason(&self) -> BTreeMap<RejectReason, usize> {
        let mut counts = BTreeMap::new();
        for rejected in &self.rejected {
            *counts.entry(rejected.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Validate every staged row and collapse duplicate keys
pub fn transform(
    validator: &RecordValidator,
    policy: DedupPolicy,
    rows: Vec<RawRecord>,
) -> TransformOutcome {
    let mut valid = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for raw in rows {
        match validator.validate(&raw) {
            Ok(record) => valid.push(record),
            Err(reason) => rejected.push(RejectedRecord { raw, reason }),
        }
    }

    let (accepted, duplicates_in_file) = policy.collapse(valid);

    TransformOutcome {
        accepted,
        rejected,
        duplicates_in_file,
    }
}

/// Counts from one validate-and-load pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Rows read from staging
    pub staged: usize,
    /// Rows that passed validation (before key collapse)
    pub valid: usize,
    pub rejected: usize,
    pub duplicates_in_file: usize,
    /// Rows written to the destination; keys already present are not counted
    pub inserted: u64,
    pub rejects_by_reason: BTreeMap<RejectReason, usize>,
}

/// Moves staged rows into the destination table
pub struct TransactionLoader {
    db: PgPool,
    validator: RecordValidator,
    policy: DedupPolicy,
    sink: Arc<dyn RejectSink>,
}

impl TransactionLoader {
    /// Create a loader with the no-op reject sink
    pub fn new(db: PgPool, validator: RecordValidator, policy: DedupPolicy) -> Self {
        Self {
            db,
            validator,
            policy,
            sink: Arc::new(NoopRejectSink),
        }
    }

    /// Route rejected rows to `sink` instead of discarding them
    pub fn with_sink(mut self, sink: Arc<dyn RejectSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the staging table and insert the survivors
    ///
    /// Staging is only read; it stays untouched whether this succeeds or not.
    pub async fn run(&self) -> IngestResult<LoadStats> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| IngestError::validation_batch("begin transaction", e))?;

        let select = format!(
            "SELECT row_number, {} FROM {} ORDER BY row_number",
            SOURCE_COLUMNS.join(", "),
            STAGING_TABLE
        );
        let rows: Vec<RawRecord> = sqlx::query_as(&select)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| IngestError::validation_batch("read staging rows", e))?;

        let staged = rows.len();
        debug!(rows = staged, "Read staging rows");

        let outcome = transform(&self.validator, self.policy, rows);
        let rejects_by_reason = outcome.rejects_by_reason();

        let mut inserted = 0u64;
        for (batch, chunk) in outcome.accepted.chunks(INSERT_BATCH_ROWS).enumerate() {
            inserted += insert_batch(&mut tx, chunk, self.policy)
                .await
                .map_err(|e| IngestError::validation_batch(format!("insert batch {}", batch + 1), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::validation_batch("commit", e))?;

        for (reason, count) in &rejects_by_reason {
            info!(reason = %reason, count, "Rows excluded by validation");
        }

        let stats = LoadStats {
            staged,
            valid: outcome.accepted.len() + outcome.duplicates_in_file,
            rejected: outcome.rejected.len(),
            duplicates_in_file: outcome.duplicates_in_file,
            inserted,
            rejects_by_reason,
        };

        info!(
            staged = stats.staged,
            rejected = stats.rejected,
            duplicates_in_file = stats.duplicates_in_file,
            inserted = stats.inserted,
            policy = %self.policy,
            "Inserted {} valid records into main table",
            stats.inserted
        );

        if !outcome.rejected.is_empty() {
            self.sink.record(&outcome.rejected).await?;
            debug!(sink = self.sink.name(), rows = outcome.rejected.len(), "Reject sink notified");
        }

        Ok(stats)
    }
}

async fn insert_batch(
    conn: &mut PgConnection,
    records: &[TransactionRecord],
    policy: DedupPolicy,
) -> Result<u64, sqlx::Error> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        TRANSACTIONS_TABLE,
        SOURCE_COLUMNS.join(", ")
    ));

    query_builder.push_values(records.iter(), |mut b, record| {
        b.push_bind(&record.transaction_id)
            .push_bind(&record.agent_name)
            .push_bind(&record.amount)
            .push_bind(&record.status)
            .push_bind(record.created_at)
            .push_bind(record.updated_at)
            .push_bind(&record.lat)
            .push_bind(&record.lon)
            .push_bind(&record.email)
            .push_bind(&record.phone_number);
    });

    query_builder.push(policy.conflict_clause());

    let result = query_builder.build().execute(conn).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw(row: i64, id: &str, phone: &str, email: &str, created: &str) -> RawRecord {
        RawRecord {
            row_number: row,
            transaction_id: Some(id.to_string()),
            agent_name: Some("Asha Verma".to_string()),
            amount: Some("1500.00".to_string()),
            status: Some("Success".to_string()),
            created_at: Some(created.to_string()),
            updated_at: Some("2024-01-02T08:30:00.000000".to_string()),
            lat: Some("19.076090".to_string()),
            lon: Some("72.877426".to_string()),
            email: Some(email.to_string()),
            phone_number: Some(phone.to_string()),
        }
    }

    fn validator() -> RecordValidator {
        RecordValidator::new().unwrap()
    }

    #[test]
    fn test_valid_row_is_normalized() {
        let record = validator()
            .validate(&raw(1, "T1", "+91-98765-43210", " User@Test.COM ", "2024-01-01 10:00:00"))
            .unwrap();

        assert_eq!(record.transaction_id, "T1");
        assert_eq!(record.phone_number, "9876543210");
        assert_eq!(record.email, "user@test.com");
        assert_eq!(record.created_at.to_string(), "2024-01-01 10:00:00");
        assert_eq!(record.agent_name.as_deref(), Some("Asha Verma"));
    }

    #[test]
    fn test_short_phone_is_rejected() {
        let result =
            validator().validate(&raw(1, "T2", "12345", "user@test.com", "2024-01-01 10:00:00"));
        assert_eq!(result, Err(RejectReason::InvalidPhoneNumber));
    }

    #[test]
    fn test_email_without_at_is_rejected() {
        let result = validator().validate(&raw(
            1,
            "T3",
            "9876543210",
            "user.test.com",
            "2024-01-01 10:00:00",
        ));
        assert_eq!(result, Err(RejectReason::InvalidEmail));
    }

    #[test]
    fn test_bad_timestamps_are_rejected() {
        let v = validator();
        let bad_created = raw(1, "T4", "9876543210", "a@b.com", "01/01/2024");
        assert_eq!(v.validate(&bad_created), Err(RejectReason::InvalidCreatedAt));

        let mut bad_updated = raw(2, "T5", "9876543210", "a@b.com", "2024-01-01 10:00:00");
        bad_updated.updated_at = Some("not a time".to_string());
        assert_eq!(v.validate(&bad_updated), Err(RejectReason::InvalidUpdatedAt));

        let mut missing_updated = raw(3, "T6", "9876543210", "a@b.com", "2024-01-01 10:00:00");
        missing_updated.updated_at = None;
        assert_eq!(
            v.validate(&missing_updated),
            Err(RejectReason::InvalidUpdatedAt)
        );
    }

    #[test]
    fn test_missing_key_and_numbers() {
        let v = validator();

        let mut no_id = raw(1, "  ", "9876543210", "a@b.com", "2024-01-01 10:00:00");
        assert_eq!(v.validate(&no_id), Err(RejectReason::MissingTransactionId));
        no_id.transaction_id = None;
        assert_eq!(v.validate(&no_id), Err(RejectReason::MissingTransactionId));

        let mut bad_amount = raw(2, "T7", "9876543210", "a@b.com", "2024-01-01 10:00:00");
        bad_amount.amount = Some("ten".to_string());
        assert_eq!(v.validate(&bad_amount), Err(RejectReason::InvalidAmount));

        let mut blank_coords = raw(3, "T8", "9876543210", "a@b.com", "2024-01-01 10:00:00");
        blank_coords.lat = None;
        blank_coords.lon = Some(" ".to_string());
        let record = v.validate(&blank_coords).unwrap();
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
    }

    #[test]
    fn test_phone_checked_before_email() {
        let result = validator().validate(&raw(1, "T9", "123", "broken", "broken"));
        assert_eq!(result, Err(RejectReason::InvalidPhoneNumber));
    }

    #[test]
    fn test_transform_filters_and_collapses() {
        let rows = vec![
            raw(1, "T1", "+91-98765-43210", " User@Test.COM ", "2024-01-01 10:00:00"),
            raw(2, "T2", "12345", "user@test.com", "2024-01-01 10:00:00"),
            raw(3, "T1", "9123456789", "other@test.com", "2024-02-01 10:00:00"),
            raw(4, "T3", "09876543210", "x@y.org", "2024-01-01T10:00:00"),
            raw(5, "T4", "9876543210", "no-at-sign", "2024-01-01T10:00:00"),
        ];

        let outcome = transform(&validator(), DedupPolicy::FirstWriteWins, rows);

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.duplicates_in_file, 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.accepted[0].transaction_id, "T1");
        assert_eq!(outcome.accepted[0].email, "user@test.com");
        assert_eq!(outcome.accepted[1].transaction_id, "T3");
        assert_eq!(outcome.accepted[1].phone_number, "9876543210");
        assert_eq!(outcome.rejected[0].raw.row_number, 2);

        let by_reason = outcome.rejects_by_reason();
        assert_eq!(by_reason.get(&RejectReason::InvalidPhoneNumber), Some(&1));
        assert_eq!(by_reason.get(&RejectReason::InvalidEmail), Some(&1));
    }

    #[test]
    fn test_transform_empty_staging() {
        let outcome = transform(&validator(), DedupPolicy::FirstWriteWins, Vec::new());
        assert!(outcome.accepted.is_empty());
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.duplicates_in_file, 0);
    }
}
