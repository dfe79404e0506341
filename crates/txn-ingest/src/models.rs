//! Record types flowing through the ingestion pipeline

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::types::BigDecimal;
use sqlx::FromRow;

/// Destination table for validated transactions
pub const TRANSACTIONS_TABLE: &str = "transactions";

/// Transient table holding the raw rows of the current run
pub const STAGING_TABLE: &str = "staging_transactions";

/// Optional capture table for rows that failed validation
pub const ERROR_TABLE: &str = "error_transactions";

/// Source columns, in file order. Staging and destination use the same names.
pub const SOURCE_COLUMNS: [&str; 10] = [
    "transaction_id",
    "agent_name",
    "amount",
    "status",
    "created_at",
    "updated_at",
    "lat",
    "lon",
    "email",
    "phone_number",
];

/// One row as staged from the source file. Every field is untyped text and
/// may be NULL (empty unquoted CSV field).
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct RawRecord {
    /// Position in the source file (1 = first data row)
    pub row_number: i64,
    pub transaction_id: Option<String>,
    pub agent_name: Option<String>,
    pub amount: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// A validated, normalized transaction ready for the destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub agent_name: Option<String>,
    pub amount: Option<BigDecimal>,
    pub status: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub lat: Option<BigDecimal>,
    pub lon: Option<BigDecimal>,
    pub email: String,
    pub phone_number: String,
}

/// The first validation rule a raw row failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingTransactionId,
    InvalidPhoneNumber,
    InvalidEmail,
    InvalidCreatedAt,
    InvalidUpdatedAt,
    InvalidAmount,
    InvalidLatitude,
    InvalidLongitude,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingTransactionId => "missing_transaction_id",
            RejectReason::InvalidPhoneNumber => "invalid_phone_number",
            RejectReason::InvalidEmail => "invalid_email",
            RejectReason::InvalidCreatedAt => "invalid_created_at",
            RejectReason::InvalidUpdatedAt => "invalid_updated_at",
            RejectReason::InvalidAmount => "invalid_amount",
            RejectReason::InvalidLatitude => "invalid_lat",
            RejectReason::InvalidLongitude => "invalid_lon",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw row that failed validation, as handed to a reject sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub raw: RawRecord,
    pub reason: RejectReason,
}
