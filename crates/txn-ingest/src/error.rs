//! Pipeline error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failures that abort an ingestion run
///
/// Invalid rows are never errors; they are counted and dropped.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Source file missing, unreadable, or structurally malformed
    #[error("Cannot read source file {}: {message}", path.display())]
    SourceRead { path: PathBuf, message: String },

    /// Staging table could not be prepared or filled for reasons other than the file content
    #[error("Failed to load staging table: {0}")]
    Staging(#[source] sqlx::Error),

    /// Destination table or index creation failed
    #[error("Schema setup failed ({context}): {source}")]
    Schema {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// The set-oriented transform/insert failed and was rolled back
    #[error("Validation batch failed ({context}): {source}")]
    ValidationBatch {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// The reject sink could not record invalid rows
    #[error("Reject sink failed: {0}")]
    Sink(#[from] SinkError),

    /// Staging removal failed after the destination was committed
    #[error("Staging cleanup failed: {0}")]
    Cleanup(#[source] sqlx::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not connect to the database
    #[error("Database connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// A report query failed
    #[error("Report '{report}' failed: {source}")]
    Report {
        report: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl IngestError {
    /// Create a source read error for a path
    pub fn source_read(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SourceRead {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a schema error with context
    pub fn schema(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Schema {
            context: context.into(),
            source,
        }
    }

    /// Create a validation batch error with context
    pub fn validation_batch(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::ValidationBatch {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<txn_common::CommonError> for IngestError {
    fn from(err: txn_common::CommonError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Reject sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}
