//! Staging loader
//!
//! Copies the source file verbatim into an all-`TEXT` staging table. The file
//! is read and structurally checked before anything in the database changes;
//! after that the staging table is dropped, recreated and filled with
//! `COPY ... FROM STDIN`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use sqlx::postgres::PgPoolCopyExt;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestResult};
use crate::models::{SOURCE_COLUMNS, STAGING_TABLE};

/// Bytes handed to the server per `COPY` message
const COPY_CHUNK_BYTES: usize = 1024 * 1024;

/// A source file that passed the structural check
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    contents: Vec<u8>,
    rows: u64,
}

impl SourceFile {
    /// Read and check a file
    pub async fn open(path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::source_read(path, e.to_string()))?;

        let rows = check_structure(path, &contents)?;

        Ok(Self {
            path: path.to_path_buf(),
            contents,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows, header excluded
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

/// Check header presence and per-record column count, returning the data row count
///
/// Header names are only compared for a warning; columns are positional.
pub fn check_structure(path: &Path, contents: &[u8]) -> IngestResult<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let headers = reader
        .byte_headers()
        .map_err(|e| IngestError::source_read(path, format!("invalid header: {}", e)))?
        .clone();

    if headers.is_empty() {
        return Err(IngestError::source_read(path, "file is empty, expected a header row"));
    }

    if let Some(at) = blank_line_at(contents, 0) {
        return Err(blank_line_error(path, contents, at));
    }

    let mismatched: Vec<String> = headers
        .iter()
        .zip(SOURCE_COLUMNS.iter())
        .filter(|(found, expected)| {
            !String::from_utf8_lossy(found)
                .trim()
                .eq_ignore_ascii_case(expected)
        })
        .map(|(found, expected)| {
            format!("{} (found '{}')", expected, String::from_utf8_lossy(found).trim())
        })
        .collect();
    if !mismatched.is_empty() {
        warn!(
            path = %path.display(),
            columns = %mismatched.join(", "),
            "Header names differ from expected columns, loading by position"
        );
    }

    // The csv reader skips blank lines, but COPY reads each one as a
    // single-column row and fails. Check where every read starts,
    // including the final one that finds the end of the file.
    let mut rows = 0u64;
    let mut record = csv::ByteRecord::new();
    loop {
        let start = record_start(contents, reader.position().byte() as usize);
        if let Some(at) = blank_line_at(contents, start) {
            return Err(blank_line_error(path, contents, at));
        }

        let more = reader
            .read_byte_record(&mut record)
            .map_err(|e| IngestError::source_read(path, e.to_string()))?;
        if !more {
            break;
        }

        if record.len() != SOURCE_COLUMNS.len() {
            return Err(IngestError::source_read(
                path,
                format!(
                    "line {}: found {} columns, expected {}",
                    line_of(contents, start),
                    record.len(),
                    SOURCE_COLUMNS.len()
                ),
            ));
        }
        rows += 1;
    }

    Ok(rows)
}

/// First byte of the next record once a half-read `\r\n` is skipped
fn record_start(contents: &[u8], position: usize) -> usize {
    let pending_lf = position > 0
        && contents.get(position - 1) == Some(&b'\r')
        && contents.get(position) == Some(&b'\n');
    if pending_lf {
        position + 1
    } else {
        position
    }
}

/// Offset of an empty line beginning at `start`, if there is one
fn blank_line_at(contents: &[u8], start: usize) -> Option<usize> {
    match contents.get(start) {
        Some(b'\n' | b'\r') => Some(start),
        _ => None,
    }
}

/// 1-based line number of byte `offset`
fn line_of(contents: &[u8], offset: usize) -> usize {
    let offset = offset.min(contents.len());
    contents[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

fn blank_line_error(path: &Path, contents: &[u8], at: usize) -> IngestError {
    IngestError::source_read(path, format!("line {}: blank line", line_of(contents, at)))
}

/// Loads source files into `staging_transactions`
#[derive(Debug, Clone)]
pub struct StagingLoader {
    db: PgPool,
}

impl StagingLoader {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Replace the staging contents with the rows of `path`
    ///
    /// Returns the number of rows staged.
    pub async fn load(&self, path: impl AsRef<Path>) -> IngestResult<u64> {
        let start = Instant::now();
        let source = SourceFile::open(path).await?;

        info!(
            path = %source.path().display(),
            rows = source.rows(),
            bytes = source.contents().len(),
            "Source file checked"
        );

        self.recreate_table().await?;
        let staged = self.copy_in(&source).await?;

        if staged != source.rows() {
            warn!(
                checked = source.rows(),
                staged, "Staged row count differs from the pre-check"
            );
        }

        info!(
            rows = staged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Data loaded into staging table"
        );
        Ok(staged)
    }

    /// Drop and recreate the staging table
    pub async fn recreate_table(&self) -> IngestResult<()> {
        let drop = format!("DROP TABLE IF EXISTS {}", STAGING_TABLE);
        sqlx::query(&drop)
            .execute(&self.db)
            .await
            .map_err(IngestError::Staging)?;

        let columns = SOURCE_COLUMNS
            .iter()
            .map(|c| format!("{} TEXT", c))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!(
            "CREATE UNLOGGED TABLE {} (row_number BIGSERIAL PRIMARY KEY, {})",
            STAGING_TABLE, columns
        );
        sqlx::query(&create)
            .execute(&self.db)
            .await
            .map_err(IngestError::Staging)?;

        debug!(table = STAGING_TABLE, "Staging table recreated");
        Ok(())
    }

    async fn copy_in(&self, source: &SourceFile) -> IngestResult<u64> {
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true)",
            STAGING_TABLE,
            SOURCE_COLUMNS.join(", ")
        );

        let mut copy = self
            .db
            .copy_in_raw(&statement)
            .await
            .map_err(IngestError::Staging)?;

        for chunk in source.contents().chunks(COPY_CHUNK_BYTES) {
            let sent = copy.send(chunk).await.map(|_| ());
            if let Err(e) = sent {
                // The connection is unusable for anything else until the copy ends
                if let Err(abort_err) = copy.abort(e.to_string()).await {
                    debug!(error = %abort_err, "COPY abort failed");
                }
                return Err(copy_error(source.path(), e));
            }
        }

        copy.finish()
            .await
            .map_err(|e| copy_error(source.path(), e))
    }

    /// Remove every staged row
    pub async fn clear(&self) -> IngestResult<()> {
        let truncate = format!("TRUNCATE TABLE {}", STAGING_TABLE);
        sqlx::query(&truncate)
            .execute(&self.db)
            .await
            .map_err(IngestError::Cleanup)?;

        info!(table = STAGING_TABLE, "Staging table cleaned up");
        Ok(())
    }

    /// Current number of staged rows
    pub async fn row_count(&self) -> IngestResult<i64> {
        let count = format!("SELECT COUNT(*) FROM {}", STAGING_TABLE);
        sqlx::query_scalar(&count)
            .fetch_one(&self.db)
            .await
            .map_err(IngestError::Staging)
    }
}

/// Data errors (SQLSTATE class 22) are problems with the file itself
fn copy_error(path: &Path, err: sqlx::Error) -> IngestError {
    let is_data_error = err
        .as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code.starts_with("22"));

    if is_data_error {
        IngestError::source_read(path, err.to_string())
    } else {
        IngestError::Staging(err)
    }
}
