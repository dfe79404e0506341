//! Destination table and index management

use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::models::TRANSACTIONS_TABLE;

/// Destination DDL; existing tables and rows are left untouched
const CREATE_TRANSACTIONS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS transactions (
        transaction_id VARCHAR(50) PRIMARY KEY,
        agent_name VARCHAR(100),
        amount NUMERIC(12, 2),
        status VARCHAR(10),
        created_at TIMESTAMP,
        updated_at TIMESTAMP,
        lat DECIMAL(9, 6),
        lon DECIMAL(9, 6),
        email VARCHAR(100),
        phone_number VARCHAR(20)
    )";

/// Secondary index on the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub columns: &'static str,
}

/// Indexes built after each bulk insert
pub const TRANSACTION_INDEXES: [IndexDef; 7] = [
    IndexDef {
        name: "idx_transactions_transaction_id",
        columns: "transaction_id",
    },
    IndexDef {
        name: "idx_transactions_created_at",
        columns: "created_at",
    },
    IndexDef {
        name: "idx_transactions_agent_name",
        columns: "agent_name",
    },
    IndexDef {
        name: "idx_transactions_status",
        columns: "status",
    },
    IndexDef {
        name: "idx_transactions_location",
        columns: "lat, lon",
    },
    IndexDef {
        name: "idx_transactions_status_created_at",
        columns: "status, created_at",
    },
    IndexDef {
        name: "idx_transactions_email",
        columns: "email",
    },
];

impl IndexDef {
    pub fn create_statement(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.name, TRANSACTIONS_TABLE, self.columns
        )
    }
}

/// Creates the destination table and its indexes
#[derive(Debug, Clone)]
pub struct SchemaManager {
    db: PgPool,
}

impl SchemaManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create `transactions` if it does not exist
    pub async fn ensure_table(&self) -> IngestResult<()> {
        sqlx::query(CREATE_TRANSACTIONS_TABLE)
            .execute(&self.db)
            .await
            .map_err(|e| IngestError::schema("create transactions table", e))?;

        info!(table = TRANSACTIONS_TABLE, "Main table created or already exists");
        Ok(())
    }

    /// Create every index in [`TRANSACTION_INDEXES`] that is missing
    pub async fn create_indexes(&self) -> IngestResult<()> {
        for index in &TRANSACTION_INDEXES {
            sqlx::query(&index.create_statement())
                .execute(&self.db)
                .await
                .map_err(|e| IngestError::schema(format!("create index {}", index.name), e))?;
            debug!(index = index.name, "Index ensured");
        }

        info!(
            count = TRANSACTION_INDEXES.len(),
            "Indexes created on transaction_id, created_at, agent_name and supporting columns"
        );
        Ok(())
    }

    /// Whether `transactions` exists in the current schema
    pub async fn table_exists(&self) -> IngestResult<bool> {
        sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(TRANSACTIONS_TABLE)
            .fetch_one(&self.db)
            .await
            .map_err(|e| IngestError::schema("check transactions table", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_index_statements_are_idempotent() {
        for index in &TRANSACTION_INDEXES {
            let sql = index.create_statement();
            assert!(sql.starts_with("CREATE INDEX IF NOT EXISTS"), "{}", sql);
            assert!(sql.contains("ON transactions"), "{}", sql);
        }
    }

    #[test]
    fn test_required_indexes_present() {
        let columns: HashSet<_> = TRANSACTION_INDEXES.iter().map(|i| i.columns).collect();
        assert!(columns.contains("transaction_id"));
        assert!(columns.contains("created_at"));
        assert!(columns.contains("agent_name"));
    }

    #[test]
    fn test_index_names_unique() {
        let names: HashSet<_> = TRANSACTION_INDEXES.iter().map(|i| i.name).collect();
        assert_eq!(names.len(), TRANSACTION_INDEXES.len());
    }

    #[test]
    fn test_table_ddl_is_conditional() {
        assert!(CREATE_TRANSACTIONS_TABLE.contains("CREATE TABLE IF NOT EXISTS transactions"));
        assert!(CREATE_TRANSACTIONS_TABLE.contains("transaction_id VARCHAR(50) PRIMARY KEY"));
    }
}
