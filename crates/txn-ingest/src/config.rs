//! Ingestion configuration
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file by the binary). CLI flags override individual fields after
//! loading, then [`IngestConfig::validate`] runs once before any connection is
//! attempted.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use txn_common::env;

use crate::dedup::DedupPolicy;
use crate::error::{IngestError, IngestResult};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_MAX_CONNECTIONS: u32 = 2;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub port: u16,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("dbname", &self.dbname)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_HOST`, `DATABASE_USER`, `DATABASE_PASSWORD`, `DATABASE_NAME` (required)
    /// - `DATABASE_PORT`: defaults to 5432
    /// - `DATABASE_MAX_CONNECTIONS`: defaults to 2
    /// - `DATABASE_CONNECT_TIMEOUT`: seconds, defaults to 30
    pub fn from_env() -> IngestResult<Self> {
        Ok(Self {
            host: env::required("DATABASE_HOST")?,
            user: env::required("DATABASE_USER")?,
            password: env::required("DATABASE_PASSWORD")?,
            dbname: env::required("DATABASE_NAME")?,
            port: env::parsed("DATABASE_PORT")?.unwrap_or(DEFAULT_PORT),
            max_connections: env::parsed("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            connect_timeout_secs: env::parsed("DATABASE_CONNECT_TIMEOUT")?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.dbname)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.port == 0 {
            return Err(IngestError::config("DATABASE_PORT must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(IngestError::config(
                "DATABASE_MAX_CONNECTIONS must be greater than 0",
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(IngestError::config(
                "DATABASE_CONNECT_TIMEOUT must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Settings for one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,

    /// Source CSV file (`CSV_FILE_PATH`), required for a pipeline run
    pub csv_path: Option<PathBuf>,

    /// Seconds to wait before connecting (`INGEST_STARTUP_DELAY`)
    pub startup_delay_secs: u64,

    /// Write rejected rows to `error_transactions` (`INGEST_CAPTURE_REJECTS`)
    pub capture_rejects: bool,

    /// Duplicate key handling (`INGEST_DEDUP_POLICY`)
    pub dedup_policy: DedupPolicy,
}

impl IngestConfig {
    /// Load from environment variables
    pub fn from_env() -> IngestResult<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            csv_path: env::var("CSV_FILE_PATH").map(PathBuf::from),
            startup_delay_secs: env::parsed("INGEST_STARTUP_DELAY")?.unwrap_or(0),
            capture_rejects: env::flag("INGEST_CAPTURE_REJECTS")?.unwrap_or(false),
            dedup_policy: env::parsed("INGEST_DEDUP_POLICY")?.unwrap_or_default(),
        })
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Source path for a pipeline run
    pub fn require_csv_path(&self) -> IngestResult<&PathBuf> {
        self.csv_path
            .as_ref()
            .ok_or_else(|| IngestError::config("CSV_FILE_PATH is not set"))
    }

    pub fn validate(&self) -> IngestResult<()> {
        self.database.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 11] = [
        "DATABASE_HOST",
        "DATABASE_USER",
        "DATABASE_PASSWORD",
        "DATABASE_NAME",
        "DATABASE_PORT",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_CONNECT_TIMEOUT",
        "CSV_FILE_PATH",
        "INGEST_STARTUP_DELAY",
        "INGEST_CAPTURE_REJECTS",
        "INGEST_DEDUP_POLICY",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn set_required() {
        std::env::set_var("DATABASE_HOST", "localhost");
        std::env::set_var("DATABASE_USER", "ingest");
        std::env::set_var("DATABASE_PASSWORD", "secret");
        std::env::set_var("DATABASE_NAME", "payments");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        set_required();

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.database.connect_timeout_secs, 30);
        assert_eq!(config.csv_path, None);
        assert_eq!(config.startup_delay_secs, 0);
        assert!(!config.capture_rejects);
        assert_eq!(config.dedup_policy, DedupPolicy::FirstWriteWins);
        assert!(config.validate().is_ok());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        set_required();
        std::env::set_var("DATABASE_PORT", "6543");
        std::env::set_var("CSV_FILE_PATH", "/data/transactions.csv");
        std::env::set_var("INGEST_STARTUP_DELAY", "10");
        std::env::set_var("INGEST_CAPTURE_REJECTS", "yes");
        std::env::set_var("INGEST_DEDUP_POLICY", "latest-update-wins");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.database.port, 6543);
        assert_eq!(
            config.require_csv_path().unwrap(),
            &PathBuf::from("/data/transactions.csv")
        );
        assert_eq!(config.startup_delay(), Duration::from_secs(10));
        assert!(config.capture_rejects);
        assert_eq!(config.dedup_policy, DedupPolicy::LatestUpdateWins);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_required_is_config_error() {
        clear_env();
        std::env::set_var("DATABASE_HOST", "localhost");

        let err = IngestConfig::from_env().unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(err.to_string().contains("DATABASE_USER"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_config_error() {
        clear_env();
        set_required();
        std::env::set_var("DATABASE_PORT", "http");

        let err = IngestConfig::from_env().unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_csv_path() {
        clear_env();
        set_required();

        let config = IngestConfig::from_env().unwrap();
        assert!(matches!(
            config.require_csv_path(),
            Err(IngestError::Config(_))
        ));

        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = DatabaseConfig {
            host: "localhost".to_string(),
            user: "ingest".to_string(),
            password: "secret".to_string(),
            dbname: "payments".to_string(),
            port: 5432,
            max_connections: 0,
            connect_timeout_secs: 30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DatabaseConfig {
            host: "localhost".to_string(),
            user: "ingest".to_string(),
            password: "hunter2".to_string(),
            dbname: "payments".to_string(),
            port: 5432,
            max_connections: 2,
            connect_timeout_secs: 30,
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }
}
