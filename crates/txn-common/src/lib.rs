//! txn Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the transaction ingestion workspace.
//!
//! - **Error Handling**: [`CommonError`] and its result alias
//! - **Environment**: helpers for reading typed settings from the environment
//! - **Logging**: tracing subscriber setup with console and rolling file sinks
//!
//! # Example
//!
//! ```no_run
//! use txn_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
