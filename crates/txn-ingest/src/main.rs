//! txn-ingest - Transaction CSV ingestion tool

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use txn_common::logging::{init_logging, LogConfig, LogLevel};
use txn_ingest::config::IngestConfig;
use txn_ingest::dedup::DedupPolicy;
use txn_ingest::orchestrator::{Orchestrator, PgIngestSteps, TracingReporter};
use txn_ingest::reports::{FraudReports, ReportOptions, ReportSet};

#[derive(Parser, Debug)]
#[command(name = "txn-ingest")]
#[command(author, version, about = "Transaction CSV ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a CSV file into the transactions table
    Run {
        /// Source CSV file (overrides CSV_FILE_PATH)
        #[arg(short, long)]
        csv_path: Option<PathBuf>,

        /// Duplicate key handling (overrides INGEST_DEDUP_POLICY)
        #[arg(long)]
        dedup_policy: Option<DedupPolicy>,

        /// Write rejected rows to the error_transactions table
        #[arg(long)]
        capture_rejects: bool,

        /// Run the fraud reports after a successful load
        #[arg(long)]
        with_reports: bool,

        #[command(flatten)]
        reports: ReportArgs,
    },

    /// Run the fraud detection reports only
    Report(ReportArgs),
}

#[derive(Args, Debug, Clone)]
struct ReportArgs {
    /// Distance in meters above which a user's locations are flagged
    #[arg(long, default_value_t = 5000.0)]
    distance_threshold: f64,

    /// Failed transactions per grid cell needed to be listed (exclusive)
    #[arg(long, default_value_t = 2)]
    failure_threshold: i64,

    /// Grid cell size in degrees
    #[arg(long, default_value_t = 1.5)]
    cell_degrees: f64,

    /// Look-back window for the agent ranking, in days
    #[arg(long, default_value_t = 365)]
    agent_window_days: i32,

    /// Number of agents to list
    #[arg(long, default_value_t = 50)]
    agent_limit: i64,
}

impl From<ReportArgs> for ReportOptions {
    fn from(args: ReportArgs) -> Self {
        Self {
            distance_threshold_meters: args.distance_threshold,
            failure_threshold: args.failure_threshold,
            cell_degrees: args.cell_degrees,
            agent_window_days: args.agent_window_days,
            agent_limit: args.agent_limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::builder()
        .log_file_prefix("txn-ingest")
        .build()
        .merge_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
        log_config.console_level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    if let Err(e) = execute(cli.command).await {
        error!(error = %format!("{:#}", e), "txn-ingest failed");
        return Err(e);
    }
    Ok(())
}

async fn execute(command: Command) -> Result<()> {
    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;

    match command {
        Command::Run {
            csv_path,
            dedup_policy,
            capture_rejects,
            with_reports,
            reports,
        } => {
            if let Some(path) = csv_path {
                config.csv_path = Some(path);
            }
            if let Some(policy) = dedup_policy {
                config.dedup_policy = policy;
            }
            config.capture_rejects |= capture_rejects;
            config.validate()?;
            let source = config.require_csv_path()?.clone();

            if config.startup_delay_secs > 0 {
                info!(seconds = config.startup_delay_secs, "Waiting before connecting");
                tokio::time::sleep(config.startup_delay()).await;
            }

            let pool = txn_ingest::db::connect(&config.database).await?;
            let steps = PgIngestSteps::from_config(pool.clone(), &config)?;
            let mut orchestrator = Orchestrator::new(steps, TracingReporter);

            let summary = orchestrator.run(&source).await?;
            info!(
                run_id = %summary.run_id,
                staged = summary.staged,
                valid = summary.load.valid,
                rejected = summary.load.rejected,
                duplicates_in_file = summary.load.duplicates_in_file,
                inserted = summary.load.inserted,
                duration_ms = summary.duration.as_millis() as u64,
                "Ingestion complete"
            );

            if with_reports {
                let set = FraudReports::new(pool).run_all(&reports.into()).await?;
                log_reports(&set);
            }
        },
        Command::Report(args) => {
            config.validate()?;
            let pool = txn_ingest::db::connect(&config.database).await?;
            let set = FraudReports::new(pool).run_all(&args.into()).await?;
            log_reports(&set);
        },
    }

    Ok(())
}

fn log_reports(set: &ReportSet) {
    for user in &set.distant_users {
        info!(
            email = %user.email,
            max_distance_meters = user.max_distance_meters,
            "Multiple location user"
        );
    }
    for cell in &set.failed_locations {
        info!(
            grid_lat = cell.grid_lat,
            grid_lon = cell.grid_lon,
            failed = cell.failed_transaction_count,
            "Failed transaction location"
        );
    }
    for agent in &set.top_agents {
        info!(
            agent = agent.agent_name.as_deref().unwrap_or("<unknown>"),
            total = %agent
                .total_transaction_amount
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            "Top agent"
        );
    }
}
