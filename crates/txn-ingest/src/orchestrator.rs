//! Pipeline orchestrator
//!
//! Drives one run through its fixed sequence of steps:
//!
//! ```text
//! Idle -> Staging -> SchemaEnsured -> Validating -> Indexing -> CleaningUp -> Done
//!            \            \               \            \            \
//!             +------------+---------------+------------+------------+--> Failed
//! ```
//!
//! The first failing step stops the run. Later steps, including cleanup, are
//! never attempted, so a failed run leaves the staging table as it was for
//! inspection. Progress goes to an explicitly supplied [`Reporter`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::schema::SchemaManager;
use crate::sink::{NoopRejectSink, PgRejectSink, RejectSink};
use crate::staging::StagingLoader;
use crate::validator::{LoadStats, RecordValidator, TransactionLoader};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Staging,
    SchemaEnsured,
    Validating,
    Indexing,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Staging => "staging",
            PipelineState::SchemaEnsured => "schema_ensured",
            PipelineState::Validating => "validating",
            PipelineState::Indexing => "indexing",
            PipelineState::CleaningUp => "cleaning_up",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Stage,
    EnsureSchema,
    ValidateAndLoad,
    CreateIndexes,
    CleanUp,
}

impl Step {
    /// Run order
    pub const ALL: [Step; 5] = [
        Step::Stage,
        Step::EnsureSchema,
        Step::ValidateAndLoad,
        Step::CreateIndexes,
        Step::CleanUp,
    ];

    /// State the pipeline is in while this step runs
    pub fn state(&self) -> PipelineState {
        match self {
            Step::Stage => PipelineState::Staging,
            Step::EnsureSchema => PipelineState::SchemaEnsured,
            Step::ValidateAndLoad => PipelineState::Validating,
            Step::CreateIndexes => PipelineState::Indexing,
            Step::CleanUp => PipelineState::CleaningUp,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Step::Stage => "Loading data into staging",
            Step::EnsureSchema => "Ensuring main table exists",
            Step::ValidateAndLoad => "Validating and inserting data",
            Step::CreateIndexes => "Creating indexes",
            Step::CleanUp => "Cleaning up staging table",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Progress notifications emitted during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ProcessStarted,
    StepStarted(Step),
    StepCompleted(Step),
    StepFailed { step: Step, reason: String },
    ProcessCompleted,
    ProcessFailed { reason: String },
}

/// Receives pipeline progress
pub trait Reporter: Send + Sync {
    fn report(&self, event: &PipelineEvent);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, event: &PipelineEvent) {
        (**self).report(event)
    }
}

/// Reporter that turns events into `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ProcessStarted => info!("Starting transaction processing"),
            PipelineEvent::StepStarted(step) => info!(step = ?step, "{} started", step),
            PipelineEvent::StepCompleted(step) => info!(step = ?step, "{} completed", step),
            PipelineEvent::StepFailed { step, reason } => {
                error!(step = ?step, reason = %reason, "{} failed: {}", step, reason)
            },
            PipelineEvent::ProcessCompleted => {
                info!("Transaction processing completed successfully")
            },
            PipelineEvent::ProcessFailed { reason } => {
                error!(reason = %reason, "Transaction processing failed: {}", reason)
            },
        }
    }
}

/// The operations the orchestrator sequences
#[async_trait]
pub trait IngestSteps: Send + Sync {
    /// Replace staging with the rows of `source`; returns the staged count
    async fn stage(&self, source: &Path) -> IngestResult<u64>;

    async fn ensure_schema(&self) -> IngestResult<()>;

    async fn validate_and_load(&self) -> IngestResult<LoadStats>;

    async fn create_indexes(&self) -> IngestResult<()>;

    async fn clean_up(&self) -> IngestResult<()>;
}

/// PostgreSQL-backed pipeline steps
pub struct PgIngestSteps {
    staging: StagingLoader,
    schema: SchemaManager,
    loader: TransactionLoader,
}

impl PgIngestSteps {
    pub fn new(db: PgPool, loader: TransactionLoader) -> Self {
        Self {
            staging: StagingLoader::new(db.clone()),
            schema: SchemaManager::new(db),
            loader,
        }
    }

    /// Build the steps described by `config` (dedup policy and reject capture)
    pub fn from_config(db: PgPool, config: &IngestConfig) -> IngestResult<Self> {
        let validator = RecordValidator::new()
            .map_err(|e| IngestError::config(format!("invalid email pattern: {}", e)))?;

        let sink: Arc<dyn RejectSink> = if config.capture_rejects {
            Arc::new(PgRejectSink::new(db.clone()))
        } else {
            Arc::new(NoopRejectSink)
        };

        let loader =
            TransactionLoader::new(db.clone(), validator, config.dedup_policy).with_sink(sink);
        Ok(Self::new(db, loader))
    }
}

#[async_trait]
impl IngestSteps for PgIngestSteps {
    async fn stage(&self, source: &Path) -> IngestResult<u64> {
        self.staging.load(source).await
    }

    async fn ensure_schema(&self) -> IngestResult<()> {
        self.schema.ensure_table().await
    }

    async fn validate_and_load(&self) -> IngestResult<LoadStats> {
        self.loader.run().await
    }

    async fn create_indexes(&self) -> IngestResult<()> {
        self.schema.create_indexes().await
    }

    async fn clean_up(&self) -> IngestResult<()> {
        self.staging.clear().await
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub staged: u64,
    pub load: LoadStats,
    pub state: PipelineState,
    pub duration: Duration,
}

/// Sequences [`IngestSteps`] and tracks the run state
pub struct Orchestrator<S, R> {
    steps: S,
    reporter: R,
    state: PipelineState,
    failed_at: Option<Step>,
}

impl<S: IngestSteps, R: Reporter> Orchestrator<S, R> {
    pub fn new(steps: S, reporter: R) -> Self {
        Self {
            steps,
            reporter,
            state: PipelineState::Idle,
            failed_at: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The step that failed, if the last run failed
    pub fn failed_at(&self) -> Option<Step> {
        self.failed_at
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }

    /// Run the whole pipeline for one source file
    pub async fn run(&mut self, source: &Path) -> IngestResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, source = %source.display());
        self.execute(run_id, source).instrument(span).await
    }

    async fn execute(&mut self, run_id: Uuid, source: &Path) -> IngestResult<RunSummary> {
        let start = Instant::now();
        self.state = PipelineState::Idle;
        self.failed_at = None;
        self.reporter.report(&PipelineEvent::ProcessStarted);

        self.enter(Step::Stage);
        let result = self.steps.stage(source).await;
        let staged = self.complete(Step::Stage, result)?;

        self.enter(Step::EnsureSchema);
        let result = self.steps.ensure_schema().await;
        self.complete(Step::EnsureSchema, result)?;

        self.enter(Step::ValidateAndLoad);
        let result = self.steps.validate_and_load().await;
        let load = self.complete(Step::ValidateAndLoad, result)?;

        self.enter(Step::CreateIndexes);
        let result = self.steps.create_indexes().await;
        self.complete(Step::CreateIndexes, result)?;

        self.enter(Step::CleanUp);
        let result = self.steps.clean_up().await;
        self.complete(Step::CleanUp, result)?;

        self.state = PipelineState::Done;
        self.reporter.report(&PipelineEvent::ProcessCompleted);

        Ok(RunSummary {
            run_id,
            staged,
            load,
            state: self.state,
            duration: start.elapsed(),
        })
    }

    fn enter(&mut self, step: Step) {
        self.state = step.state();
        self.reporter.report(&PipelineEvent::StepStarted(step));
    }

    fn complete<T>(&mut self, step: Step, result: IngestResult<T>) -> IngestResult<T> {
        match result {
            Ok(value) => {
                self.reporter.report(&PipelineEvent::StepCompleted(step));
                Ok(value)
            },
            Err(err) => {
                self.state = PipelineState::Failed;
                self.failed_at = Some(step);
                let reason = err.to_string();
                self.reporter.report(&PipelineEvent::StepFailed {
                    step,
                    reason: reason.clone(),
                });
                self.reporter
                    .report(&PipelineEvent::ProcessFailed { reason });
                Err(err)
            },
        }
    }
}
