//! Run coordinator - drives one job over its object list.

mod schema;

pub use schema::SchemaSynchronizer;

use crate::catalog::{SourceCatalog, TargetCatalog};
use crate::config::{Config, JobConfig};
use crate::error::{MigrateError, Result};
use crate::migrator::{self, FailurePolicy, MigrationPhase, ObjectMigrator, TargetReport};
use crate::source::MssqlSource;
use crate::state::{ProgressStore, RunOutcome, RunSignal};
use crate::target::PgTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceCatalog>,
    target: Arc<dyn TargetCatalog>,
    progress: Arc<ProgressStore>,
}

/// Result of a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Job name.
    pub job: String,

    /// Materialization strategy of the job.
    pub strategy: String,

    /// Final status: completed, failed, halted or cancelled.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Objects configured for the job.
    pub targets_total: usize,

    /// Objects migrated in this run.
    pub targets_migrated: usize,

    /// Objects skipped because they were already up to date.
    pub targets_skipped: usize,

    /// Objects that failed.
    pub targets_failed: usize,

    /// Total rows bulk-loaded.
    pub rows_transferred: u64,

    /// List of failed object names.
    pub failed_targets: Vec<String>,

    /// Per-object results, in list order.
    pub targets: Vec<TargetReport>,

    /// Overall outcome, as written to the signal file.
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Row counts of one object across source, ledger and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub name: String,

    /// `None` if the object is missing on the source.
    pub source_rows: Option<u64>,

    /// Ledger entry, `None` if never completed.
    pub recorded_rows: Option<u64>,

    /// `None` if the destination object does not exist.
    pub target_rows: Option<u64>,
}

impl ValidationEntry {
    /// Source, ledger and target all agree.
    pub fn in_sync(&self) -> bool {
        self.source_rows.is_some()
            && self.source_rows == self.recorded_rows
            && self.source_rows == self.target_rows
    }
}

/// Connectivity of both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_db_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_db_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Connect to the configured source and target.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MssqlSource::new(&config.source).await?;
        let target = PgTarget::new(&config.target).await?;
        Ok(Self::with_catalogs(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over already-connected catalogs.
    pub fn with_catalogs(
        config: Config,
        source: Arc<dyn SourceCatalog>,
        target: Arc<dyn TargetCatalog>,
    ) -> Self {
        let progress = Arc::new(ProgressStore::from_config(&config.state));
        Self {
            config,
            source,
            target,
            progress,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Run one job.
    ///
    /// Per-object failures are reported in the returned [`RunReport`]; only
    /// fatal errors come back as `Err`. When the job has `signal: true` the
    /// outcome is written to the signal file on every path, `false` when the
    /// run aborts.
    pub async fn run(&self, job_name: &str, cancel: CancellationToken) -> Result<RunReport> {
        let job = self.config.job(job_name)?;
        let signal = job
            .signal
            .then(|| RunSignal::new(&self.config.state.signal_file));

        match self.run_job(job, &cancel).await {
            Ok(report) => {
                if let Some(signal) = &signal {
                    signal.write(report.outcome)?;
                    info!(
                        "Wrote run outcome '{}' to {:?}",
                        report.outcome.as_token(),
                        signal.path()
                    );
                }
                Ok(report)
            }
            Err(e) => {
                if let Some(signal) = &signal {
                    if let Err(write_err) = signal.write(RunOutcome::failed()) {
                        warn!("Failed to write signal {:?}: {}", signal.path(), write_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_job(&self, job: &JobConfig, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let strategy = migrator::for_kind(job.strategy, &job.remote_marker);
        let policy = strategy.failure_policy();
        let targets = self.config.targets(job);

        info!(
            "Starting {} run {} for job {} ({} objects)",
            strategy.name(),
            run_id,
            job.name,
            targets.len()
        );

        // One snapshot per run; objects are keyed uniquely so no entry is read twice.
        let recorded = self.progress.load()?;
        let recorded_rows =
            |name: &str| recorded.get(&job.strategy.ledger_key(name)).copied();

        let schema = Arc::new(SchemaSynchronizer::new(
            self.target.clone(),
            &self.config.target.schema,
        ));
        let migrator = ObjectMigrator::new(
            self.source.clone(),
            self.target.clone(),
            self.progress.clone(),
            strategy.clone(),
            schema,
            &self.config.state.work_dir,
        );

        let mut outcome = RunOutcome::new();
        let mut reports = Vec::with_capacity(targets.len());
        let mut status = None;

        for target in &targets {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping before {}", target.name);
                outcome.absorb(false);
                status = Some("cancelled");
                break;
            }

            match migrator
                .migrate(target, recorded_rows(&target.name))
                .await
            {
                Ok(report) => {
                    outcome.absorb(report.is_success());
                    reports.push(report);
                }
                Err(e) if e.is_fatal() => {
                    error!("{}: fatal error, aborting run {} - {}", target.name, run_id, e);
                    return Err(e);
                }
                Err(e) => {
                    outcome.absorb(false);
                    reports.push(TargetReport::failed(target, &e));
                    if policy == FailurePolicy::Halt {
                        warn!(
                            "Halting job {} after failure of {}; {} object(s) not attempted",
                            job.name,
                            target.name,
                            targets.len() - reports.len()
                        );
                        status = Some("halted");
                        break;
                    }
                }
            }
        }

        let completed_at = Utc::now();
        let status = status.unwrap_or(if outcome.is_success() {
            "completed"
        } else {
            "failed"
        });
        let report = build_report(
            run_id,
            job,
            strategy.name(),
            status,
            started_at,
            completed_at,
            timer.elapsed().as_secs_f64(),
            targets.len(),
            reports,
            outcome,
        );

        info!(
            "Job {} {}: {} migrated, {} skipped, {} failed, {} rows in {:.1}s",
            report.job,
            report.status,
            report.targets_migrated,
            report.targets_skipped,
            report.targets_failed,
            report.rows_transferred,
            report.duration_seconds
        );

        Ok(report)
    }

    /// Compare source, ledger and target row counts for every object of a job.
    /// Read-only.
    pub async fn validate(&self, job_name: &str) -> Result<Vec<ValidationEntry>> {
        let job = self.config.job(job_name)?;
        let target_schema = &self.config.target.schema;
        let recorded = self.progress.load()?;
        let mut results = Vec::new();

        for target in self.config.targets(job) {
            let source_rows = match self
                .source
                .row_count(&target.namespace, &target.name)
                .await
            {
                Ok(count) => Some(count),
                Err(MigrateError::ObjectNotFound { .. }) => None,
                Err(e) => return Err(e),
            };
            let target_rows = self
                .target
                .row_count(target_schema, &target.destination_name())
                .await?;

            let key = job.strategy.ledger_key(&target.name);
            let entry = ValidationEntry {
                recorded_rows: recorded.get(&key).copied(),
                name: target.name,
                source_rows,
                target_rows,
            };

            if entry.in_sync() {
                info!("{}: {:?} rows (match)", entry.name, entry.source_rows);
            } else {
                warn!(
                    "{}: source={:?} recorded={:?} target={:?} (MISMATCH)",
                    entry.name, entry.source_rows, entry.recorded_rows, entry.target_rows
                );
            }
            results.push(entry);
        }

        Ok(results)
    }

    /// Ping both databases.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_db_type: self.source.db_type().to_string(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_db_type: self.target.db_type().to_string(),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    run_id: String,
    job: &JobConfig,
    strategy: &str,
    status: &str,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_seconds: f64,
    targets_total: usize,
    targets: Vec<TargetReport>,
    outcome: RunOutcome,
) -> RunReport {
    let targets_skipped = targets
        .iter()
        .filter(|t| t.phase == MigrationPhase::Skipped)
        .count();
    let targets_migrated = targets
        .iter()
        .filter(|t| t.is_success() && t.phase != MigrationPhase::Skipped)
        .count();
    let failed_targets: Vec<String> = targets
        .iter()
        .filter(|t| !t.is_success())
        .map(|t| t.name.clone())
        .collect();
    let rows_transferred = targets.iter().filter_map(|t| t.rows_loaded).sum();

    RunReport {
        run_id,
        job: job.name.clone(),
        strategy: strategy.to_string(),
        status: status.to_string(),
        duration_seconds,
        started_at,
        completed_at,
        targets_total,
        targets_migrated,
        targets_skipped,
        targets_failed: failed_targets.len(),
        rows_transferred,
        failed_targets,
        targets,
        outcome,
    }
}
