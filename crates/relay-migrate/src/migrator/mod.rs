//! Per-object migration state machine.
//!
//! ```text
//! PENDING -> STRUCTURE_READ -> SKIPPED
//!                           -> CREATED -> DATA_TRANSFERRED -> RECORDED
//! ```
//!
//! Any failing step ends in FAILED. What happens to the rest of the run is
//! decided by the caller from the strategy's [`FailurePolicy`].

pub mod strategy;

pub use strategy::{
    for_kind, FailurePolicy, MaterializationStrategy, MaterializeContext, StructureOnly,
    TableCopy, ViewReplace,
};

use crate::catalog::{MigrationTarget, SourceCatalog, TargetCatalog};
use crate::error::{MigrateError, Result};
use crate::orchestrator::SchemaSynchronizer;
use crate::state::{ProgressStore, RecordOutcome};
use crate::typemap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of one object within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Pending,
    StructureRead,
    Skipped,
    Created,
    DataTransferred,
    Recorded,
    Failed,
}

impl MigrationPhase {
    /// Human description of the work done to enter this phase.
    pub fn step(&self) -> &'static str {
        match self {
            MigrationPhase::Pending => "starting",
            MigrationPhase::StructureRead => "reading structure",
            MigrationPhase::Skipped => "skipping",
            MigrationPhase::Created => "creating destination",
            MigrationPhase::DataTransferred => "transferring data",
            MigrationPhase::Recorded => "recording progress",
            MigrationPhase::Failed => "failing",
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationPhase::Pending => "pending",
            MigrationPhase::StructureRead => "structure_read",
            MigrationPhase::Skipped => "skipped",
            MigrationPhase::Created => "created",
            MigrationPhase::DataTransferred => "data_transferred",
            MigrationPhase::Recorded => "recorded",
            MigrationPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Result of migrating one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    /// Source object name.
    pub name: String,

    /// Destination object name.
    pub destination: String,

    /// Last phase reached.
    pub phase: MigrationPhase,

    /// Source row count read in the structure phase.
    pub source_rows: Option<u64>,

    /// Rows bulk-loaded, for strategies that carry data.
    pub rows_loaded: Option<u64>,

    /// Whether the ledger was updated.
    pub recorded: bool,

    /// Error text for failed objects.
    pub error: Option<String>,
}

impl TargetReport {
    fn new(object: &MigrationTarget, phase: MigrationPhase) -> Self {
        Self {
            name: object.name.clone(),
            destination: object.destination_name(),
            phase,
            source_rows: None,
            rows_loaded: None,
            recorded: false,
            error: None,
        }
    }

    /// Report for an object that failed with `error`.
    pub fn failed(object: &MigrationTarget, error: &MigrateError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(object, MigrationPhase::Failed)
        }
    }

    /// Migrated, or already up to date.
    pub fn is_success(&self) -> bool {
        matches!(
            self.phase,
            MigrationPhase::Skipped | MigrationPhase::DataTransferred | MigrationPhase::Recorded
        )
    }
}

/// Drives one object through the phases with a given strategy.
pub struct ObjectMigrator {
    source: Arc<dyn SourceCatalog>,
    target: Arc<dyn TargetCatalog>,
    progress: Arc<ProgressStore>,
    strategy: Arc<dyn MaterializationStrategy>,
    schema: Arc<SchemaSynchronizer>,
    work_dir: PathBuf,
}

impl ObjectMigrator {
    pub fn new(
        source: Arc<dyn SourceCatalog>,
        target: Arc<dyn TargetCatalog>,
        progress: Arc<ProgressStore>,
        strategy: Arc<dyn MaterializationStrategy>,
        schema: Arc<SchemaSynchronizer>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            target,
            progress,
            strategy,
            schema,
            work_dir: work_dir.into(),
        }
    }

    /// Migrate one object.
    ///
    /// `recorded` is the ledger entry for the object under this strategy's
    /// key (see [`StrategyKind::ledger_key`]) as of the start of the run. An
    /// object whose current source count equals it is skipped without
    /// touching the target. Errors come back wrapped with the phase that
    /// failed.
    ///
    /// [`StrategyKind::ledger_key`]: crate::config::StrategyKind::ledger_key
    pub async fn migrate(
        &self,
        object: &MigrationTarget,
        recorded: Option<u64>,
    ) -> Result<TargetReport> {
        let mut phase = MigrationPhase::Pending;
        match self.run_phases(object, recorded, &mut phase).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("{}: failed while {} - {}", object.name, phase.step(), e);
                Err(e.in_phase(&object.name, phase))
            }
        }
    }

    async fn run_phases(
        &self,
        object: &MigrationTarget,
        recorded: Option<u64>,
        phase: &mut MigrationPhase,
    ) -> Result<TargetReport> {
        *phase = MigrationPhase::StructureRead;
        let source_rows = self
            .source
            .row_count(&object.namespace, &object.name)
            .await?;

        if recorded == Some(source_rows) {
            info!(
                "{}: already migrated with {} rows, skipping",
                object.name, source_rows
            );
            let mut report = TargetReport::new(object, MigrationPhase::Skipped);
            report.source_rows = Some(source_rows);
            return Ok(report);
        }

        let descriptors = self.source.columns(&object.namespace, &object.name).await?;
        if descriptors.is_empty() {
            return Err(MigrateError::not_found(&object.namespace, &object.name));
        }
        let columns = typemap::map_columns(&descriptors);
        debug!(
            "{}: {} rows, {} columns (recorded: {:?})",
            object.full_name(),
            source_rows,
            columns.len(),
            recorded
        );

        *phase = MigrationPhase::Created;
        self.schema.ensure().await?;
        let ctx = MaterializeContext {
            source: self.source.as_ref(),
            target: self.target.as_ref(),
            object,
            columns: &columns,
            target_namespace: self.schema.namespace(),
            work_dir: &self.work_dir,
        };
        self.strategy.create(&ctx).await?;

        *phase = MigrationPhase::DataTransferred;
        let rows_loaded = self.strategy.transfer(&ctx).await?;
        if let Some(loaded) = rows_loaded {
            if loaded != source_rows {
                warn!(
                    "{}: loaded {} rows but source reported {}",
                    object.name, loaded, source_rows
                );
            }
        }

        *phase = MigrationPhase::Recorded;
        let mut report = TargetReport::new(object, MigrationPhase::DataTransferred);
        report.source_rows = Some(source_rows);
        report.rows_loaded = rows_loaded;

        let key = self.strategy.kind().ledger_key(&object.name);
        match self.progress.record_completion(&key, source_rows).await?
        {
            RecordOutcome::Written => {
                report.phase = MigrationPhase::Recorded;
                report.recorded = true;
            }
            RecordOutcome::LockTimeout => {
                warn!(
                    "{}: migrated but not recorded; the next run will migrate it again",
                    object.name
                );
            }
        }

        match rows_loaded {
            Some(rows) => info!("{}: completed ({} rows)", object.name, rows),
            None => info!("{}: completed ({})", object.name, self.strategy.name()),
        }
        Ok(report)
    }
}
