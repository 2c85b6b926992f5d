//! # relay-migrate
//!
//! Incremental, resumable migration of views and tables from a source
//! relational engine into PostgreSQL.
//!
//! Each job walks a configured object list and, per object:
//!
//! - **Skips** it when the source row count equals the count recorded by the
//!   last successful migration
//! - **Recreates** it otherwise, as a view (definition translated), a table
//!   copied through a CSV interchange file, or an empty table
//! - **Records** the new count in a JSON progress file shared between
//!   processes under an advisory lock file
//!
//! The run outcome can be written to a signal file that gates downstream jobs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> relay_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run("views", CancellationToken::new()).await?;
//!     println!("{}: {}", report.job, report.outcome.as_token());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod migrator;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod translate;
pub mod typemap;

// Re-exports for convenient access
pub use catalog::{MigrationTarget, SourceCatalog, TargetCatalog};
pub use config::{Config, JobConfig, SourceConfig, StrategyKind, TargetConfig};
pub use error::{MigrateError, Result};
pub use migrator::{MigrationPhase, ObjectMigrator, TargetReport};
pub use orchestrator::{HealthCheckResult, Orchestrator, RunReport, ValidationEntry};
pub use source::MssqlSource;
pub use state::{ProgressStore, RunOutcome, RunSignal};
pub use target::PgTarget;
