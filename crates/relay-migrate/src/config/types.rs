//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Progress ledger, lock and signal file locations.
    #[serde(default)]
    pub state: StateConfig,

    /// Named migration jobs. Each job is one object list run with one strategy.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "mssql" for now).
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema owning the objects to migrate (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a connection before giving up (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Destination schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a connection before giving up (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Locations of the on-disk state shared between processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON ledger of object name to migrated row count.
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,

    /// Lock marker guarding the ledger.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Run outcome signal consumed by `launch`.
    #[serde(default = "default_signal_file")]
    pub signal_file: PathBuf,

    /// Directory for transient CSV interchange files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory for per-job logs written by `launch`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Lock polls before giving up on a ledger update (default: 5).
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,

    /// Delay between lock polls in milliseconds (default: 1000).
    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,

    /// Age in seconds after which a lock marker is considered abandoned.
    /// Unset means a marker is never broken automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_lock_secs: Option<u64>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            progress_file: default_progress_file(),
            lock_file: default_lock_file(),
            signal_file: default_signal_file(),
            work_dir: default_work_dir(),
            log_dir: default_log_dir(),
            lock_attempts: default_lock_attempts(),
            lock_poll_ms: default_lock_poll_ms(),
            stale_lock_secs: None,
        }
    }
}

impl StateConfig {
    /// Delay between lock polls.
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    /// Age after which a lock marker may be broken.
    pub fn stale_lock_after(&self) -> Option<Duration> {
        self.stale_lock_secs.map(Duration::from_secs)
    }
}

/// One named migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, used by `run --job` and for launcher log files.
    pub name: String,

    /// How each object is materialized on the target.
    pub strategy: StrategyKind,

    /// Source object names, migrated in list order.
    pub objects: Vec<String>,

    /// Write the run outcome to the signal file (default: false).
    #[serde(default)]
    pub signal: bool,

    /// Marker identifying remote-reference lines in view definitions (default: "@").
    #[serde(default = "default_remote_marker")]
    pub remote_marker: String,
}

/// Materialization strategy selected per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Drop, recreate and copy all rows through a CSV interchange file.
    #[default]
    Table,
    /// Create or replace a view from the translated source definition.
    View,
    /// Drop and recreate the table without copying data.
    Structure,
}

impl StrategyKind {
    /// Progress ledger key of `object` under this strategy.
    ///
    /// Table copies are keyed by the bare object name. Strategies that commit
    /// no rows are keyed `<strategy>/<name>`, so their entries never satisfy
    /// the skip check of a table copy of the same object.
    pub fn ledger_key(&self, object: &str) -> String {
        match self {
            StrategyKind::Table => object.to_string(),
            StrategyKind::View | StrategyKind::Structure => format!("{}/{}", self, object),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Table => write!(f, "table"),
            StrategyKind::View => write!(f, "view"),
            StrategyKind::Structure => write!(f, "structure"),
        }
    }
}

fn default_mssql() -> String {
    "mssql".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_progress_file() -> PathBuf {
    PathBuf::from("migration_progress.json")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("migration_progress.lock")
}

fn default_signal_file() -> PathBuf {
    PathBuf::from("migration_ok.txt")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("csv_output")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_lock_attempts() -> u32 {
    5
}

fn default_lock_poll_ms() -> u64 {
    1000
}

fn default_remote_marker() -> String {
    crate::translate::REMOTE_MARKER.to_string()
}
