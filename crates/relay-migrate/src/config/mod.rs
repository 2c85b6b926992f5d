//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::catalog::MigrationTarget;
use crate::error::{MigrateError, Result};
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Result<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.jobs.iter().map(|j| j.name.as_str()).collect();
            MigrateError::Config(format!(
                "unknown job '{}' (configured: {})",
                name,
                known.join(", ")
            ))
        })
    }

    /// Build the ordered target list for a job.
    pub fn targets(&self, job: &JobConfig) -> Vec<MigrationTarget> {
        job.objects
            .iter()
            .map(|name| MigrationTarget::new(name.as_str(), self.source.schema.as_str()))
            .collect()
    }
}

impl SourceConfig {
    /// Connection timeout for the source pool.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Interpret the `encrypt` setting; anything unrecognized means encrypted.
    pub fn encrypt_enabled(&self) -> bool {
        !matches!(
            self.encrypt.to_lowercase().as_str(),
            "false" | "no" | "0" | "disable"
        )
    }
}

impl TargetConfig {
    /// Connection timeout for the target pool.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  host: mssql.internal
  database: erp
  user: reader
  password: secret
  schema: SALES
target:
  host: pg.internal
  database: warehouse
  user: loader
  password: secret
  schema: sales
state:
  progress_file: state/progress.json
  lock_attempts: 3
  lock_poll_ms: 250
jobs:
  - name: views
    strategy: view
    signal: true
    objects: [ACTIVIDADES, DESCARGO1]
  - name: orders
    strategy: table
    objects: [ORDERS]
"#;

    #[test]
    fn test_load_full_config() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.state.lock_attempts, 3);
        assert_eq!(config.state.lock_poll_interval().as_millis(), 250);
        assert_eq!(config.state.lock_file, std::path::PathBuf::from("migration_progress.lock"));
        assert!(config.state.stale_lock_after().is_none());
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].strategy, StrategyKind::View);
        assert_eq!(config.jobs[0].remote_marker, "@");
        assert!(!config.jobs[1].signal);
        assert_eq!(config.source.connect_timeout().as_secs(), 30);
        assert_eq!(config.target.connect_timeout().as_secs(), 30);
    }

    #[test]
    fn test_ledger_keys_per_strategy() {
        assert_eq!(StrategyKind::Table.ledger_key("ORDERS"), "ORDERS");
        assert_eq!(StrategyKind::View.ledger_key("ORDERS"), "view/ORDERS");
        assert_eq!(StrategyKind::Structure.ledger_key("ORDERS"), "structure/ORDERS");
    }

    #[test]
    fn test_targets_follow_list_order() {
        let config = Config::from_yaml(YAML).unwrap();
        let job = config.job("views").unwrap();
        let targets = config.targets(job);
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["ACTIVIDADES", "DESCARGO1"]);
        assert!(targets.iter().all(|t| t.namespace == "SALES"));
    }

    #[test]
    fn test_unknown_job() {
        let config = Config::from_yaml(YAML).unwrap();
        let err = config.job("nightly").unwrap_err();
        assert!(err.to_string().contains("views, orders"));
    }

    #[test]
    fn test_encrypt_setting() {
        let mut config = Config::from_yaml(YAML).unwrap();
        assert!(config.source.encrypt_enabled());
        config.source.encrypt = "Disable".into();
        assert!(!config.source.encrypt_enabled());
        config.source.encrypt = "strict".into();
        assert!(config.source.encrypt_enabled());
    }
}
