//! Signal-gated launcher for dependent jobs.
//!
//! Each job runs as a separate `relay-migrate run` process with its output
//! sent to `<log_dir>/<job>.log`. The processes share nothing but the
//! progress file.

use futures::future::join_all;
use relay_migrate::{Config, MigrateError, RunSignal};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Flags forwarded to every child process.
pub struct ChildOptions<'a> {
    pub config_path: &'a Path,
    pub verbosity: &'a str,
    pub log_format: &'a str,
}

/// Result of a launch.
#[derive(Debug, Default)]
pub struct LaunchSummary {
    /// False when the signal did not allow a launch.
    pub launched: bool,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Jobs started when none are named: every job that does not itself write the
/// signal.
pub fn default_jobs(config: &Config) -> Vec<String> {
    config
        .jobs
        .iter()
        .filter(|j| !j.signal)
        .map(|j| j.name.clone())
        .collect()
}

/// Start `jobs` in parallel if the signal file reads `true`, and wait for all
/// of them.
pub async fn launch(
    config: &Config,
    jobs: &[String],
    options: &ChildOptions<'_>,
) -> Result<LaunchSummary, MigrateError> {
    for name in jobs {
        config.job(name)?;
    }

    let signal = RunSignal::new(&config.state.signal_file);
    if !signal.is_go()? {
        warn!(
            "Signal {:?} is not 'true'; not launching {} job(s)",
            signal.path(),
            jobs.len()
        );
        return Ok(LaunchSummary::default());
    }

    std::fs::create_dir_all(&config.state.log_dir)?;
    let exe = std::env::current_exe()?;

    let mut children = Vec::with_capacity(jobs.len());
    for name in jobs {
        let log_path = log_file(&config.state.log_dir, name);
        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let child = Command::new(&exe)
            .arg("--config")
            .arg(options.config_path)
            .args(["--verbosity", options.verbosity])
            .args(["--log-format", options.log_format])
            .args(["run", "--job"])
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()?;

        info!(
            "Launched job {} (pid {}), logging to {:?}",
            name,
            child.id().unwrap_or_default(),
            log_path
        );
        children.push((name.clone(), child));
    }

    let waits = children.into_iter().map(|(name, mut child)| async move {
        let status = child.wait().await;
        (name, status)
    });

    let mut summary = LaunchSummary {
        launched: true,
        ..Default::default()
    };
    for (name, status) in join_all(waits).await {
        match status {
            Ok(status) if status.success() => {
                info!("{}: finished", name);
                summary.succeeded.push(name);
            }
            Ok(status) => {
                error!("{}: exited with {}", name, status);
                summary.failed.push(name);
            }
            Err(e) => {
                error!("{}: could not wait for process - {}", name, e);
                summary.failed.push(name);
            }
        }
    }

    Ok(summary)
}

fn log_file(log_dir: &Path, job: &str) -> PathBuf {
    log_dir.join(format!("{}.log", job))
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source: { host: erp, database: erp, user: u, password: p }
target: { host: dw, database: dw, user: u, password: p }
jobs:
  - { name: views, strategy: view, signal: true, objects: [V1] }
  - { name: orders, strategy: table, objects: [ORDERS] }
  - { name: shells, strategy: structure, objects: [AUDIT] }
"#;

    #[test]
    fn test_default_jobs_skip_signal_writers() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(default_jobs(&config), vec!["orders", "shells"]);
    }

    #[test]
    fn test_log_file_per_job() {
        assert_eq!(
            log_file(Path::new("logs"), "orders"),
            PathBuf::from("logs/orders.log")
        );
    }

    #[tokio::test]
    async fn test_no_signal_launches_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::from_yaml(YAML).unwrap();
        config.state.signal_file = dir.path().join("migration_ok.txt");
        config.state.log_dir = dir.path().join("logs");
        std::fs::write(&config.state.signal_file, "false").unwrap();

        let options = ChildOptions {
            config_path: Path::new("config.yaml"),
            verbosity: "info",
            log_format: "text",
        };
        let summary = launch(&config, &default_jobs(&config), &options)
            .await
            .unwrap();
        assert!(!summary.launched);
        assert!(!config.state.log_dir.exists());
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let config = Config::from_yaml(YAML).unwrap();
        let options = ChildOptions {
            config_path: Path::new("config.yaml"),
            verbosity: "info",
            log_format: "text",
        };
        let err = launch(&config, &["nightly".to_string()], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
