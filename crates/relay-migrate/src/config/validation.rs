//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.r#type != "mssql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mssql', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    // State validation
    if config.state.lock_attempts == 0 {
        return Err(MigrateError::Config(
            "state.lock_attempts must be at least 1".into(),
        ));
    }
    if config.state.progress_file == config.state.lock_file {
        return Err(MigrateError::Config(
            "state.progress_file and state.lock_file must differ".into(),
        ));
    }

    // Job validation
    if config.jobs.is_empty() {
        return Err(MigrateError::Config("at least one job is required".into()));
    }
    let mut job_names = HashSet::new();
    for job in &config.jobs {
        if job.name.is_empty() {
            return Err(MigrateError::Config("jobs[].name is required".into()));
        }
        if !job_names.insert(job.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "duplicate job name '{}'",
                job.name
            )));
        }
        if job.objects.is_empty() {
            return Err(MigrateError::Config(format!(
                "job '{}' has no objects",
                job.name
            )));
        }
        if job.remote_marker.is_empty() {
            return Err(MigrateError::Config(format!(
                "job '{}': remote_marker cannot be empty",
                job.name
            )));
        }
        let mut objects = HashSet::new();
        for object in &job.objects {
            if object.trim().is_empty() {
                return Err(MigrateError::Config(format!(
                    "job '{}' contains an empty object name",
                    job.name
                )));
            }
            if !objects.insert(object.as_str()) {
                return Err(MigrateError::Config(format!(
                    "job '{}' lists '{}' more than once",
                    job.name, object
                )));
            }
        }
    }

    Ok(())
}
