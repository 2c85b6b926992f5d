//! Error types for the migration library.

use crate::migrator::MigrationPhase;
use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, etc.)
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the source or target cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when one or more objects failed to migrate.
pub const EXIT_MIGRATION_FAILED: u8 = 3;
/// Exit code for progress ledger and lock errors.
pub const EXIT_STATE_ERROR: u8 = 4;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Destination namespace could not be created
    #[error("Failed to create schema {schema}: {message}")]
    Schema { schema: String, message: String },

    /// The object does not exist on the source
    #[error("Object {namespace}.{object} not found on source")]
    ObjectNotFound { namespace: String, object: String },

    /// Data transfer failed for a specific object
    #[error("Transfer failed for {table}: {message}")]
    Transfer { table: String, message: String },

    /// A single object failed during one of its migration phases
    #[error("{target} failed while {}: {source}", phase.step())]
    Object {
        target: String,
        phase: MigrationPhase,
        #[source]
        source: Box<MigrateError>,
    },

    /// Progress ledger error
    #[error("State file error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Interchange file error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an ObjectNotFound error
    pub fn not_found(namespace: impl Into<String>, object: impl Into<String>) -> Self {
        MigrateError::ObjectNotFound {
            namespace: namespace.into(),
            object: object.into(),
        }
    }

    /// Wrap an error with the object and phase it happened in.
    pub fn in_phase(self, target: impl Into<String>, phase: MigrationPhase) -> Self {
        MigrateError::Object {
            target: target.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// Whether this error must abort the whole run regardless of the
    /// failure policy of the current flow.
    ///
    /// Only connectivity and schema-creation errors escalate.
    pub fn is_fatal(&self) -> bool {
        match self {
            MigrateError::Source(e) => is_connectivity_error(e),
            MigrateError::Target(e) => e.is_closed() || e.code().is_none(),
            MigrateError::Pool { .. } | MigrateError::Schema { .. } => true,
            MigrateError::Object { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Source(_) | MigrateError::Target(_) | MigrateError::Pool { .. } => {
                EXIT_CONNECTION_ERROR
            }
            MigrateError::State(_) | MigrateError::Json(_) => EXIT_STATE_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Object { source, .. } if source.is_fatal() => source.exit_code(),
            _ => EXIT_MIGRATION_FAILED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn is_connectivity_error(e: &tiberius::error::Error) -> bool {
    matches!(
        e,
        tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Routing { .. }
    )
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_fatal() {
        let err = MigrateError::not_found("dbo", "ORDERS");
        assert!(!err.is_fatal());
        assert_eq!(err.exit_code(), EXIT_MIGRATION_FAILED);
    }

    #[test]
    fn test_schema_error_is_fatal() {
        let err = MigrateError::Schema {
            schema: "sales".into(),
            message: "permission denied".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_phase_wrapping_keeps_fatality() {
        let err = MigrateError::pool("timed out", "target")
            .in_phase("ORDERS", MigrationPhase::Created);
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), EXIT_CONNECTION_ERROR);

        let err = MigrateError::not_found("dbo", "ORDERS").in_phase("ORDERS", MigrationPhase::Pending);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = MigrateError::transfer("sales.orders", "COPY rejected row 12")
            .in_phase("ORDERS", MigrationPhase::DataTransferred);
        let text = err.format_detailed();
        assert!(text.contains("ORDERS failed while transferring data"));
        assert!(text.contains("Caused by:"));
        assert!(text.contains("COPY rejected row 12"));
    }

    #[test]
    fn test_io_exit_code() {
        let err = MigrateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.exit_code(), EXIT_IO_ERROR);
    }
}
