//! Collaborator interfaces to the source and target engines.
//!
//! The migration core never issues SQL directly. It talks to a
//! [`SourceCatalog`] and a [`TargetCatalog`]; concrete implementations live in
//! [`crate::source`] and [`crate::target`].

#[cfg(test)]
pub(crate) mod memory;

use crate::error::Result;
use crate::transfer::Interchange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One row as read from the source. `None` is SQL NULL.
pub type Record = Vec<Option<String>>;

/// One source object to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTarget {
    /// Source object name. Also the key in the progress ledger.
    pub name: String,

    /// Source namespace (schema) owning the object.
    pub namespace: String,
}

impl MigrationTarget {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Name of the object on the target (lower-cased source name).
    pub fn destination_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Get the fully qualified source name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Source column as declared in the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared source type name (e.g. "VARCHAR2", "NUMBER").
    pub source_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
        }
    }
}

/// Column translated for the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColumn {
    /// Column name on the target.
    pub name: String,

    /// Target type name (e.g. "TEXT", "NUMERIC").
    pub target_type: String,
}

/// Receives records pushed by [`SourceCatalog::stream_rows`].
pub trait RecordSink: Send {
    /// Append one record.
    fn write_record(&mut self, record: &[Option<String>]) -> Result<()>;
}

impl RecordSink for Vec<Record> {
    fn write_record(&mut self, record: &[Option<String>]) -> Result<()> {
        self.push(record.to_vec());
        Ok(())
    }
}

/// Read side of a migration.
///
/// All calls are blocking from the migrator's point of view: it awaits each
/// one before issuing the next and applies no timeout.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Current number of rows in the object.
    ///
    /// Fails with [`crate::MigrateError::ObjectNotFound`] if the object does
    /// not exist.
    async fn row_count(&self, namespace: &str, object: &str) -> Result<u64>;

    /// Column structure of the object, in ordinal order.
    async fn columns(&self, namespace: &str, object: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Push every row of the object into `sink`, in one pass.
    ///
    /// Returns the number of records written.
    async fn stream_rows(
        &self,
        namespace: &str,
        object: &str,
        sink: &mut dyn RecordSink,
    ) -> Result<u64>;

    /// Body of a view's SQL definition (the query text, without the
    /// `CREATE VIEW ... AS` header).
    async fn view_definition(&self, namespace: &str, object: &str) -> Result<String>;

    /// Check the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;
}

/// Write side of a migration.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    /// Create a namespace if it doesn't exist. Concurrent callers for the
    /// same name must not fail.
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Drop a table if it exists.
    async fn drop_if_exists(&self, namespace: &str, object: &str) -> Result<()>;

    /// Create a table with the given columns.
    async fn create_table(
        &self,
        namespace: &str,
        object: &str,
        columns: &[TargetColumn],
    ) -> Result<()>;

    /// Create a view, replacing any existing view of the same name in place.
    async fn create_or_replace_view(
        &self,
        namespace: &str,
        object: &str,
        definition: &str,
    ) -> Result<()>;

    /// Bulk-load a finished interchange file into an existing table.
    ///
    /// Returns the number of rows loaded.
    async fn bulk_load(&self, namespace: &str, object: &str, data: &Interchange) -> Result<u64>;

    /// Row count of a destination object, `None` if it does not exist.
    async fn row_count(&self, namespace: &str, object: &str) -> Result<Option<u64>>;

    /// Check the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_name_is_lowercase() {
        let target = MigrationTarget::new("AVANCE_MANT_RHELEC", "ERP");
        assert_eq!(target.destination_name(), "avance_mant_rhelec");
        assert_eq!(target.full_name(), "ERP.AVANCE_MANT_RHELEC");
    }

    #[test]
    fn test_vec_sink_collects_records() {
        let mut sink: Vec<Record> = Vec::new();
        sink.write_record(&[Some("1".into()), None]).unwrap();
        sink.write_record(&[Some("2".into()), Some("x".into())]).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0][1], None);
    }
}
