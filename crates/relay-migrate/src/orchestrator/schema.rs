//! Destination namespace management.

use crate::catalog::TargetCatalog;
use crate::error::{MigrateError, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Ensures the destination namespace exists, at most once per run.
///
/// Creation is deferred until the first object actually needs it, so a run
/// where every object is skipped never touches the target.
pub struct SchemaSynchronizer {
    target: Arc<dyn TargetCatalog>,
    namespace: String,
    ensured: OnceCell<()>,
}

impl SchemaSynchronizer {
    pub fn new(target: Arc<dyn TargetCatalog>, namespace: impl Into<String>) -> Self {
        Self {
            target,
            namespace: namespace.into(),
            ensured: OnceCell::new(),
        }
    }

    /// Destination namespace name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create the namespace if this run has not done so yet.
    ///
    /// A failure is reported as [`MigrateError::Schema`], which aborts the
    /// run, and is retried by the next caller.
    pub async fn ensure(&self) -> Result<()> {
        self.ensured
            .get_or_try_init(|| async {
                info!("Ensuring target schema: {}", self.namespace);
                self.target
                    .ensure_namespace(&self.namespace)
                    .await
                    .map_err(|e| MigrateError::Schema {
                        schema: self.namespace.clone(),
                        message: e.to_string(),
                    })
            })
            .await?;
        debug!("Schema {} ready", self.namespace);
        Ok(())
    }
}
