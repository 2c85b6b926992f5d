//! Materialization strategies: how a translated object lands on the target.

use crate::catalog::{MigrationTarget, SourceCatalog, TargetCatalog, TargetColumn};
use crate::config::StrategyKind;
use crate::error::Result;
use crate::transfer::InterchangeWriter;
use crate::translate;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do with the rest of the run when one object fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run at the first failure.
    Halt,
    /// Record the failure and continue with the next object. Fatal errors
    /// still stop the run.
    Contain,
}

/// Everything a strategy needs to materialize one object.
pub struct MaterializeContext<'a> {
    pub source: &'a dyn SourceCatalog,
    pub target: &'a dyn TargetCatalog,
    pub object: &'a MigrationTarget,
    pub columns: &'a [TargetColumn],
    pub target_namespace: &'a str,
    pub work_dir: &'a Path,
}

impl MaterializeContext<'_> {
    fn destination(&self) -> String {
        self.object.destination_name()
    }
}

/// Capability set of a migration flow: creating the destination object and
/// moving its data.
#[async_trait]
pub trait MaterializationStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Configuration kind this strategy implements.
    fn kind(&self) -> StrategyKind;

    /// Blast radius of a failed object.
    fn failure_policy(&self) -> FailurePolicy;

    /// Create (or replace) the destination object.
    async fn create(&self, ctx: &MaterializeContext<'_>) -> Result<()>;

    /// Move data into the destination. Returns the number of rows loaded,
    /// or `None` if this strategy carries no data.
    async fn transfer(&self, ctx: &MaterializeContext<'_>) -> Result<Option<u64>>;
}

/// Build the strategy for a job.
pub fn for_kind(kind: StrategyKind, remote_marker: &str) -> Arc<dyn MaterializationStrategy> {
    match kind {
        StrategyKind::Table => Arc::new(TableCopy),
        StrategyKind::View => Arc::new(ViewReplace::new(remote_marker)),
        StrategyKind::Structure => Arc::new(StructureOnly),
    }
}

async fn recreate_table(ctx: &MaterializeContext<'_>) -> Result<()> {
    let destination = ctx.destination();
    debug!("Dropping table: {}.{}", ctx.target_namespace, destination);
    ctx.target
        .drop_if_exists(ctx.target_namespace, &destination)
        .await?;

    debug!("Creating table: {}.{}", ctx.target_namespace, destination);
    ctx.target
        .create_table(ctx.target_namespace, &destination, ctx.columns)
        .await
}

/// Drop and recreate the table, then copy every row through a CSV file.
pub struct TableCopy;

#[async_trait]
impl MaterializationStrategy for TableCopy {
    fn name(&self) -> &'static str {
        "table"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Halt
    }

    async fn create(&self, ctx: &MaterializeContext<'_>) -> Result<()> {
        recreate_table(ctx).await
    }

    async fn transfer(&self, ctx: &MaterializeContext<'_>) -> Result<Option<u64>> {
        let destination = ctx.destination();
        let header: Vec<String> = ctx.columns.iter().map(|c| c.name.clone()).collect();

        let mut writer = InterchangeWriter::create(ctx.work_dir, &destination, &header)?;
        ctx.source
            .stream_rows(&ctx.object.namespace, &ctx.object.name, &mut writer)
            .await?;
        let data = writer.finish()?;
        debug!(
            "{}: {} rows written to {:?}",
            ctx.object.name,
            data.record_count(),
            data.path()
        );

        let loaded = match ctx
            .target
            .bulk_load(ctx.target_namespace, &destination, &data)
            .await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    "{}: load failed, keeping {:?} for inspection",
                    ctx.object.name,
                    data.path()
                );
                return Err(e);
            }
        };

        data.remove()?;
        Ok(Some(loaded))
    }
}

/// Create or replace a view from the source definition, with remote
/// references stripped.
pub struct ViewReplace {
    marker: String,
}

impl ViewReplace {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl MaterializationStrategy for ViewReplace {
    fn name(&self) -> &'static str {
        "view"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::View
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Contain
    }

    async fn create(&self, ctx: &MaterializeContext<'_>) -> Result<()> {
        let raw = ctx
            .source
            .view_definition(&ctx.object.namespace, &ctx.object.name)
            .await?;

        let removed = translate::removed_lines(&raw, &self.marker);
        if removed > 0 {
            info!(
                "{}: removed {} remote-reference line(s) from definition",
                ctx.object.name, removed
            );
        }
        let definition = translate::translate_with(&raw, &self.marker);

        ctx.target
            .create_or_replace_view(ctx.target_namespace, &ctx.destination(), &definition)
            .await
    }

    async fn transfer(&self, _ctx: &MaterializeContext<'_>) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Recreate the table structure only.
pub struct StructureOnly;

#[async_trait]
impl MaterializationStrategy for StructureOnly {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Structure
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Halt
    }

    async fn create(&self, ctx: &MaterializeContext<'_>) -> Result<()> {
        recreate_table(ctx).await
    }

    async fn transfer(&self, _ctx: &MaterializeContext<'_>) -> Result<Option<u64>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies() {
        assert_eq!(
            for_kind(StrategyKind::Table, "@").failure_policy(),
            FailurePolicy::Halt
        );
        assert_eq!(
            for_kind(StrategyKind::View, "@").failure_policy(),
            FailurePolicy::Contain
        );
        assert_eq!(
            for_kind(StrategyKind::Structure, "@").failure_policy(),
            FailurePolicy::Halt
        );
    }

    #[test]
    fn test_names_match_config_kinds() {
        for kind in [StrategyKind::Table, StrategyKind::View, StrategyKind::Structure] {
            let strategy = for_kind(kind, "@");
            assert_eq!(strategy.name(), kind.to_string());
            assert_eq!(strategy.kind(), kind);
        }
    }
}
