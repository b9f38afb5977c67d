//! Hybrid materialization: hardlink what the CAS owns, copy what it
//! doesn't. The default strategy.

use async_trait::async_trait;

use crate::error::WorkbenchResult;
use crate::manifest::FileSource;
use crate::strategies::common::{estimate_copied_bytes, materialize, Placement};
use crate::strategy::{
    PreparedWorkspace, StrategyContext, StrategyKind, WorkspaceConfiguration, WorkspaceStrategy,
};

pub struct HybridStrategy;

#[async_trait]
impl WorkspaceStrategy for HybridStrategy {
    fn name(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn can_handle(&self, _config: &WorkspaceConfiguration) -> bool {
        true
    }

    fn requires_admin_rights(&self) -> bool {
        false
    }

    fn estimate_disk_usage(&self, config: &WorkspaceConfiguration) -> u64 {
        // Only locally-sourced files are physically copied.
        estimate_copied_bytes(config, |f| matches!(f.source, FileSource::Local { .. }))
    }

    async fn prepare(
        &self,
        ctx: &StrategyContext<'_>,
        config: &WorkspaceConfiguration,
    ) -> WorkbenchResult<PreparedWorkspace> {
        materialize(ctx, config, Placement::Hybrid).await
    }
}
