//! Hardlink materialization: zero-copy when the workspace shares a
//! filesystem with its pools, per-file copy fallback when it doesn't.

use async_trait::async_trait;

use crate::error::WorkbenchResult;
use crate::strategies::common::{materialize, Placement};
use crate::strategy::{
    PreparedWorkspace, StrategyContext, StrategyKind, WorkspaceConfiguration, WorkspaceStrategy,
};

pub struct HardlinkStrategy;

#[async_trait]
impl WorkspaceStrategy for HardlinkStrategy {
    fn name(&self) -> StrategyKind {
        StrategyKind::Hardlink
    }

    fn can_handle(&self, _config: &WorkspaceConfiguration) -> bool {
        // Cross-filesystem placement degrades to copy per file, so there is
        // no configuration this cannot serve.
        true
    }

    fn requires_admin_rights(&self) -> bool {
        false
    }

    fn estimate_disk_usage(&self, _config: &WorkspaceConfiguration) -> u64 {
        // Links cost directory entries only; assume same-filesystem.
        0
    }

    async fn prepare(
        &self,
        ctx: &StrategyContext<'_>,
        config: &WorkspaceConfiguration,
    ) -> WorkbenchResult<PreparedWorkspace> {
        materialize(ctx, config, Placement::Hardlink).await
    }
}
