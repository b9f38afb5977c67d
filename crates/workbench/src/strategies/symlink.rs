//! Symlink materialization: workspace entries point back into the CAS.
//!
//! Cheapest on space and works across filesystems, but the running game
//! sees symlinks, which some titles refuse to load, and creating them
//! needs elevation on Windows.

use async_trait::async_trait;

use crate::error::WorkbenchResult;
use crate::strategies::common::{materialize, Placement};
use crate::strategy::{
    PreparedWorkspace, StrategyContext, StrategyKind, WorkspaceConfiguration, WorkspaceStrategy,
};

pub struct SymlinkStrategy;

#[async_trait]
impl WorkspaceStrategy for SymlinkStrategy {
    fn name(&self) -> StrategyKind {
        StrategyKind::Symlink
    }

    fn can_handle(&self, _config: &WorkspaceConfiguration) -> bool {
        true
    }

    fn requires_admin_rights(&self) -> bool {
        cfg!(windows)
    }

    fn estimate_disk_usage(&self, _config: &WorkspaceConfiguration) -> u64 {
        0
    }

    async fn prepare(
        &self,
        ctx: &StrategyContext<'_>,
        config: &WorkspaceConfiguration,
    ) -> WorkbenchResult<PreparedWorkspace> {
        materialize(ctx, config, Placement::Symlink).await
    }
}
