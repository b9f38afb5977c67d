//! Full-copy materialization: the workspace owns independent bytes.
//!
//! Most expensive in space and time, but the result has no link back to
//! the CAS at all - safe for games that rewrite their own files in place.

use async_trait::async_trait;

use crate::error::WorkbenchResult;
use crate::strategies::common::{estimate_copied_bytes, materialize, Placement};
use crate::strategy::{
    PreparedWorkspace, StrategyContext, StrategyKind, WorkspaceConfiguration, WorkspaceStrategy,
};

pub struct CopyStrategy;

#[async_trait]
impl WorkspaceStrategy for CopyStrategy {
    fn name(&self) -> StrategyKind {
        StrategyKind::Copy
    }

    fn can_handle(&self, _config: &WorkspaceConfiguration) -> bool {
        true
    }

    fn requires_admin_rights(&self) -> bool {
        false
    }

    fn estimate_disk_usage(&self, config: &WorkspaceConfiguration) -> u64 {
        estimate_copied_bytes(config, |_| true)
    }

    async fn prepare(
        &self,
        ctx: &StrategyContext<'_>,
        config: &WorkspaceConfiguration,
    ) -> WorkbenchResult<PreparedWorkspace> {
        materialize(ctx, config, Placement::Copy).await
    }
}
