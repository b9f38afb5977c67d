//! WorkspaceStrategy: pluggable file placement.
//!
//! A strategy decides *how* bytes land in the workspace (hardlink, symlink,
//! full copy, or a hybrid); the reconciler decides *what* lands. The manager
//! picks the first strategy whose `can_handle` accepts the configuration -
//! capability is a question you ask the strategy, never something inferred
//! from its concrete type.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use cas::CasPoolManager;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::WorkbenchResult;
use crate::manifest::ContentManifest;

/// The materialization strategies this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Hardlink,
    Symlink,
    Copy,
    Hybrid,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Hardlink => "hardlink",
            StrategyKind::Symlink => "symlink",
            StrategyKind::Copy => "copy",
            StrategyKind::Hybrid => "hybrid",
        };
        write!(f, "{name}")
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hardlink" => Ok(StrategyKind::Hardlink),
            "symlink" => Ok(StrategyKind::Symlink),
            "copy" => Ok(StrategyKind::Copy),
            "hybrid" => Ok(StrategyKind::Hybrid),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Input to one preparation request. Constructed fresh per call, never
/// persisted.
#[derive(Debug, Clone)]
pub struct WorkspaceConfiguration {
    pub workspace_id: String,
    /// Target root directory of the materialized workspace.
    pub root: PathBuf,
    /// Manifests in install order; later entries shadow earlier ones at
    /// equal content-kind priority.
    pub manifests: Vec<ContentManifest>,
    /// Explicit strategy selection; None lets the manager pick the first
    /// capable strategy.
    pub strategy: Option<StrategyKind>,
    /// Wipe and rebuild instead of diffing against the existing directory.
    /// The manager also sets this when any manifest version changed.
    pub force_recreate: bool,
    /// Run file-level validation after preparation and record the result.
    pub validate_after_prepare: bool,
}

impl WorkspaceConfiguration {
    pub fn new(workspace_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            root: root.into(),
            manifests: Vec::new(),
            strategy: None,
            force_recreate: false,
            validate_after_prepare: false,
        }
    }

    pub fn with_manifests(mut self, manifests: Vec<ContentManifest>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = Some(kind);
        self
    }
}

/// Progress reporting for long preparations.
pub trait ProgressSink: Send + Sync {
    /// Called once per file placed or removed.
    fn on_file(&self, rel_path: &str, completed: u64, total: u64);
}

/// Sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_file(&self, _rel_path: &str, _completed: u64, _total: u64) {}
}

/// Everything a strategy needs besides the configuration itself.
pub struct StrategyContext<'a> {
    pub pools: &'a CasPoolManager,
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancellationToken,
}

/// What a strategy hands back after materializing.
#[derive(Debug, Clone)]
pub struct PreparedWorkspace {
    /// Files present in the workspace after preparation.
    pub file_count: u64,
    /// Files actually placed during this run (0 for a clean reuse diff).
    pub files_placed: u64,
    /// Files removed as no longer desired.
    pub files_removed: u64,
}

/// A pluggable materialization algorithm.
#[async_trait]
pub trait WorkspaceStrategy: Send + Sync {
    /// Which variant this is; persisted into `WorkspaceInfo`.
    fn name(&self) -> StrategyKind;

    /// Whether this strategy can materialize the given configuration.
    fn can_handle(&self, config: &WorkspaceConfiguration) -> bool;

    /// Whether placement needs elevated privileges on this platform.
    fn requires_admin_rights(&self) -> bool;

    /// Rough bytes of *new* disk usage a full materialization would cost.
    /// Link-based strategies cost nothing beyond directory entries.
    fn estimate_disk_usage(&self, config: &WorkspaceConfiguration) -> u64;

    /// Materialize the configuration into `config.root`.
    ///
    /// When `config.force_recreate` is set the directory is wiped and fully
    /// rebuilt; otherwise the reconciler's plan drives a minimal diff.
    /// Rollback on failure is the strategy's own business while it runs;
    /// partial progress is never rolled back on cancellation.
    async fn prepare(
        &self,
        ctx: &StrategyContext<'_>,
        config: &WorkspaceConfiguration,
    ) -> WorkbenchResult<PreparedWorkspace>;
}
