//! Workspace materialization on top of the content-addressable store.
//!
//! A *workspace* is an on-disk directory assembled from one or more
//! [`ContentManifest`]s. Manifests overlap; higher-priority content kinds
//! (mods over clients over base installations) win per path. The
//! [`WorkspaceManager`] turns a [`WorkspaceConfiguration`] into a prepared
//! directory using a pluggable [`WorkspaceStrategy`] (hardlink, symlink,
//! copy, or the hybrid default), reuses already-prepared workspaces when
//! nothing changed, and registers workspace references with the CAS so
//! garbage collection never deletes objects a live workspace depends on.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use workbench::{NoProgress, WorkspaceConfiguration, WorkspaceManager};
//! use cas::{CasPoolManager, CasReferenceTracker, CasSettings};
//!
//! # async fn demo(manifests: Vec<workbench::ContentManifest>) -> anyhow::Result<()> {
//! let settings = CasSettings::from_env()?;
//! let pools = Arc::new(CasPoolManager::new(settings.clone()));
//! let tracker = Arc::new(CasReferenceTracker::open(settings.refs_dir(), 20).await?);
//! let manager = WorkspaceManager::new(pools, tracker, "/var/lib/workbench/meta");
//!
//! let config = WorkspaceConfiguration::new("profile-1", "/srv/workspaces/profile-1")
//!     .with_manifests(manifests);
//! let info = manager
//!     .prepare_workspace(config, &NoProgress, &CancellationToken::new())
//!     .await?;
//! println!("{} files in {}", info.file_count, info.path.display());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod info;
pub mod manager;
pub mod manifest;
pub mod reconcile;
pub mod strategies;
pub mod strategy;

pub use error::{WorkbenchError, WorkbenchResult};
pub use info::{ManifestPin, WorkspaceInfo, WorkspaceMetaStore};
pub use manager::WorkspaceManager;
pub use manifest::{ContentManifest, FileSource, ManifestFile};
pub use reconcile::{desired_state, reconcile, DesiredFile, ExistingFile, ReconcilePlan};
pub use strategies::{
    default_strategies, CopyStrategy, HardlinkStrategy, HybridStrategy, SymlinkStrategy,
};
pub use strategy::{
    NoProgress, PreparedWorkspace, ProgressSink, StrategyContext, StrategyKind,
    WorkspaceConfiguration, WorkspaceStrategy,
};
