//! Content Addressable Storage for Workbench.
//!
//! Storage side of the workspace engine:
//! - **store**: hash-addressed, write-once object files with atomic placement
//! - **pool**: lazy routing across the primary and installation pools
//! - **refs**: persisted reference sets per manifest and per workspace
//! - **lifecycle**: ordered reference replacement and garbage collection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cas::{CasSettings, CasPoolManager, CasReferenceTracker, CasLifecycleManager, PoolKind};
//!
//! # async fn demo() -> Result<(), cas::CasError> {
//! let settings = CasSettings::with_primary_root("/tank/workbench/cas");
//! let pools = Arc::new(CasPoolManager::new(settings.clone()));
//! let tracker = Arc::new(
//!     CasReferenceTracker::open(settings.refs_dir(), settings.max_concurrent_ref_reads).await?,
//! );
//!
//! let store = pools.get_storage(PoolKind::Primary).await?;
//! let hash = store.store_bytes(b"game asset bytes").await?;
//! println!("stored as {hash}");
//!
//! let lifecycle = CasLifecycleManager::new(pools, tracker, settings);
//! # let _ = lifecycle;
//! # Ok(())
//! # }
//! ```
//!
//! # GC safety model
//!
//! An object is *live* iff some tracked manifest or workspace record lists
//! its hash. GC never deletes a live object, and a grace period protects
//! objects written moments before their reference set lands on disk.

pub mod config;
pub mod error;
pub mod hash;
pub mod lifecycle;
pub mod pool;
pub mod refs;
pub mod store;

// Re-exports for convenience
pub use config::CasSettings;
pub use error::{CasError, CasResult};
pub use hash::{ContentHash, HashAlgorithm, HashError};
pub use lifecycle::{
    BulkUntrackReport, CasLifecycleManager, GcOutcome, GcReport, ManifestRefs, ReferenceAudit,
    ReplaceOutcome,
};
pub use pool::{CasPoolManager, ContentKind, PoolKind};
pub use refs::{CasReferenceTracker, ReferenceRecord};
pub use store::{CasStorage, ObjectEntry};
