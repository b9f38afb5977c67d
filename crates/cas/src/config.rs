//! CAS configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `WORKBENCH_CAS_PATH`: primary pool root
//! - `WORKBENCH_INSTALL_PATH`: installation-adjacent pool root (optional)
//! - `WORKBENCH_CAS_ALGORITHM`: "blake3" (default) or "sha256"
//!
//! Default primary root: `~/.workbench/cas`

use crate::error::{CasError, CasResult};
use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the CAS subsystem: pool roots, hashing, GC knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasSettings {
    /// Root of the primary pool. Objects in `{root}/objects/`, reference
    /// records in `{root}/refs/`, temp files in `{root}/tmp/`.
    pub primary_root: PathBuf,

    /// Root of the installation-adjacent pool, if one is configured.
    /// Unset or empty means the pool is unavailable and routing falls
    /// back to the primary pool.
    #[serde(default)]
    pub installation_root: Option<PathBuf>,

    /// Hash algorithm for all pools. Changing it makes existing pools
    /// incompatible; there is no migration.
    #[serde(default)]
    pub algorithm: HashAlgorithm,

    /// Orphans younger than this are excluded from GC deletion. Covers the
    /// window between an object write and its reference set being persisted.
    #[serde(default = "default_gc_grace_secs")]
    pub gc_grace_period_secs: u64,

    /// How long a non-forced GC waits for the exclusivity permit before
    /// reporting "skipped".
    #[serde(default = "default_gc_lock_timeout_secs")]
    pub gc_lock_timeout_secs: u64,

    /// Bounded fan-out for parallel reference-record reads.
    #[serde(default = "default_max_concurrent_ref_reads")]
    pub max_concurrent_ref_reads: usize,

    /// Whether callers should schedule GC automatically after untracking.
    /// Advisory; this crate never starts GC on its own.
    #[serde(default)]
    pub auto_gc: bool,
}

fn default_gc_grace_secs() -> u64 {
    300
}

fn default_gc_lock_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_ref_reads() -> usize {
    20
}

impl Default for CasSettings {
    fn default() -> Self {
        Self {
            primary_root: default_primary_root(),
            installation_root: None,
            algorithm: HashAlgorithm::default(),
            gc_grace_period_secs: default_gc_grace_secs(),
            gc_lock_timeout_secs: default_gc_lock_timeout_secs(),
            max_concurrent_ref_reads: default_max_concurrent_ref_reads(),
            auto_gc: false,
        }
    }
}

/// Get the default primary root (~/.workbench/cas).
fn default_primary_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".workbench").join("cas"))
        .unwrap_or_else(|| PathBuf::from(".workbench/cas"))
}

impl CasSettings {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> CasResult<Self> {
        let primary_root = env::var("WORKBENCH_CAS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_primary_root());

        let installation_root = env::var("WORKBENCH_INSTALL_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let algorithm = match env::var("WORKBENCH_CAS_ALGORITHM") {
            Ok(v) => v
                .parse()
                .map_err(|_| CasError::InvalidArgument(format!("unknown hash algorithm: {v}")))?,
            Err(_) => HashAlgorithm::default(),
        };

        Ok(Self {
            primary_root,
            installation_root,
            algorithm,
            ..Self::default()
        })
    }

    /// Load configuration from a TOML file's `[cas]` section, falling back
    /// to the environment when the section is absent.
    ///
    /// ```toml
    /// [cas]
    /// primary_root = "/tank/workbench/cas"
    /// algorithm = "blake3"
    /// gc_grace_period_secs = 300
    /// ```
    pub fn from_file(path: &Path) -> CasResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CasError::io(format!("failed to read config file {}", path.display()), e))?;

        let table: toml::Table = contents.parse().map_err(|e| {
            CasError::InvalidArgument(format!("failed to parse TOML {}: {e}", path.display()))
        })?;

        if let Some(section) = table.get("cas") {
            section
                .clone()
                .try_into()
                .map_err(|e| CasError::InvalidArgument(format!("failed to parse [cas] section: {e}")))
        } else {
            Self::from_env()
        }
    }

    /// Create settings with a specific primary root.
    pub fn with_primary_root(path: impl Into<PathBuf>) -> Self {
        Self {
            primary_root: path.into(),
            ..Self::default()
        }
    }

    /// Get the configured root for a pool, if the pool is available.
    pub fn pool_root(&self, kind: crate::pool::PoolKind) -> Option<&Path> {
        match kind {
            crate::pool::PoolKind::Primary => Some(&self.primary_root),
            crate::pool::PoolKind::Installation => self
                .installation_root
                .as_deref()
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Directory holding reference records.
    pub fn refs_dir(&self) -> PathBuf {
        self.primary_root.join("refs")
    }

    /// GC grace period as a [`Duration`].
    pub fn gc_grace_period(&self) -> Duration {
        Duration::from_secs(self.gc_grace_period_secs)
    }

    /// GC lock timeout as a [`Duration`].
    pub fn gc_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.gc_lock_timeout_secs)
    }
}
