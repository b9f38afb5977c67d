//! CasPoolManager: routes storage operations across named pools.
//!
//! Two pools exist: the primary pool (always configured) and an optional
//! installation-adjacent pool for content derived from a game installation.
//! Pools are opened lazily on first access and cached; when the installation
//! path becomes known later, `set_installation_root` re-registers the pool
//! without invalidating `Arc<CasStorage>` handles already handed out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CasSettings;
use crate::error::{CasError, CasResult};
use crate::store::CasStorage;

/// Named storage pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// The always-available pool under the configured CAS root.
    Primary,
    /// Pool co-located with the game installation, when configured.
    Installation,
}

/// Content categories, used for pool routing and for file-priority rules
/// during workspace reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    /// Base game files discovered from an installation.
    GameInstallation,
    /// Client binaries and launcher-managed files.
    GameClient,
    /// User-installed mods and addons.
    Mod,
}

impl ContentKind {
    /// Which pool this category's objects belong in.
    pub fn pool_kind(&self) -> PoolKind {
        match self {
            ContentKind::GameInstallation => PoolKind::Installation,
            ContentKind::GameClient | ContentKind::Mod => PoolKind::Primary,
        }
    }

    /// Priority rank when two manifests provide the same relative path.
    /// Higher wins: Mod > GameClient > GameInstallation.
    pub fn priority(&self) -> u8 {
        match self {
            ContentKind::Mod => 30,
            ContentKind::GameClient => 20,
            ContentKind::GameInstallation => 10,
        }
    }
}

/// Lazy pool registry.
pub struct CasPoolManager {
    settings: RwLock<CasSettings>,
    pools: DashMap<PoolKind, Arc<CasStorage>>,
    /// Installation lookups can happen on every store call; the fallback
    /// warning fires once per unconfigured stretch, not per lookup.
    fallback_warned: AtomicBool,
}

impl CasPoolManager {
    /// Create a manager over the given settings. No pool is opened yet.
    pub fn new(settings: CasSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            pools: DashMap::new(),
            fallback_warned: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> CasSettings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    /// Get (opening lazily if needed) the storage for a pool.
    ///
    /// Requests for an unconfigured Installation pool fall back to Primary
    /// with a logged warning rather than failing; installation-derived
    /// content is still storable, just not co-located.
    pub async fn get_storage(&self, kind: PoolKind) -> CasResult<Arc<CasStorage>> {
        let effective = self.resolve(kind);
        if let Some(pool) = self.pools.get(&effective) {
            return Ok(pool.clone());
        }

        let (root, algorithm) = {
            let settings = self.settings.read().expect("settings lock poisoned");
            (
                settings.pool_root(effective).map(PathBuf::from),
                settings.algorithm,
            )
        };
        let root = root.ok_or_else(|| {
            CasError::InvalidArgument(format!("pool {effective:?} has no configured root"))
        })?;

        let storage = Arc::new(CasStorage::open(root, algorithm).await?);
        debug!(pool = ?effective, root = %storage.root().display(), "opened pool");
        // A concurrent open of the same pool is benign; last insert wins and
        // both handles point at the same root.
        self.pools.insert(effective, storage.clone());
        Ok(storage)
    }

    /// Get the storage a content category routes to.
    pub async fn get_storage_for_content(&self, kind: ContentKind) -> CasResult<Arc<CasStorage>> {
        self.get_storage(kind.pool_kind()).await
    }

    fn resolve(&self, kind: PoolKind) -> PoolKind {
        if kind == PoolKind::Installation {
            let settings = self.settings.read().expect("settings lock poisoned");
            if settings.pool_root(PoolKind::Installation).is_none() {
                if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                    warn!("installation pool has no configured root, falling back to primary");
                }
                return PoolKind::Primary;
            }
        }
        kind
    }

    /// Register (or change) the installation pool root after the fact,
    /// e.g. once the game installation path is discovered.
    ///
    /// The cached Installation handle is discarded so the next lookup
    /// re-opens against the new root; handles already cloned out keep
    /// working against the old root.
    pub fn set_installation_root(&self, root: impl Into<PathBuf>) {
        {
            let mut settings = self.settings.write().expect("settings lock poisoned");
            settings.installation_root = Some(root.into());
        }
        self.pools.remove(&PoolKind::Installation);
        // Warn again if the pool is ever unconfigured in the future.
        self.fallback_warned.store(false, Ordering::Relaxed);
    }

    /// Drop every cached pool handle; the next access re-opens them.
    pub fn reinitialize(&self) {
        self.pools.clear();
    }

    /// All distinct configured pools, opened. Used by GC to enumerate every
    /// object everywhere. Pools sharing a root are returned once.
    pub async fn all_pools(&self) -> CasResult<Vec<Arc<CasStorage>>> {
        let mut pools = vec![self.get_storage(PoolKind::Primary).await?];
        let has_installation = {
            let settings = self.settings.read().expect("settings lock poisoned");
            settings.pool_root(PoolKind::Installation).is_some()
        };
        if has_installation {
            let install = self.get_storage(PoolKind::Installation).await?;
            if install.root() != pools[0].root() {
                pools.push(install);
            }
        }
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_kind_priority_ordering() {
        assert!(ContentKind::Mod.priority() > ContentKind::GameClient.priority());
        assert!(ContentKind::GameClient.priority() > ContentKind::GameInstallation.priority());
    }

    #[test]
    fn test_content_kind_routing() {
        assert_eq!(
            ContentKind::GameInstallation.pool_kind(),
            PoolKind::Installation
        );
        assert_eq!(ContentKind::Mod.pool_kind(), PoolKind::Primary);
        assert_eq!(ContentKind::GameClient.pool_kind(), PoolKind::Primary);
    }

    #[tokio::test]
    async fn test_lazy_open_and_cache() {
        let dir = TempDir::new().unwrap();
        let manager = CasPoolManager::new(CasSettings::with_primary_root(dir.path()));

        let a = manager.get_storage(PoolKind::Primary).await.unwrap();
        let b = manager.get_storage(PoolKind::Primary).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unconfigured_installation_falls_back_to_primary() {
        let dir = TempDir::new().unwrap();
        let manager = CasPoolManager::new(CasSettings::with_primary_root(dir.path()));

        let pool = manager.get_storage(PoolKind::Installation).await.unwrap();
        assert_eq!(pool.root(), dir.path());

        let routed = manager
            .get_storage_for_content(ContentKind::GameInstallation)
            .await
            .unwrap();
        assert_eq!(routed.root(), dir.path());
    }

    #[tokio::test]
    async fn test_fallback_warns_once_until_root_configured() {
        let dir = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        let manager = CasPoolManager::new(CasSettings::with_primary_root(dir.path()));
        assert!(!manager.fallback_warned.load(Ordering::Relaxed));

        // First fallback arms the flag; repeated fallbacks keep it armed
        manager.get_storage(PoolKind::Installation).await.unwrap();
        assert!(manager.fallback_warned.load(Ordering::Relaxed));
        manager.get_storage(PoolKind::Installation).await.unwrap();
        assert!(manager.fallback_warned.load(Ordering::Relaxed));

        // Configuring the root rearms the warning
        manager.set_installation_root(install.path());
        assert!(!manager.fallback_warned.load(Ordering::Relaxed));
        manager.get_storage(PoolKind::Installation).await.unwrap();
        assert!(!manager.fallback_warned.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_set_installation_root_later() {
        let primary = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        let manager = CasPoolManager::new(CasSettings::with_primary_root(primary.path()));

        // Before: falls back
        let before = manager.get_storage(PoolKind::Installation).await.unwrap();
        assert_eq!(before.root(), primary.path());

        manager.set_installation_root(install.path());

        // After: routed to the real pool; old handle still usable
        let after = manager.get_storage(PoolKind::Installation).await.unwrap();
        assert_eq!(after.root(), install.path());
        assert!(before.store_bytes(b"still works").await.is_ok());
    }

    #[tokio::test]
    async fn test_all_pools_dedupes_shared_root() {
        let dir = TempDir::new().unwrap();
        let mut settings = CasSettings::with_primary_root(dir.path());
        settings.installation_root = Some(dir.path().to_path_buf());
        let manager = CasPoolManager::new(settings);

        assert_eq!(manager.all_pools().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_pools_includes_installation() {
        let primary = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        let mut settings = CasSettings::with_primary_root(primary.path());
        settings.installation_root = Some(install.path().to_path_buf());
        let manager = CasPoolManager::new(settings);

        assert_eq!(manager.all_pools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reinitialize_clears_cache() {
        let dir = TempDir::new().unwrap();
        let manager = CasPoolManager::new(CasSettings::with_primary_root(dir.path()));

        let a = manager.get_storage(PoolKind::Primary).await.unwrap();
        manager.reinitialize();
        let b = manager.get_storage(PoolKind::Primary).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.root(), b.root());
    }
}
