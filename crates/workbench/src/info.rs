//! WorkspaceInfo: persisted per-workspace metadata.
//!
//! All known workspaces live in one JSON sidecar file (`workspaces.json`)
//! written atomically via temp + rename. The record is what the manager
//! consults on the next preparation request to decide reuse vs recreate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::manifest::ContentManifest;
use crate::strategy::StrategyKind;

/// A manifest's identity and version at preparation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestPin {
    pub id: String,
    pub version: String,
}

impl ManifestPin {
    pub fn of(manifest: &ContentManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            version: manifest.version.clone(),
        }
    }
}

/// Persisted record of one materialized workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub workspace_id: String,
    pub path: PathBuf,
    pub strategy: StrategyKind,
    /// Manifest IDs and versions at preparation time, sorted by ID.
    pub manifests: Vec<ManifestPin>,
    pub file_count: u64,
    /// Whether the last preparation ran to completion.
    pub prepared: bool,
    /// Whether the last validation pass (if any) succeeded.
    pub valid: bool,
    pub prepared_at: DateTime<Utc>,
}

impl WorkspaceInfo {
    /// Whether this record pins exactly the given manifest set (same IDs,
    /// same version strings; exact match, no version ordering).
    pub fn pins_match(&self, manifests: &[ContentManifest]) -> bool {
        let mut want: Vec<ManifestPin> = manifests.iter().map(ManifestPin::of).collect();
        want.sort();
        self.manifests == want
    }
}

/// The single metadata file covering all known workspaces.
pub struct WorkspaceMetaStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl WorkspaceMetaStore {
    /// Store backed by `{dir}/workspaces.json`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("workspaces.json"),
            lock: Mutex::new(()),
        }
    }

    async fn load_all_unlocked(&self) -> WorkbenchResult<BTreeMap<String, WorkspaceInfo>> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WorkbenchError::io(
                    format!("corrupt workspace metadata {}", self.path.display()),
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(WorkbenchError::io("failed to read workspace metadata", e)),
        }
    }

    async fn write_all(&self, records: &BTreeMap<String, WorkspaceInfo>) -> WorkbenchResult<()> {
        let json = serde_json::to_vec_pretty(records).map_err(|e| {
            WorkbenchError::io(
                "failed to serialize workspace metadata",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkbenchError::io("failed to create metadata directory", e))?;
        }
        let tmp = self
            .path
            .with_file_name(format!(".workspaces.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &json)
            .await
            .map_err(|e| WorkbenchError::io("failed to write workspace metadata", e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| WorkbenchError::io("failed to rename workspace metadata", e))?;
        Ok(())
    }

    /// All known records.
    pub async fn load_all(&self) -> WorkbenchResult<BTreeMap<String, WorkspaceInfo>> {
        let _guard = self.lock.lock().await;
        self.load_all_unlocked().await
    }

    /// One record by workspace ID.
    pub async fn get(&self, workspace_id: &str) -> WorkbenchResult<Option<WorkspaceInfo>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_all_unlocked().await?.remove(workspace_id))
    }

    /// Create or overwrite a record.
    pub async fn upsert(&self, info: WorkspaceInfo) -> WorkbenchResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load_all_unlocked().await?;
        records.insert(info.workspace_id.clone(), info);
        self.write_all(&records).await
    }

    /// Drop a record. Removing an unknown ID is a no-op.
    pub async fn remove(&self, workspace_id: &str) -> WorkbenchResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load_all_unlocked().await?;
        if records.remove(workspace_id).is_some() {
            self.write_all(&records).await?;
        }
        Ok(())
    }
}
