//! WorkspaceReconciler: pure diff between materialized and desired state.
//!
//! The desired file set is a fold over the configured manifests: when two
//! manifests contribute the same relative path, the higher content-kind
//! priority wins (Mod > GameClient > GameInstallation) no matter the input
//! order; at equal priority the later manifest in input order wins. That
//! tie-break is a defined behavior, not an accident: configurations list
//! manifests in install order, and later installs shadow earlier ones.
//!
//! The plan is minimal: `to_remove` is whatever exists on disk but is no
//! longer desired; `to_add` is whatever is new or differs in content (by
//! hash when the existing side knows one, else by size).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cas::{ContentHash, ContentKind};
use tokio::fs;

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::manifest::{ContentManifest, FileSource};

/// A file the workspace should contain, with the manifest kind that won it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFile {
    pub rel_path: String,
    pub size: u64,
    pub source: FileSource,
    pub kind: ContentKind,
}

impl DesiredFile {
    /// The CAS hash, for content-addressable files.
    pub fn content_hash(&self) -> Option<&ContentHash> {
        match &self.source {
            FileSource::ContentAddressable { hash } => Some(hash),
            _ => None,
        }
    }
}

/// A file currently present in the workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingFile {
    pub size: u64,
    /// Hash when the caller knows it (e.g. from a prior preparation record);
    /// scanning the directory only yields sizes.
    pub hash: Option<ContentHash>,
}

/// The minimal set of changes to transform existing into desired.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub to_add: Vec<DesiredFile>,
    pub to_remove: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Fold manifests into the winning file per relative path.
pub fn desired_state(manifests: &[ContentManifest]) -> BTreeMap<String, DesiredFile> {
    let mut desired: BTreeMap<String, DesiredFile> = BTreeMap::new();
    for manifest in manifests {
        for file in &manifest.files {
            let candidate = DesiredFile {
                rel_path: file.rel_path.clone(),
                size: file.size,
                source: file.source.clone(),
                kind: manifest.kind,
            };
            match desired.get(&file.rel_path) {
                // >= : equal priority resolves to the later manifest
                Some(current) if manifest.kind.priority() >= current.kind.priority() => {
                    desired.insert(file.rel_path.clone(), candidate);
                }
                Some(_) => {}
                None => {
                    desired.insert(file.rel_path.clone(), candidate);
                }
            }
        }
    }
    desired
}

/// Compute the add/remove plan. Pure function; no filesystem access.
pub fn reconcile(
    existing: &BTreeMap<String, ExistingFile>,
    desired: &BTreeMap<String, DesiredFile>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for rel_path in existing.keys() {
        if !desired.contains_key(rel_path) {
            plan.to_remove.push(rel_path.clone());
        }
    }

    for (rel_path, want) in desired {
        match existing.get(rel_path) {
            None => plan.to_add.push(want.clone()),
            Some(have) => {
                let differs = match (&have.hash, want.content_hash()) {
                    (Some(have_hash), Some(want_hash)) => have_hash != want_hash,
                    _ => have.size != want.size,
                };
                if differs {
                    plan.to_add.push(want.clone());
                }
            }
        }
    }

    plan
}

/// Scan a materialized workspace directory into a reconcilable file map.
///
/// Relative paths are `/`-separated regardless of platform. Hashes are not
/// computed here; a scan only knows sizes.
pub async fn scan_existing(root: &Path) -> WorkbenchResult<BTreeMap<String, ExistingFile>> {
    let mut existing = BTreeMap::new();
    if !fs::try_exists(root).await.unwrap_or(false) {
        return Ok(existing);
    }

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| WorkbenchError::io(format!("failed to list {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkbenchError::io(format!("failed to list {}", dir.display()), e))?
        {
            let path = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| WorkbenchError::io(format!("failed to stat {}", path.display()), e))?;
            if meta.is_dir() {
                pending.push(path);
            } else {
                let Ok(rel_path) = path.strip_prefix(root) else {
                    continue;
                };
                let rel = rel_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                existing.insert(
                    rel,
                    ExistingFile {
                        size: meta.len(),
                        hash: None,
                    },
                );
            }
        }
    }
    Ok(existing)
}
