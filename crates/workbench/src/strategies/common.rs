//! Shared placement loop for all strategy variants.
//!
//! Every strategy follows the same shape: compute the desired state, either
//! wipe-and-rebuild (force recreate) or diff against the scanned directory,
//! then place files one by one. Only the per-file placement primitive
//! differs between variants.

use std::path::{Path, PathBuf};

use cas::CasError;
use tokio::fs;
use tracing::debug;

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::manifest::FileSource;
use crate::reconcile::{desired_state, reconcile, scan_existing, DesiredFile, ReconcilePlan};
use crate::strategy::{PreparedWorkspace, StrategyContext, WorkspaceConfiguration};

/// Per-file placement primitive a strategy variant uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Hardlink, falling back to copy across filesystems.
    Hardlink,
    /// Platform symlink pointing into the CAS.
    Symlink,
    /// Full byte copy.
    Copy,
    /// Hardlink content-addressable files, copy local ones.
    Hybrid,
}

/// Sum of desired file sizes matched by `pred`; the disk-usage estimate for
/// the files a variant would physically copy.
pub(crate) fn estimate_copied_bytes(
    config: &WorkspaceConfiguration,
    pred: impl Fn(&DesiredFile) -> bool,
) -> u64 {
    desired_state(&config.manifests)
        .values()
        .filter(|f| pred(f))
        .map(|f| f.size)
        .sum()
}

/// Materialize `config` into its root using the given placement primitive.
pub(crate) async fn materialize(
    ctx: &StrategyContext<'_>,
    config: &WorkspaceConfiguration,
    placement: Placement,
) -> WorkbenchResult<PreparedWorkspace> {
    let desired = desired_state(&config.manifests);
    let root = &config.root;
    let root_exists = fs::try_exists(root).await.unwrap_or(false);

    let plan = if config.force_recreate || !root_exists {
        if root_exists {
            fs::remove_dir_all(root)
                .await
                .map_err(|e| WorkbenchError::io("failed to wipe workspace for recreate", e))?;
        }
        fs::create_dir_all(root)
            .await
            .map_err(|e| WorkbenchError::io("failed to create workspace root", e))?;
        ReconcilePlan {
            to_add: desired.values().cloned().collect(),
            to_remove: Vec::new(),
        }
    } else {
        let existing = scan_existing(root).await?;
        reconcile(&existing, &desired)
    };

    let total = (plan.to_add.len() + plan.to_remove.len()) as u64;
    let mut completed = 0u64;

    for rel_path in &plan.to_remove {
        if ctx.cancel.is_cancelled() {
            return Err(WorkbenchError::Cancelled);
        }
        let target = join_rel(root, rel_path);
        match fs::remove_file(&target).await {
            Ok(()) => debug!(rel_path, "removed stale file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkbenchError::io("failed to remove stale file", e)),
        }
        completed += 1;
        ctx.progress.on_file(rel_path, completed, total);
    }

    for file in &plan.to_add {
        if ctx.cancel.is_cancelled() {
            return Err(WorkbenchError::Cancelled);
        }
        place_one(ctx, root, file, placement).await?;
        completed += 1;
        ctx.progress.on_file(&file.rel_path, completed, total);
    }

    Ok(PreparedWorkspace {
        file_count: desired.len() as u64,
        files_placed: plan.to_add.len() as u64,
        files_removed: plan.to_remove.len() as u64,
    })
}

async fn place_one(
    ctx: &StrategyContext<'_>,
    root: &Path,
    file: &DesiredFile,
    placement: Placement,
) -> WorkbenchResult<()> {
    let dest = join_rel(root, &file.rel_path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkbenchError::io("failed to create workspace subdirectory", e))?;
    }
    // A changed file gets re-placed; links fail on an existing destination.
    let _ = fs::remove_file(&dest).await;

    let (src, is_cas) = match &file.source {
        FileSource::ContentAddressable { hash } => {
            let pool = ctx.pools.get_storage_for_content(file.kind).await?;
            if !pool.exists(hash).await {
                return Err(WorkbenchError::Cas(CasError::ObjectNotFound(hash.clone())));
            }
            (pool.object_path(hash), true)
        }
        FileSource::Local { path } => (path.clone(), false),
        FileSource::Remote { url } => {
            return Err(WorkbenchError::Validation(vec![format!(
                "file {} has a remote source ({url}); fetch it into the CAS first",
                file.rel_path
            )]));
        }
    };

    match placement {
        Placement::Hardlink => hardlink_or_copy(&src, &dest).await,
        Placement::Symlink => symlink_file(&src, &dest).await,
        Placement::Copy => copy_file(&src, &dest).await,
        Placement::Hybrid => {
            if is_cas {
                hardlink_or_copy(&src, &dest).await
            } else {
                copy_file(&src, &dest).await
            }
        }
    }
}

fn join_rel(root: &Path, rel_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in rel_path.split('/') {
        out.push(part);
    }
    out
}

async fn hardlink_or_copy(src: &Path, dest: &Path) -> WorkbenchResult<()> {
    match fs::hard_link(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => copy_file(src, dest).await,
        Err(e) => Err(WorkbenchError::io(
            format!("failed to hardlink {}", dest.display()),
            e,
        )),
    }
}

async fn copy_file(src: &Path, dest: &Path) -> WorkbenchResult<()> {
    fs::copy(src, dest)
        .await
        .map(|_| ())
        .map_err(|e| WorkbenchError::io(format!("failed to copy to {}", dest.display()), e))
}

#[cfg(unix)]
async fn symlink_file(src: &Path, dest: &Path) -> WorkbenchResult<()> {
    fs::symlink(src, dest)
        .await
        .map_err(|e| WorkbenchError::io(format!("failed to symlink {}", dest.display()), e))
}

#[cfg(windows)]
async fn symlink_file(src: &Path, dest: &Path) -> WorkbenchResult<()> {
    fs::symlink_file(src, dest)
        .await
        .map_err(|e| WorkbenchError::io(format!("failed to symlink {}", dest.display()), e))
}
