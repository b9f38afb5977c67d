//! WorkspaceManager: decides reuse vs patch vs recreate, runs strategies,
//! persists WorkspaceInfo, and keeps the CAS reference graph in step.
//!
//! Per-workspace state machine: Unprepared -> Preparing -> Prepared, with
//! re-entry into Preparing on any later request for the same ID. Requests
//! for different IDs run fully in parallel; requests for the same ID
//! serialize through a per-ID lock so two strategy invocations never
//! interleave against one directory.
//!
//! Failure posture: validation failures abort before disk is touched. A
//! strategy failure mid-run leaves the half-built directory behind for
//! inspection (deliberately not auto-deleted) and does NOT register
//! workspace references, so a half-built tree never pins orphaned objects
//! against GC.

use std::collections::BTreeMap;
use std::sync::Arc;

use cas::{CasPoolManager, CasReferenceTracker, ContentHash};
use chrono::Utc;
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::info::{ManifestPin, WorkspaceInfo, WorkspaceMetaStore};
use crate::manifest::FileSource;
use crate::reconcile::{desired_state, DesiredFile};
use crate::strategies::default_strategies;
use crate::strategy::{
    ProgressSink, StrategyContext, WorkspaceConfiguration, WorkspaceStrategy,
};

/// Top-level façade over preparation, reuse and removal of workspaces.
pub struct WorkspaceManager {
    pools: Arc<CasPoolManager>,
    tracker: Arc<CasReferenceTracker>,
    meta: WorkspaceMetaStore,
    /// Ordered; the first strategy whose `can_handle` accepts wins when the
    /// configuration doesn't name one.
    strategies: Vec<Arc<dyn WorkspaceStrategy>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkspaceManager {
    /// Manager with the default strategy set (hybrid first).
    pub fn new(
        pools: Arc<CasPoolManager>,
        tracker: Arc<CasReferenceTracker>,
        meta_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::with_strategies(pools, tracker, meta_dir, default_strategies())
    }

    /// Manager with an explicit strategy list (mainly for tests and hosts
    /// that ship their own placement).
    pub fn with_strategies(
        pools: Arc<CasPoolManager>,
        tracker: Arc<CasReferenceTracker>,
        meta_dir: impl Into<std::path::PathBuf>,
        strategies: Vec<Arc<dyn WorkspaceStrategy>>,
    ) -> Self {
        Self {
            pools,
            tracker,
            meta: WorkspaceMetaStore::new(meta_dir),
            strategies,
            locks: DashMap::new(),
        }
    }

    fn workspace_lock(&self, workspace_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn select_strategy(
        &self,
        config: &WorkspaceConfiguration,
    ) -> Option<Arc<dyn WorkspaceStrategy>> {
        match config.strategy {
            Some(kind) => self
                .strategies
                .iter()
                .find(|s| s.name() == kind && s.can_handle(config))
                .cloned(),
            None => self
                .strategies
                .iter()
                .find(|s| s.can_handle(config))
                .cloned(),
        }
    }

    /// Every issue that makes this configuration unpreparable. Empty means
    /// valid. Nothing on disk is touched here.
    fn validate(&self, config: &WorkspaceConfiguration) -> Vec<String> {
        let mut issues = Vec::new();

        if config.workspace_id.trim().is_empty() {
            issues.push("workspace id must not be empty".to_string());
        }
        if config.root.as_os_str().is_empty() {
            issues.push("workspace root path must not be empty".to_string());
        }
        if config.manifests.is_empty() {
            issues.push("configuration contains no manifests".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for manifest in &config.manifests {
            if !seen.insert(&manifest.id) {
                issues.push(format!("duplicate manifest id: {}", manifest.id));
            }
            for file in &manifest.files {
                if let FileSource::Remote { url } = &file.source {
                    issues.push(format!(
                        "manifest {} file {} has remote source {url}; fetch before preparing",
                        manifest.id, file.rel_path
                    ));
                }
                if !is_safe_rel_path(&file.rel_path) {
                    issues.push(format!(
                        "manifest {} has unsafe relative path: {}",
                        manifest.id, file.rel_path
                    ));
                }
            }
        }

        if self.select_strategy(config).is_none() {
            issues.push(match config.strategy {
                Some(kind) => format!("strategy {kind} cannot handle this configuration"),
                None => "no registered strategy can handle this configuration".to_string(),
            });
        }

        issues
    }

    /// Prepare (or reuse) the workspace described by `config`.
    ///
    /// Decision ladder, in order:
    /// 1. validation failure aborts before disk is touched;
    /// 2. an existing prepared record with exactly matching manifest
    ///    versions and a directory that passes file validation is reused
    ///    without invoking any strategy;
    /// 3. any pin difference (manifest added, removed, or version string
    ///    changed) forces a wipe-and-rebuild;
    /// 4. otherwise the strategy reconciles in place.
    #[instrument(skip(self, config, progress, cancel), fields(workspace_id = %config.workspace_id))]
    pub async fn prepare_workspace(
        &self,
        mut config: WorkspaceConfiguration,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<WorkspaceInfo> {
        let issues = self.validate(&config);
        if !issues.is_empty() {
            return Err(WorkbenchError::Validation(issues));
        }

        let lock = self.workspace_lock(&config.workspace_id);
        let _guard = lock.lock().await;

        let desired = desired_state(&config.manifests);
        let prior = self.meta.get(&config.workspace_id).await?;

        if let Some(prior) = &prior {
            if !config.force_recreate
                && prior.prepared
                && prior.path == config.root
                && prior.pins_match(&config.manifests)
            {
                let problems = validate_files(&config.root, &desired).await;
                if problems.is_empty() {
                    info!(workspace_id = %config.workspace_id, "reusing prepared workspace");
                    return Ok(prior.clone());
                }
                debug!(
                    workspace_id = %config.workspace_id,
                    problems = problems.len(),
                    "existing workspace failed validation, re-preparing"
                );
            }

            if !prior.pins_match(&config.manifests) || prior.path != config.root {
                // Manifest set changed: wipe and rebuild rather than diff.
                config.force_recreate = true;
                debug!(workspace_id = %config.workspace_id, "manifest versions changed, forcing recreate");
            }
        }

        let strategy = self
            .select_strategy(&config)
            .ok_or(WorkbenchError::StrategyUnavailable)?;
        let ctx = StrategyContext {
            pools: self.pools.as_ref(),
            progress,
            cancel,
        };

        let mut pins: Vec<ManifestPin> = config.manifests.iter().map(ManifestPin::of).collect();
        pins.sort();

        let prepared = match strategy.prepare(&ctx, &config).await {
            Ok(prepared) => prepared,
            Err(e) => {
                // Record the failed attempt; the half-built directory stays
                // on disk for inspection and reference tracking is not
                // updated, so GC remains free to collect real orphans.
                let record = WorkspaceInfo {
                    workspace_id: config.workspace_id.clone(),
                    path: config.root.clone(),
                    strategy: strategy.name(),
                    manifests: pins,
                    file_count: prior.as_ref().map(|p| p.file_count).unwrap_or(0),
                    prepared: false,
                    valid: false,
                    prepared_at: Utc::now(),
                };
                if let Err(persist_err) = self.meta.upsert(record).await {
                    warn!(error = %persist_err, "failed to persist failed-preparation record");
                }
                return Err(e);
            }
        };

        let mut record = WorkspaceInfo {
            workspace_id: config.workspace_id.clone(),
            path: config.root.clone(),
            strategy: strategy.name(),
            manifests: pins,
            file_count: prepared.file_count,
            prepared: true,
            valid: true,
            prepared_at: Utc::now(),
        };
        self.meta.upsert(record.clone()).await?;

        let hashes: std::collections::BTreeSet<ContentHash> = desired
            .values()
            .filter_map(|f| f.content_hash().cloned())
            .collect();
        self.tracker
            .track_workspace_references(&config.workspace_id, hashes)
            .await?;

        if config.validate_after_prepare {
            let problems = validate_files(&config.root, &desired).await;
            if !problems.is_empty() {
                // Reported, never auto-rolled-back; rollback is the
                // strategy's job during its own run.
                warn!(
                    workspace_id = %config.workspace_id,
                    problems = problems.len(),
                    "post-preparation validation failed"
                );
                record.valid = false;
                self.meta.upsert(record.clone()).await?;
            }
        }

        info!(
            workspace_id = %config.workspace_id,
            strategy = %record.strategy,
            files = record.file_count,
            placed = prepared.files_placed,
            removed = prepared.files_removed,
            "workspace prepared"
        );
        Ok(record)
    }

    /// Check a prepared workspace against the manifests it should serve:
    /// every expected file present with the expected size. Returns the
    /// issues found (empty means valid) and records the result; nothing is
    /// repaired or rolled back here.
    #[instrument(skip(self, manifests))]
    pub async fn validate_workspace(
        &self,
        workspace_id: &str,
        manifests: &[crate::manifest::ContentManifest],
    ) -> WorkbenchResult<Vec<String>> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let mut info = self
            .meta
            .get(workspace_id)
            .await?
            .ok_or_else(|| WorkbenchError::WorkspaceNotFound(workspace_id.to_string()))?;

        let desired = desired_state(manifests);
        let problems = validate_files(&info.path, &desired).await;
        let valid = problems.is_empty();
        if info.valid != valid {
            info.valid = valid;
            self.meta.upsert(info).await?;
        }
        Ok(problems)
    }

    /// The persisted record for a workspace, if any.
    pub async fn get_workspace_info(
        &self,
        workspace_id: &str,
    ) -> WorkbenchResult<Option<WorkspaceInfo>> {
        self.meta.get(workspace_id).await
    }

    /// Records for every known workspace.
    pub async fn all_workspaces(&self) -> WorkbenchResult<BTreeMap<String, WorkspaceInfo>> {
        self.meta.load_all().await
    }

    /// Delete a workspace: its directory, its reference record, and its
    /// metadata entry, in that order.
    #[instrument(skip(self))]
    pub async fn remove_workspace(&self, workspace_id: &str) -> WorkbenchResult<()> {
        let lock = self.workspace_lock(workspace_id);
        let result = {
            let _guard = lock.lock().await;
            self.remove_workspace_locked(workspace_id).await
        };
        drop(lock);
        // Drop the lock entry only when no concurrent caller still holds a
        // clone; otherwise the entry stays and they serialize as usual.
        self.locks
            .remove_if(workspace_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn remove_workspace_locked(&self, workspace_id: &str) -> WorkbenchResult<()> {
        let info = self
            .meta
            .get(workspace_id)
            .await?
            .ok_or_else(|| WorkbenchError::WorkspaceNotFound(workspace_id.to_string()))?;

        match fs::remove_dir_all(&info.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkbenchError::io("failed to remove workspace directory", e)),
        }
        self.tracker.untrack_workspace(workspace_id).await?;
        self.meta.remove(workspace_id).await?;
        info!(workspace_id, "workspace removed");
        Ok(())
    }
}

fn is_safe_rel_path(rel_path: &str) -> bool {
    !rel_path.is_empty()
        && !rel_path.starts_with('/')
        && !rel_path.contains('\\')
        && !rel_path.contains(':')
        && rel_path.split('/').all(|part| {
            !part.is_empty() && part != "." && part != ".."
        })
}

/// Check every desired file for presence and size under `root`.
async fn validate_files(
    root: &std::path::Path,
    desired: &BTreeMap<String, DesiredFile>,
) -> Vec<String> {
    let mut problems = Vec::new();
    for (rel_path, want) in desired {
        let mut path = root.to_path_buf();
        for part in rel_path.split('/') {
            path.push(part);
        }
        match fs::metadata(&path).await {
            Ok(meta) if meta.len() == want.size => {}
            Ok(meta) => problems.push(format!(
                "{rel_path}: size {} on disk, expected {}",
                meta.len(),
                want.size
            )),
            Err(_) => problems.push(format!("{rel_path}: missing")),
        }
    }
    problems
}
