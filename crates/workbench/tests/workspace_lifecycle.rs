//! End-to-end flows across the pool manager, reference tracker, lifecycle
//! manager and workspace manager: prepare, share, upgrade, remove, collect.

use std::sync::Arc;

use cas::{
    CasLifecycleManager, CasPoolManager, CasReferenceTracker, CasSettings, ContentKind,
    GcOutcome, PoolKind,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use workbench::{
    ContentManifest, ManifestFile, NoProgress, WorkspaceConfiguration, WorkspaceManager,
};

struct World {
    _dir: TempDir,
    pools: Arc<CasPoolManager>,
    tracker: Arc<CasReferenceTracker>,
    lifecycle: CasLifecycleManager,
    manager: WorkspaceManager,
    ws_base: std::path::PathBuf,
}

async fn world() -> World {
    let dir = TempDir::new().unwrap();
    let mut settings = CasSettings::with_primary_root(dir.path().join("cas"));
    settings.gc_grace_period_secs = 0;

    let pools = Arc::new(CasPoolManager::new(settings.clone()));
    let tracker = Arc::new(
        CasReferenceTracker::open(settings.refs_dir(), 8)
            .await
            .unwrap(),
    );
    let lifecycle = CasLifecycleManager::new(pools.clone(), tracker.clone(), settings);
    let manager = WorkspaceManager::new(pools.clone(), tracker.clone(), dir.path().join("meta"));
    let ws_base = dir.path().join("workspaces");
    World {
        _dir: dir,
        pools,
        tracker,
        lifecycle,
        manager,
        ws_base,
    }
}

async fn manifest_with(
    w: &World,
    id: &str,
    version: &str,
    kind: ContentKind,
    files: &[(&str, &[u8])],
) -> ContentManifest {
    let pool = w.pools.get_storage_for_content(kind).await.unwrap();
    let mut manifest = ContentManifest::new(id, version, kind);
    for (rel, data) in files {
        let hash = pool.store_bytes(data).await.unwrap();
        manifest
            .files
            .push(ManifestFile::content_addressed(*rel, data.len() as u64, hash));
    }
    manifest
}

#[tokio::test]
async fn test_mod_overrides_base_installation_file() {
    let w = world().await;
    let base = manifest_with(
        &w,
        "base",
        "1.0",
        ContentKind::GameInstallation,
        &[("game.exe", b"base exe"), ("data/level1.pak", b"base level")],
    )
    .await;
    let the_mod = manifest_with(
        &w,
        "cool-mod",
        "0.3",
        ContentKind::Mod,
        &[("data/level1.pak", b"modded level!")],
    )
    .await;

    let config = WorkspaceConfiguration::new("play", w.ws_base.join("play"))
        .with_manifests(vec![the_mod, base]);
    let info = w
        .manager
        .prepare_workspace(config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    // Two distinct paths, the overlapping one resolved in the mod's favor.
    assert_eq!(info.file_count, 2);
    assert_eq!(
        tokio::fs::read(w.ws_base.join("play/data/level1.pak"))
            .await
            .unwrap(),
        b"modded level!"
    );
    assert_eq!(
        tokio::fs::read(w.ws_base.join("play/game.exe")).await.unwrap(),
        b"base exe"
    );
}

#[tokio::test]
async fn test_gc_spares_objects_shared_by_surviving_workspace() {
    let w = world().await;
    let shared = manifest_with(&w, "shared", "1", ContentKind::Mod, &[("s.dat", b"shared")]).await;
    let only_a = manifest_with(&w, "only-a", "1", ContentKind::Mod, &[("a.dat", b"only a")]).await;

    let shared_hash = shared.referenced_hashes().into_iter().next().unwrap();
    let orphan_hash = only_a.referenced_hashes().into_iter().next().unwrap();

    let cfg_a = WorkspaceConfiguration::new("ws-a", w.ws_base.join("a"))
        .with_manifests(vec![shared.clone(), only_a]);
    let cfg_b = WorkspaceConfiguration::new("ws-b", w.ws_base.join("b"))
        .with_manifests(vec![shared]);
    let cancel = CancellationToken::new();
    w.manager
        .prepare_workspace(cfg_a, &NoProgress, &cancel)
        .await
        .unwrap();
    w.manager
        .prepare_workspace(cfg_b, &NoProgress, &cancel)
        .await
        .unwrap();

    w.manager.remove_workspace("ws-a").await.unwrap();

    let outcome = w
        .lifecycle
        .run_garbage_collection(true, &cancel)
        .await
        .unwrap();
    let GcOutcome::Completed(report) = outcome else {
        panic!("forced GC must run");
    };
    assert_eq!(report.objects_deleted, 1);

    let pool = w.pools.get_storage(PoolKind::Primary).await.unwrap();
    assert!(pool.exists(&shared_hash).await);
    assert!(!pool.exists(&orphan_hash).await);
}

#[tokio::test]
async fn test_manifest_references_alone_keep_objects_live() {
    // Objects tracked only through a manifest record, with no workspace
    // materialized at all, are never collected.
    let w = world().await;
    let manifest =
        manifest_with(&w, "downloaded", "2.1", ContentKind::GameClient, &[("c.bin", b"client")])
            .await;
    let hash = manifest.referenced_hashes().into_iter().next().unwrap();

    w.lifecycle
        .replace_manifest_references(None, &manifest.to_manifest_refs())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let GcOutcome::Completed(report) = w
        .lifecycle
        .run_garbage_collection(true, &cancel)
        .await
        .unwrap()
    else {
        panic!("forced GC must run");
    };
    assert_eq!(report.objects_deleted, 0);
    assert_eq!(report.objects_referenced, 1);

    let pool = w.pools.get_storage(PoolKind::Primary).await.unwrap();
    assert!(pool.exists(&hash).await);
}

#[tokio::test]
async fn test_upgrade_flow_manifest_replace_then_reprepare_then_gc() {
    // Scenario: content id "A" upgrades v1 -> v2. The manifest reference
    // swap happens first, the workspace re-prepares against v2, and a
    // final GC removes v1's now-unreferenced payload.
    let w = world().await;
    let v1 = manifest_with(&w, "A", "v1", ContentKind::Mod, &[("f.dat", b"version one")]).await;
    let v1_hash = v1.referenced_hashes().into_iter().next().unwrap();

    w.lifecycle
        .replace_manifest_references(None, &v1.to_manifest_refs())
        .await
        .unwrap();
    let cfg = WorkspaceConfiguration::new("ws", w.ws_base.join("ws"))
        .with_manifests(vec![v1]);
    let cancel = CancellationToken::new();
    w.manager
        .prepare_workspace(cfg, &NoProgress, &cancel)
        .await
        .unwrap();

    let v2 = manifest_with(&w, "A", "v2", ContentKind::Mod, &[("f.dat", b"version two")]).await;
    let v2_hash = v2.referenced_hashes().into_iter().next().unwrap();
    let outcome = w
        .lifecycle
        .replace_manifest_references(Some("A"), &v2.to_manifest_refs())
        .await
        .unwrap();
    assert!(outcome.untrack_error.is_none());

    let cfg = WorkspaceConfiguration::new("ws", w.ws_base.join("ws"))
        .with_manifests(vec![v2]);
    let info = w
        .manager
        .prepare_workspace(cfg, &NoProgress, &cancel)
        .await
        .unwrap();
    assert!(info.prepared);
    assert_eq!(
        tokio::fs::read(w.ws_base.join("ws/f.dat")).await.unwrap(),
        b"version two"
    );

    let GcOutcome::Completed(report) = w
        .lifecycle
        .run_garbage_collection(true, &cancel)
        .await
        .unwrap()
    else {
        panic!("forced GC must run");
    };
    assert_eq!(report.objects_deleted, 1);

    let pool = w.pools.get_storage(PoolKind::Primary).await.unwrap();
    assert!(!pool.exists(&v1_hash).await);
    assert!(pool.exists(&v2_hash).await);
}

#[tokio::test]
async fn test_concurrent_preparation_of_distinct_workspaces() {
    let w = world().await;
    let m1 = manifest_with(&w, "m1", "1", ContentKind::Mod, &[("one.dat", b"one")]).await;
    let m2 = manifest_with(&w, "m2", "1", ContentKind::Mod, &[("two.dat", b"two")]).await;

    let cancel = CancellationToken::new();
    let cfg1 = WorkspaceConfiguration::new("c1", w.ws_base.join("c1")).with_manifests(vec![m1]);
    let cfg2 = WorkspaceConfiguration::new("c2", w.ws_base.join("c2")).with_manifests(vec![m2]);

    let (r1, r2) = tokio::join!(
        w.manager.prepare_workspace(cfg1, &NoProgress, &cancel),
        w.manager.prepare_workspace(cfg2, &NoProgress, &cancel),
    );
    assert!(r1.unwrap().prepared);
    assert!(r2.unwrap().prepared);

    let all = w.manager.all_workspaces().await.unwrap();
    assert_eq!(all.len(), 2);

    let live = w
        .tracker
        .all_referenced_hashes(&cancel)
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
}
