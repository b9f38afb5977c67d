//! CasReferenceTracker: persisted reference sets per manifest and workspace.
//!
//! Layout:
//! ```text
//! {refs_root}/
//! ├── manifests/
//! │   └── {sanitized_id}.refs    # JSON ReferenceRecord
//! ├── workspaces/
//! │   └── {sanitized_id}.refs
//! └── tmp/
//!     └── {uuid}                 # in-flight record writes
//! ```
//!
//! An object hash is live iff it appears in at least one record in either
//! directory. All mutations serialize through a single writer lock so two
//! concurrent tracks can't lose an update; reads fan out over the record
//! files with bounded concurrency and union the results.
//!
//! IDs are arbitrary strings; they are escaped injectively into
//! filesystem-safe names so `a/b` and `a_b` can never collide on disk.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CasError, CasResult};
use crate::hash::ContentHash;

/// One persisted reference set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceRecord {
    /// The original (unsanitized) manifest or workspace ID.
    pub id: String,
    /// Object hashes this entity keeps live.
    pub hashes: BTreeSet<ContentHash>,
    /// Manifest schema version; None for workspace records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When this record was last written.
    pub tracked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefScope {
    Manifest,
    Workspace,
}

impl RefScope {
    fn dir_name(self) -> &'static str {
        match self {
            RefScope::Manifest => "manifests",
            RefScope::Workspace => "workspaces",
        }
    }
}

/// Tracks which manifests and workspaces reference which objects.
pub struct CasReferenceTracker {
    refs_root: PathBuf,
    /// One logical writer at a time across manifests and workspaces.
    writer: Mutex<()>,
    read_concurrency: usize,
}

impl CasReferenceTracker {
    /// Open (or create) the tracker's directories under `refs_root`.
    pub async fn open(refs_root: impl Into<PathBuf>, read_concurrency: usize) -> CasResult<Self> {
        let refs_root = refs_root.into();
        for sub in ["manifests", "workspaces", "tmp"] {
            fs::create_dir_all(refs_root.join(sub))
                .await
                .map_err(|e| CasError::io("failed to create refs directory", e))?;
        }
        Ok(Self {
            refs_root,
            writer: Mutex::new(()),
            read_concurrency: read_concurrency.max(1),
        })
    }

    fn scope_dir(&self, scope: RefScope) -> PathBuf {
        self.refs_root.join(scope.dir_name())
    }

    fn record_path(&self, scope: RefScope, sanitized: &str) -> PathBuf {
        self.scope_dir(scope).join(format!("{sanitized}.refs"))
    }

    /// Persist (create or overwrite) a manifest's reference set.
    pub async fn track_manifest_references(
        &self,
        manifest_id: &str,
        hashes: BTreeSet<ContentHash>,
        version: &str,
    ) -> CasResult<()> {
        self.write_record(
            RefScope::Manifest,
            ReferenceRecord {
                id: manifest_id.to_string(),
                hashes,
                version: Some(version.to_string()),
                tracked_at: Utc::now(),
            },
        )
        .await
    }

    /// Remove a manifest's reference set. Removing an untracked manifest
    /// is a no-op.
    pub async fn untrack_manifest(&self, manifest_id: &str) -> CasResult<()> {
        self.remove_record(RefScope::Manifest, manifest_id).await
    }

    /// Persist (create or overwrite) a workspace's reference set.
    pub async fn track_workspace_references(
        &self,
        workspace_id: &str,
        hashes: BTreeSet<ContentHash>,
    ) -> CasResult<()> {
        self.write_record(
            RefScope::Workspace,
            ReferenceRecord {
                id: workspace_id.to_string(),
                hashes,
                version: None,
                tracked_at: Utc::now(),
            },
        )
        .await
    }

    /// Remove a workspace's reference set. No-op when untracked.
    pub async fn untrack_workspace(&self, workspace_id: &str) -> CasResult<()> {
        self.remove_record(RefScope::Workspace, workspace_id).await
    }

    async fn write_record(&self, scope: RefScope, record: ReferenceRecord) -> CasResult<()> {
        let sanitized = sanitize_id(&record.id)?;
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| CasError::InvalidArgument(format!("failed to serialize record: {e}")))?;

        let _guard = self.writer.lock().await;
        let tmp_path = self.refs_root.join("tmp").join(Uuid::new_v4().to_string());
        fs::write(&tmp_path, &json)
            .await
            .map_err(|e| CasError::io("failed to write temp reference record", e))?;
        let final_path = self.record_path(scope, &sanitized);
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| CasError::io("failed to rename reference record into place", e))?;
        debug!(id = %record.id, scope = scope.dir_name(), hashes = record.hashes.len(), "tracked references");
        Ok(())
    }

    async fn remove_record(&self, scope: RefScope, id: &str) -> CasResult<()> {
        let sanitized = sanitize_id(id)?;
        let _guard = self.writer.lock().await;
        match fs::remove_file(self.record_path(scope, &sanitized)).await {
            Ok(()) => {
                debug!(id, scope = scope.dir_name(), "untracked references");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CasError::io("failed to remove reference record", e)),
        }
    }

    /// Load one manifest record, or None if the manifest is untracked.
    pub async fn manifest_record(&self, manifest_id: &str) -> CasResult<Option<ReferenceRecord>> {
        self.load_record(RefScope::Manifest, manifest_id).await
    }

    /// Load one workspace record, or None if the workspace is untracked.
    pub async fn workspace_record(&self, workspace_id: &str) -> CasResult<Option<ReferenceRecord>> {
        self.load_record(RefScope::Workspace, workspace_id).await
    }

    async fn load_record(&self, scope: RefScope, id: &str) -> CasResult<Option<ReferenceRecord>> {
        let sanitized = sanitize_id(id)?;
        let path = self.record_path(scope, &sanitized);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(parse_record(&path, &bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CasError::io("failed to read reference record", e)),
        }
    }

    /// Union of every hash referenced by any tracked manifest or workspace.
    ///
    /// Record files are read in parallel with bounded concurrency; a corrupt
    /// record aborts the whole read, because a live set built from a partial
    /// reference graph would let GC delete live objects.
    pub async fn all_referenced_hashes(
        &self,
        cancel: &CancellationToken,
    ) -> CasResult<HashSet<ContentHash>> {
        let mut paths = self.list_record_paths(RefScope::Manifest).await?;
        paths.extend(self.list_record_paths(RefScope::Workspace).await?);

        let results: Vec<CasResult<ReferenceRecord>> = stream::iter(paths)
            .map(|path| async move {
                if cancel.is_cancelled() {
                    return Err(CasError::Cancelled);
                }
                let bytes = fs::read(&path)
                    .await
                    .map_err(|e| CasError::io("failed to read reference record", e))?;
                parse_record(&path, &bytes)
            })
            .buffer_unordered(self.read_concurrency)
            .collect()
            .await;

        let mut union = HashSet::new();
        for result in results {
            union.extend(result?.hashes);
        }
        Ok(union)
    }

    /// IDs of every tracked manifest, decoded from the record filenames.
    pub async fn tracked_manifest_ids(&self) -> CasResult<Vec<String>> {
        self.list_ids(RefScope::Manifest).await
    }

    /// IDs of every tracked workspace.
    pub async fn tracked_workspace_ids(&self) -> CasResult<Vec<String>> {
        self.list_ids(RefScope::Workspace).await
    }

    async fn list_ids(&self, scope: RefScope) -> CasResult<Vec<String>> {
        let mut ids = Vec::new();
        for path in self.list_record_paths(scope).await? {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(id) = desanitize_id(stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn list_record_paths(&self, scope: RefScope) -> CasResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = match fs::read_dir(self.scope_dir(scope)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(CasError::io("failed to list refs directory", e)),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CasError::io("failed to list refs directory", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("refs") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn parse_record(path: &Path, bytes: &[u8]) -> CasResult<ReferenceRecord> {
    serde_json::from_slice(bytes).map_err(|source| CasError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Windows device names that silently swallow file I/O; colliding record
/// names get an `id-` prefix.
fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    let upper = stem.to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "CON" | "PRN" | "AUX" | "NUL"
    ) || (upper.len() == 4
        && (upper.starts_with("COM") || upper.starts_with("LPT"))
        && upper[3..].chars().all(|c| c.is_ascii_digit() && c != '0'))
}

/// Escape an ID into a filesystem-safe name, injectively.
///
/// Alphanumerics, `.` and `-` pass through; every other byte becomes `%XX`.
/// Since `%` itself is escaped, no two distinct IDs map to the same name.
/// Names that would hit a reserved device name (or that already carry the
/// disambiguation prefix) get `id-` prepended; decoding strips one prefix.
pub fn sanitize_id(id: &str) -> CasResult<String> {
    if id.is_empty() {
        return Err(CasError::InvalidArgument(
            "reference id must not be empty".to_string(),
        ));
    }
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    if is_reserved_name(&out) || out.starts_with("id-") {
        out.insert_str(0, "id-");
    }
    Ok(out)
}

/// Reverse of [`sanitize_id`]. Returns None for names this module never
/// produces (stray files in the refs directory).
pub fn desanitize_id(name: &str) -> Option<String> {
    let name = name.strip_prefix("id-").unwrap_or(name);
    let mut bytes = Vec::with_capacity(name.len());
    let mut chars = name.bytes();
    while let Some(b) = chars.next() {
        if b == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use tempfile::TempDir;

    fn hashes(inputs: &[&[u8]]) -> BTreeSet<ContentHash> {
        inputs
            .iter()
            .map(|data| ContentHash::from_data(HashAlgorithm::Blake3, data))
            .collect()
    }

    async fn open_tracker(dir: &TempDir) -> CasReferenceTracker {
        CasReferenceTracker::open(dir.path().join("refs"), 8)
            .await
            .unwrap()
    }

    #[test]
    fn test_sanitize_plain_id_passes_through() {
        assert_eq!(sanitize_id("manifest-1.2").unwrap(), "manifest-1.2");
    }

    #[test]
    fn test_sanitize_is_injective() {
        // "a/b" and "a_b" must not produce the same filename
        let a = sanitize_id("a/b").unwrap();
        let b = sanitize_id("a_b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, "a%2Fb");
        assert_eq!(b, "a%5Fb");
    }

    #[test]
    fn test_sanitize_escapes_percent() {
        // Escaping % keeps "a%2Fb" (literal) distinct from "a/b" (escaped)
        assert_ne!(sanitize_id("a%2Fb").unwrap(), sanitize_id("a/b").unwrap());
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert!(matches!(
            sanitize_id(""),
            Err(CasError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sanitize_reserved_device_names() {
        assert_eq!(sanitize_id("CON").unwrap(), "id-CON");
        assert_eq!(sanitize_id("nul.manifest").unwrap(), "id-nul.manifest");
        assert_eq!(sanitize_id("COM1").unwrap(), "id-COM1");
        // Not reserved: COM0, CONSOLE
        assert_eq!(sanitize_id("COM0").unwrap(), "COM0");
        assert_eq!(sanitize_id("CONSOLE").unwrap(), "CONSOLE");
    }

    #[test]
    fn test_sanitize_reserved_prefix_stays_injective() {
        // A literal "id-CON" must not collide with the escaped "CON"
        assert_eq!(sanitize_id("CON").unwrap(), "id-CON");
        assert_eq!(sanitize_id("id-CON").unwrap(), "id-id-CON");
    }

    #[test]
    fn test_desanitize_roundtrip() {
        for id in ["plain", "a/b", "with space", "uni–code", "CON", "id-CON", "%41"] {
            let sanitized = sanitize_id(id).unwrap();
            assert_eq!(desanitize_id(&sanitized).as_deref(), Some(id), "{id}");
        }
    }

    #[tokio::test]
    async fn test_track_and_load_manifest() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;

        let set = hashes(&[b"h1", b"h2"]);
        tracker
            .track_manifest_references("m1", set.clone(), "1.0.0")
            .await
            .unwrap();

        let record = tracker.manifest_record("m1").await.unwrap().unwrap();
        assert_eq!(record.id, "m1");
        assert_eq!(record.hashes, set);
        assert_eq!(record.version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_track_overwrites_previous_set() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;

        tracker
            .track_manifest_references("m1", hashes(&[b"old"]), "1")
            .await
            .unwrap();
        tracker
            .track_manifest_references("m1", hashes(&[b"new"]), "2")
            .await
            .unwrap();

        let record = tracker.manifest_record("m1").await.unwrap().unwrap();
        assert_eq!(record.hashes, hashes(&[b"new"]));
        assert_eq!(record.version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_untrack_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;
        tracker.untrack_manifest("never-tracked").await.unwrap();
        tracker.untrack_workspace("never-tracked").await.unwrap();
    }

    #[tokio::test]
    async fn test_all_referenced_hashes_unions_both_scopes() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;

        tracker
            .track_manifest_references("m1", hashes(&[b"a", b"b"]), "1")
            .await
            .unwrap();
        tracker
            .track_manifest_references("m2", hashes(&[b"b", b"c"]), "1")
            .await
            .unwrap();
        tracker
            .track_workspace_references("w1", hashes(&[b"d"]))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let all = tracker.all_referenced_hashes(&cancel).await.unwrap();
        assert_eq!(all.len(), 4);
        for expected in hashes(&[b"a", b"b", b"c", b"d"]) {
            assert!(all.contains(&expected));
        }
    }

    #[tokio::test]
    async fn test_untracked_hashes_disappear_from_union() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;
        let cancel = CancellationToken::new();

        tracker
            .track_manifest_references("m1", hashes(&[b"x"]), "1")
            .await
            .unwrap();
        tracker.untrack_manifest("m1").await.unwrap();

        assert!(tracker.all_referenced_hashes(&cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;
        let cancel = CancellationToken::new();

        fs::write(
            dir.path().join("refs").join("manifests").join("bad.refs"),
            b"{ not json",
        )
        .await
        .unwrap();

        let err = tracker.all_referenced_hashes(&cancel).await.unwrap_err();
        assert!(matches!(err, CasError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_enumeration() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;
        tracker
            .track_manifest_references("m1", hashes(&[b"a"]), "1")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tracker.all_referenced_hashes(&cancel).await.unwrap_err();
        assert!(matches!(err, CasError::Cancelled));
    }

    #[tokio::test]
    async fn test_tracked_ids_decode_filenames() {
        let dir = TempDir::new().unwrap();
        let tracker = open_tracker(&dir).await;

        tracker
            .track_manifest_references("a/b", hashes(&[b"x"]), "1")
            .await
            .unwrap();
        tracker
            .track_manifest_references("plain", hashes(&[b"y"]), "1")
            .await
            .unwrap();
        tracker
            .track_workspace_references("w one", hashes(&[b"z"]))
            .await
            .unwrap();

        assert_eq!(
            tracker.tracked_manifest_ids().await.unwrap(),
            vec!["a/b".to_string(), "plain".to_string()]
        );
        assert_eq!(
            tracker.tracked_workspace_ids().await.unwrap(),
            vec!["w one".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_tracking_loses_no_records() {
        let dir = TempDir::new().unwrap();
        let tracker = std::sync::Arc::new(open_tracker(&dir).await);
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let tracker = tracker.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("manifest-{i}");
                let set = hashes(&[id.as_bytes()]);
                tracker
                    .track_manifest_references(&id, set, "1")
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(tracker.tracked_manifest_ids().await.unwrap().len(), 20);
        assert_eq!(tracker.all_referenced_hashes(&cancel).await.unwrap().len(), 20);
    }
}
