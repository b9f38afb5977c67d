//! CasStorage: hash-addressed object store over one pool root.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── objects/
//! │   ├── ab/
//! │   │   └── cde123...   # content file (remainder of hash)
//! │   └── 12/
//! │       └── 3456789...
//! └── tmp/
//!     └── {uuid}          # in-flight writes, renamed into objects/
//! ```
//!
//! Writes are atomic: content lands in `tmp/` inside the same pool root and
//! is renamed into place, so a partial write never appears under its final
//! hash. Re-storing existing content is a no-op (content-addressed =
//! idempotent). The store knows nothing about manifests or workspaces.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CasError, CasResult};
use crate::hash::{ContentHash, HashAlgorithm, IncrementalHasher};

/// Read chunk size for streaming file hashes.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// An object observed during enumeration.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    /// Content hash parsed from the shard path.
    pub hash: ContentHash,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time; for write-once objects this is the creation time
    /// and is what the GC grace period is measured against.
    pub modified: SystemTime,
}

/// Filesystem-backed content store for a single pool.
#[derive(Debug, Clone)]
pub struct CasStorage {
    root: PathBuf,
    algorithm: HashAlgorithm,
}

impl CasStorage {
    /// Open (or create) a store at the given pool root.
    pub async fn open(root: impl Into<PathBuf>, algorithm: HashAlgorithm) -> CasResult<Self> {
        let root = root.into();
        let store = Self { root, algorithm };
        fs::create_dir_all(store.objects_dir())
            .await
            .map_err(|e| CasError::io("failed to create objects directory", e))?;
        fs::create_dir_all(store.tmp_dir())
            .await
            .map_err(|e| CasError::io("failed to create tmp directory", e))?;
        Ok(store)
    }

    /// The pool root this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The hash algorithm this pool was opened with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Final path for an object, whether or not it exists yet.
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir().join(hash.prefix()).join(hash.remainder())
    }

    /// Store a byte slice, returning its content hash.
    pub async fn store_bytes(&self, data: &[u8]) -> CasResult<ContentHash> {
        let hash = ContentHash::from_data(self.algorithm, data);
        let obj_path = self.object_path(&hash);

        if path_exists(&obj_path).await {
            return Ok(hash);
        }

        let tmp_path = self.tmp_dir().join(Uuid::new_v4().to_string());
        fs::write(&tmp_path, data)
            .await
            .map_err(|e| CasError::io("failed to write temp object file", e))?;

        self.promote(&tmp_path, &obj_path).await?;
        debug!(hash = %hash, size = data.len(), "stored object");
        Ok(hash)
    }

    /// Store a file's content, hashing it in streaming chunks.
    ///
    /// Returns the content hash and the byte count. The source file is left
    /// untouched; content is copied into the pool.
    pub async fn store_file(&self, path: &Path) -> CasResult<(ContentHash, u64)> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| CasError::io(format!("failed to open {}", path.display()), e))?;

        let mut hasher = IncrementalHasher::new(self.algorithm);
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| CasError::io(format!("failed to read {}", path.display()), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        let hash = hasher.finish();
        let obj_path = self.object_path(&hash);

        if path_exists(&obj_path).await {
            return Ok((hash, total));
        }

        let tmp_path = self.tmp_dir().join(Uuid::new_v4().to_string());
        fs::copy(path, &tmp_path)
            .await
            .map_err(|e| CasError::io("failed to copy into temp object file", e))?;

        self.promote(&tmp_path, &obj_path).await?;
        debug!(hash = %hash, size = total, "stored object from file");
        Ok((hash, total))
    }

    /// Move a temp file into its final object path.
    async fn promote(&self, tmp_path: &Path, obj_path: &Path) -> CasResult<()> {
        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CasError::io("failed to create object prefix directory", e))?;
        }

        // A concurrent writer may have won the race; the content is
        // identical either way, so losing is fine.
        if path_exists(obj_path).await {
            let _ = fs::remove_file(tmp_path).await;
            return Ok(());
        }

        match fs::rename(tmp_path, obj_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // Cross-filesystem: fall back to copy + delete
                fs::copy(tmp_path, obj_path)
                    .await
                    .map_err(|e| CasError::io("failed to copy temp object file", e))?;
                fs::remove_file(tmp_path)
                    .await
                    .map_err(|e| CasError::io("failed to remove temp object file", e))?;
                Ok(())
            }
            Err(e) => Err(CasError::io("failed to rename temp object file", e)),
        }
    }

    /// Check if an object exists.
    pub async fn exists(&self, hash: &ContentHash) -> bool {
        path_exists(&self.object_path(hash)).await
    }

    /// Open an object for reading.
    pub async fn open_object(&self, hash: &ContentHash) -> CasResult<fs::File> {
        let path = self.object_path(hash);
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CasError::ObjectNotFound(hash.clone()))
            }
            Err(e) => Err(CasError::io(format!("failed to open {}", path.display()), e)),
        }
    }

    /// Read an object fully into memory.
    pub async fn read_bytes(&self, hash: &ContentHash) -> CasResult<Vec<u8>> {
        let path = self.object_path(hash);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CasError::ObjectNotFound(hash.clone()))
            }
            Err(e) => Err(CasError::io(format!("failed to read {}", path.display()), e)),
        }
    }

    /// Delete an object. Idempotent; deleting an absent object is Ok(false).
    pub async fn delete(&self, hash: &ContentHash) -> CasResult<bool> {
        match fs::remove_file(self.object_path(hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CasError::io("failed to delete object", e)),
        }
    }

    /// Enumerate every object in the pool.
    ///
    /// This is a point-in-time snapshot of the shard directories, not a live
    /// view; re-invoke to restart. Files that don't parse as hashes of this
    /// pool's algorithm are skipped (foreign files are not ours to report).
    pub async fn enumerate_objects(&self) -> CasResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let objects_dir = self.objects_dir();

        let mut shards = match fs::read_dir(&objects_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(CasError::io("failed to list objects directory", e)),
        };

        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| CasError::io("failed to list objects directory", e))?
        {
            let shard_name = shard.file_name();
            let Some(prefix) = shard_name.to_str() else {
                continue;
            };
            if prefix.len() != 2 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
                continue;
            }

            let mut files = fs::read_dir(shard.path())
                .await
                .map_err(|e| CasError::io("failed to list shard directory", e))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| CasError::io("failed to list shard directory", e))?
            {
                let file_name = file.file_name();
                let Some(remainder) = file_name.to_str() else {
                    continue;
                };
                let Ok(hash) = ContentHash::from_str_checked(&format!("{prefix}{remainder}"))
                else {
                    continue;
                };
                let meta = file
                    .metadata()
                    .await
                    .map_err(|e| CasError::io("failed to stat object file", e))?;
                if !meta.is_file() {
                    continue;
                }
                entries.push(ObjectEntry {
                    hash,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }

        Ok(entries)
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> CasStorage {
        CasStorage::open(dir.path(), HashAlgorithm::Blake3)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let hash = store.store_bytes(b"Hello, World!").await.unwrap();
        assert_eq!(hash.as_str().len(), 32);

        let data = store.read_bytes(&hash).await.unwrap();
        assert_eq!(data, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let hash1 = store.store_bytes(b"Duplicate Me").await.unwrap();
        let hash2 = store.store_bytes(b"Duplicate Me").await.unwrap();
        assert_eq!(hash1, hash2);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.store_bytes(b"one").await.unwrap();
        store.store_bytes(b"one").await.unwrap();
        store.store_bytes(b"two").await.unwrap();

        let mut tmp = fs::read_dir(dir.path().join("tmp")).await.unwrap();
        assert!(tmp.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let hash = store.store_bytes(b"existence test").await.unwrap();
        assert!(store.exists(&hash).await);

        let missing: ContentHash = "00000000000000000000000000000000".parse().unwrap();
        assert!(!store.exists(&missing).await);
    }

    #[tokio::test]
    async fn test_open_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let missing: ContentHash = "00000000000000000000000000000000".parse().unwrap();
        let err = store.open_object(&missing).await.unwrap_err();
        assert!(matches!(err, CasError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let hash = store.store_bytes(b"delete me").await.unwrap();
        assert!(store.delete(&hash).await.unwrap());
        assert!(!store.exists(&hash).await);
        // Second delete is a silent no-op
        assert!(!store.delete(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_file_streams() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let src = dir.path().join("input.bin");
        let payload = vec![7u8; 200_000]; // spans multiple hash chunks
        fs::write(&src, &payload).await.unwrap();

        let (hash, size) = store.store_file(&src).await.unwrap();
        assert_eq!(size, payload.len() as u64);
        assert_eq!(hash, ContentHash::from_data(HashAlgorithm::Blake3, &payload));
        assert_eq!(store.read_bytes(&hash).await.unwrap(), payload);
        // Source untouched
        assert!(path_exists(&src).await);
    }

    #[tokio::test]
    async fn test_enumerate_objects() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let h1 = store.store_bytes(b"object one").await.unwrap();
        let h2 = store.store_bytes(b"object two").await.unwrap();

        let entries = store.enumerate_objects().await.unwrap();
        assert_eq!(entries.len(), 2);
        let hashes: Vec<_> = entries.iter().map(|e| e.hash.clone()).collect();
        assert!(hashes.contains(&h1));
        assert!(hashes.contains(&h2));
        let sizes: u64 = entries.iter().map(|e| e.size).sum();
        assert_eq!(sizes, 20);
    }

    #[tokio::test]
    async fn test_enumerate_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.store_bytes(b"real object").await.unwrap();

        // Drop junk into the objects tree
        let junk_shard = dir.path().join("objects").join("zz");
        fs::create_dir_all(&junk_shard).await.unwrap();
        fs::write(junk_shard.join("not-a-hash"), b"junk").await.unwrap();
        fs::write(dir.path().join("objects").join("README"), b"junk")
            .await
            .unwrap();

        let entries = store.enumerate_objects().await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_enumerate_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.enumerate_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sha256_pool() {
        let dir = TempDir::new().unwrap();
        let store = CasStorage::open(dir.path(), HashAlgorithm::Sha256)
            .await
            .unwrap();

        let hash = store.store_bytes(b"sha pool").await.unwrap();
        assert_eq!(hash.as_str().len(), 64);
        assert!(store.exists(&hash).await);
    }
}
