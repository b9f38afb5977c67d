//! Manifest boundary model.
//!
//! A manifest describes installable content: an ordered list of files, each
//! with a workspace-relative path and a source classification. Only
//! content-addressable files contribute to the CAS reference graph; local
//! files are copied from wherever they live, and remote files must be
//! fetched into the CAS before a workspace can be prepared (network I/O is
//! not this crate's job).

use std::collections::BTreeSet;

use cas::{ContentHash, ContentKind, ManifestRefs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a manifest file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSource {
    /// Bytes live in the CAS under this hash.
    ContentAddressable { hash: ContentHash },
    /// Bytes live at an absolute path outside the CAS.
    Local { path: PathBuf },
    /// Bytes must be downloaded first; not materializable by this crate.
    Remote { url: String },
}

/// One file a manifest contributes to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Workspace-relative path, `/`-separated.
    pub rel_path: String,
    /// Size in bytes.
    pub size: u64,
    pub source: FileSource,
}

impl ManifestFile {
    /// Convenience constructor for content-addressable files.
    pub fn content_addressed(rel_path: impl Into<String>, size: u64, hash: ContentHash) -> Self {
        Self {
            rel_path: rel_path.into(),
            size,
            source: FileSource::ContentAddressable { hash },
        }
    }

    /// The CAS hash, for content-addressable files.
    pub fn content_hash(&self) -> Option<&ContentHash> {
        match &self.source {
            FileSource::ContentAddressable { hash } => Some(hash),
            _ => None,
        }
    }
}

/// A description of installable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    pub id: String,
    /// Schema version string. Reuse decisions compare this for exact
    /// equality; there is no semantic-version ordering.
    pub version: String,
    pub kind: ContentKind,
    pub files: Vec<ManifestFile>,
}

impl ContentManifest {
    pub fn new(id: impl Into<String>, version: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            kind,
            files: Vec::new(),
        }
    }

    /// Hashes of every content-addressable file in this manifest.
    pub fn referenced_hashes(&self) -> BTreeSet<ContentHash> {
        self.files
            .iter()
            .filter_map(|f| f.content_hash().cloned())
            .collect()
    }

    /// Package up identity + reference set for the lifecycle manager.
    pub fn to_manifest_refs(&self) -> ManifestRefs {
        ManifestRefs {
            id: self.id.clone(),
            version: self.version.clone(),
            hashes: self.referenced_hashes(),
        }
    }
}
