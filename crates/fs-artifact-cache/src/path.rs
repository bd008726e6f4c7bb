//! Key to on-disk path mapping
//!
//! Every key is hashed to a SHA-256 hex digest. The first four digest
//! characters become single-character shard directories and the full digest
//! becomes the file name:
//!
//! ```text
//! <base>/<d0>/<d1>/<d2>/<d3>/<digest>[.<format>]
//! <base>/<d0>/<d1>/<d2>/<d3>/<digest>[.<format>].ttl
//! ```
//!
//! Hashing keeps short keys, multi-byte keys and keys containing path
//! separators inside the base directory.

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::types::FormatTag;

/// Number of single-character shard directories below the base path
pub const SHARD_DEPTH: usize = 4;

/// Suffix of expiry sidecar files
pub const SIDECAR_EXTENSION: &str = "ttl";

/// Pure mapping from cache keys to artifact paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    base_path: PathBuf,
    format: FormatTag,
}

impl PathMapper {
    pub fn new(base_path: impl Into<PathBuf>, format: FormatTag) -> Self {
        Self {
            base_path: base_path.into(),
            format,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn format(&self) -> FormatTag {
        self.format
    }

    /// Lowercase hex SHA-256 digest of a key
    pub fn digest(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Shard directory holding the artifact for `key`
    pub fn directory_path(&self, key: &str) -> PathBuf {
        self.shard_dir(&Self::digest(key))
    }

    /// Artifact file for `key`
    pub fn file_path(&self, key: &str) -> PathBuf {
        let digest = Self::digest(key);
        let mut name = OsString::from(&digest);
        if let Some(ext) = self.format.extension() {
            name.push(".");
            name.push(ext);
        }
        self.shard_dir(&digest).join(name)
    }

    /// Expiry sidecar for `key`: the artifact path with `.ttl` appended
    pub fn sidecar_path(&self, key: &str) -> PathBuf {
        sidecar_for(&self.file_path(key))
    }

    fn shard_dir(&self, digest: &str) -> PathBuf {
        let mut dir = self.base_path.clone();
        let mut buf = [0u8; 4];
        for c in digest.chars().take(SHARD_DEPTH) {
            dir.push(&*c.encode_utf8(&mut buf));
        }
        dir
    }
}

/// Sidecar path for an artifact path
pub(crate) fn sidecar_for(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}
