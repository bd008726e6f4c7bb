//! Filesystem artifact cache facade

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::expiration::{expiry_after, policy_for, ExpirationPolicy};
use crate::path::PathMapper;
use crate::store::{is_blank, ArtifactStore};
use crate::types::{CacheStats, ExpirationStrategy, FormatTag};

/// Validated configuration with everything derived from it
#[derive(Debug)]
struct Layout {
    config: CacheConfig,
    paths: PathMapper,
    policy: Box<dyn ExpirationPolicy>,
}

impl Layout {
    fn open(mut config: CacheConfig, store: &ArtifactStore) -> Result<Self> {
        config.base_path = resolve_base_path(&config.base_path, store)?;
        Ok(Self {
            paths: PathMapper::new(config.base_path.clone(), config.format),
            policy: policy_for(config.expiration, store.clone()),
            config,
        })
    }
}

/// Create the base path if missing and canonicalize it
fn resolve_base_path(base_path: &Path, store: &ArtifactStore) -> Result<PathBuf> {
    if base_path.as_os_str().is_empty() {
        error!("Empty cache base path");
        return Err(CacheError::Configuration("empty base path".to_string()));
    }

    if !base_path.exists() {
        info!(base_path = ?base_path, "Creating missing cache base path");
        store.create_dir_all(base_path).map_err(|e| {
            error!(base_path = ?base_path, error = %e, "Failed to create cache base path");
            CacheError::Configuration(format!(
                "cannot create base path {}: {}",
                base_path.display(),
                e
            ))
        })?;
    }

    let canonical = fs::canonicalize(base_path).map_err(|e| {
        error!(base_path = ?base_path, error = %e, "Invalid cache base path");
        CacheError::Configuration(format!(
            "invalid base path {}: {}",
            base_path.display(),
            e
        ))
    })?;

    if !canonical.is_dir() {
        error!(base_path = ?canonical, "Cache base path is not a directory");
        return Err(CacheError::Configuration(format!(
            "base path {} is not a directory",
            canonical.display()
        )));
    }

    Ok(canonical)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey);
    }
    Ok(())
}

/// A key-value cache persisting byte artifacts under a local directory
///
/// Every operation runs to completion synchronously on the calling thread.
/// Storage failures are logged and reported as misses or `false`; only an
/// empty key is returned as an error from data operations.
#[derive(Debug)]
pub struct FsCache {
    /// Active configuration, swapped whole by [`FsCache::reconfigure`]
    layout: RwLock<Arc<Layout>>,
    store: ArtifactStore,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

impl FsCache {
    /// Create a cache, creating and canonicalizing the base path.
    ///
    /// Fails with [`CacheError::Configuration`] if the base path is empty,
    /// cannot be created or does not resolve to a directory.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let store = ArtifactStore::new();
        let layout = Layout::open(config, &store)?;
        info!(
            base_path = ?layout.config.base_path,
            format = %layout.config.format,
            expiration = %layout.config.expiration,
            "Cache initialized"
        );

        Ok(Self {
            layout: RwLock::new(Arc::new(layout)),
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        })
    }

    /// Validate `config` and atomically replace the active configuration.
    ///
    /// On error the previous configuration stays active. Entries written
    /// under the old configuration are left on disk untouched.
    pub fn reconfigure(&self, config: CacheConfig) -> Result<()> {
        let layout = Arc::new(Layout::open(config, &self.store)?);
        info!(
            base_path = ?layout.config.base_path,
            format = %layout.config.format,
            expiration = %layout.config.expiration,
            "Cache reconfigured"
        );
        *self.layout.write().unwrap_or_else(PoisonError::into_inner) = layout;
        Ok(())
    }

    fn layout(&self) -> Arc<Layout> {
        Arc::clone(&self.layout.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Active configuration, with the canonical base path
    pub fn config(&self) -> CacheConfig {
        self.layout().config.clone()
    }

    pub fn base_path(&self) -> PathBuf {
        self.layout().paths.base_path().to_path_buf()
    }

    pub fn format(&self) -> FormatTag {
        self.layout().paths.format()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.layout().config.default_ttl
    }

    pub fn expiration(&self) -> ExpirationStrategy {
        self.layout().policy.strategy()
    }

    /// Shard directory that holds the artifact for `key`
    pub fn directory_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.layout().paths.directory_path(key))
    }

    /// Artifact file for `key`
    pub fn file_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.layout().paths.file_path(key))
    }

    /// Fetch an artifact; `None` if it is absent, unreadable or expired
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let layout = self.layout();
        let path = layout.paths.file_path(key);

        // Expiry is checked while the shared lock pins content and metadata
        let read = self.store.read_with(&path, |data, metadata| {
            let expired = layout.policy.is_expired(&path, metadata, SystemTime::now());
            (data, expired)
        });

        let value = match read {
            Ok(Some((data, _))) if data.is_empty() => {
                debug!(key = %key, "Cache file is empty");
                None
            }
            Ok(Some((_, true))) => {
                debug!(key = %key, "Cache entry expired");
                None
            }
            Ok(Some((data, false))) => {
                debug!(key = %key, "Cache hit");
                Some(data)
            }
            Ok(None) => {
                debug!(key = %key, path = ?path, "Cache file not found");
                None
            }
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to read cache file");
                None
            }
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    /// Fetch an artifact, returning `default` on a miss
    pub fn get_or(&self, key: &str, default: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_vec()))
    }

    /// Store an artifact.
    ///
    /// `ttl` overrides the configured default TTL for this entry. Returns
    /// `false` for blank values and on storage failure; a failed store never
    /// leaves a partial artifact behind.
    pub fn set(&self, key: &str, value: impl AsRef<[u8]>, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let layout = self.layout();
        let stored = self.store_artifact(&layout, key, value.as_ref(), ttl);

        if stored {
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(stored)
    }

    fn store_artifact(
        &self,
        layout: &Layout,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> bool {
        if is_blank(value) {
            info!(key = %key, "Cache value is empty, saving ignored");
            return false;
        }

        let dir = layout.paths.directory_path(key);
        if let Err(e) = self.store.create_dir_all(&dir) {
            warn!(key = %key, dir = ?dir, error = %e, "Failed to create cache directory");
            return false;
        }

        let path = layout.paths.file_path(key);
        let written_at = SystemTime::now();
        let expires_at = ttl
            .or(layout.config.default_ttl)
            .map(|ttl| expiry_after(written_at, ttl));

        // Expiry is recorded before the write lock is released
        let written = self.store.write_with(&path, value, |file| {
            layout.policy.record(&path, file, written_at, expires_at)
        });
        match written {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(
                    key = %key,
                    path = ?path,
                    error = %e,
                    "Failed to store cache entry, discarding it"
                );
                self.discard(layout, key, &path);
                return false;
            }
        }

        debug!(
            key = %key,
            size = value.len(),
            expires_at = ?expires_at.map(DateTime::<Utc>::from),
            "Cached artifact"
        );
        true
    }

    /// Best-effort removal of a half-stored entry
    fn discard(&self, layout: &Layout, key: &str, path: &Path) {
        if let Err(e) = self.store.remove(path) {
            warn!(key = %key, path = ?path, error = %e, "Failed to discard cache file");
        }
        if let Err(e) = layout.policy.forget(path) {
            warn!(key = %key, path = ?path, error = %e, "Failed to discard cache expiry");
        }
    }

    /// Remove an entry. Removing an absent entry succeeds; `false` means an
    /// I/O error occurred while removing an existing one.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let layout = self.layout();
        let path = layout.paths.file_path(key);

        match self.store.remove(&path) {
            Ok(true) => debug!(key = %key, "Deleted cache file"),
            Ok(false) => debug!(key = %key, path = ?path, "Cache file not found, ignoring delete"),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to delete cache file");
                return Ok(false);
            }
        }

        if let Err(e) = layout.policy.forget(&path) {
            warn!(key = %key, path = ?path, error = %e, "Failed to delete cache expiry");
            return Ok(false);
        }
        Ok(true)
    }

    /// Expiry recorded for the artifact at `path`, read under its shared
    /// lock. The outer `None` means the artifact is absent.
    fn recorded_expiry(
        &self,
        layout: &Layout,
        path: &Path,
    ) -> io::Result<Option<Option<SystemTime>>> {
        self.store
            .inspect(path, |metadata| layout.policy.expires_at(path, metadata))?
            .transpose()
    }

    /// Whether a fresh entry exists for `key`.
    ///
    /// Only a snapshot: another caller may set or delete the entry right
    /// after this returns.
    pub fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let layout = self.layout();
        let path = layout.paths.file_path(key);

        match self.recorded_expiry(&layout, &path) {
            Ok(Some(expires_at)) => Ok(expires_at.map_or(true, |t| SystemTime::now() < t)),
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to read cache expiry");
                Ok(false)
            }
        }
    }

    /// Whether an existing entry carries an expiry
    pub fn has_ttl(&self, key: &str) -> Result<bool> {
        Ok(self.expires_at(key)?.is_some())
    }

    /// Recorded expiry of an existing entry
    pub fn expires_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        validate_key(key)?;
        let layout = self.layout();
        let path = layout.paths.file_path(key);

        match self.recorded_expiry(&layout, &path) {
            Ok(expires_at) => Ok(expires_at.flatten().map(DateTime::<Utc>::from)),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to read cache expiry");
                Ok(None)
            }
        }
    }

    /// Whether an existing entry has expired. Absent entries are not
    /// expired; unreadable expiry metadata counts as expired.
    pub fn is_expired(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let layout = self.layout();
        let path = layout.paths.file_path(key);

        match self.recorded_expiry(&layout, &path) {
            Ok(Some(expires_at)) => Ok(expires_at.is_some_and(|t| SystemTime::now() >= t)),
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(
                    key = %key,
                    path = ?path,
                    error = %e,
                    "Unreadable expiry metadata, treating entry as expired"
                );
                Ok(true)
            }
        }
    }

    /// Remove every entry below the base path.
    ///
    /// Stops at the first failure and returns `false`; entries removed
    /// before it stay removed.
    pub fn clear(&self) -> bool {
        let layout = self.layout();
        let base_path = layout.paths.base_path();
        match self.store.clear(base_path) {
            Ok(removed) => {
                info!(base_path = ?base_path, removed, "Cache cleared");
                true
            }
            Err(e) => {
                error!(base_path = ?base_path, error = %e, "Failed to clear cache");
                false
            }
        }
    }

    /// Fetch several artifacts, substituting `default` for every miss.
    ///
    /// All keys are validated before any is read.
    pub fn get_multiple<I, K>(&self, keys: I, default: &[u8]) -> Result<HashMap<String, Vec<u8>>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        for key in &keys {
            validate_key(key.as_ref())?;
        }

        let mut values = HashMap::with_capacity(keys.len());
        for key in &keys {
            let key: &str = key.as_ref();
            values.insert(key.to_string(), self.get_or(key, default)?);
        }
        Ok(values)
    }

    /// Store several artifacts with a shared TTL.
    ///
    /// Stops at the first entry that fails to store and returns `false`.
    /// Entries stored before it are kept. All keys are validated before any
    /// is written.
    pub fn set_multiple<I, K, V>(&self, values: I, ttl: Option<Duration>) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let values: Vec<(K, V)> = values.into_iter().collect();
        for (key, _) in &values {
            validate_key(key.as_ref())?;
        }

        for (key, value) in &values {
            let key: &str = key.as_ref();
            if !self.set(key, value, ttl)? {
                warn!(key = %key, "Batch set stopped at failing entry");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Delete several entries.
    ///
    /// Stops at the first entry that fails to delete and returns `false`.
    /// All keys are validated before any is deleted.
    pub fn delete_multiple<I, K>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        for key in &keys {
            validate_key(key.as_ref())?;
        }

        for key in &keys {
            let key: &str = key.as_ref();
            if !self.delete(key)? {
                warn!(key = %key, "Batch delete stopped at failing entry");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
