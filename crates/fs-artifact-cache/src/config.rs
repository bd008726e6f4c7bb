use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::types::{ExpirationStrategy, FormatTag};

/// Cache configuration
///
/// The base path is validated (created and canonicalized) when the
/// configuration is handed to [`FsCache::new`](crate::FsCache::new) or
/// [`FsCache::reconfigure`](crate::FsCache::reconfigure), not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub base_path: PathBuf,
    /// TTL applied to entries stored without an explicit one
    #[serde(default, rename = "default_ttl_secs", with = "ttl_secs")]
    pub default_ttl: Option<Duration>,
    #[serde(default)]
    pub format: FormatTag,
    #[serde(default)]
    pub expiration: ExpirationStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./cache/artifacts"),
            default_ttl: None,
            format: FormatTag::None,
            expiration: ExpirationStrategy::Sidecar,
        }
    }
}

impl CacheConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_format(mut self, format: FormatTag) -> Self {
        self.format = format;
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationStrategy) -> Self {
        self.expiration = expiration;
        self
    }

    /// Parse configuration from environment variables
    ///
    /// - `CACHE_DIR`: base path (default `./cache/artifacts`)
    /// - `CACHE_TTL_SECS`: default TTL in seconds (default: none)
    /// - `CACHE_FORMAT`: format tag (`json`, `xml`, `txt`, `html`, `png`, `jpg`)
    /// - `CACHE_EXPIRATION`: `sidecar` or `mtime`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let base_path = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_path);

        let default_ttl = match lookup("CACHE_TTL_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| {
                    CacheError::Configuration(format!("invalid CACHE_TTL_SECS {:?}: {}", raw, e))
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let format = match lookup("CACHE_FORMAT") {
            Some(raw) => raw.parse()?,
            None => defaults.format,
        };

        let expiration = match lookup("CACHE_EXPIRATION") {
            Some(raw) => raw.parse()?,
            None => defaults.expiration,
        };

        Ok(Self {
            base_path,
            default_ttl,
            format,
            expiration,
        })
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        ttl: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        ttl.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
