//! Cache types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Cosmetic file extension appended to artifact file names.
///
/// Only the file name changes; payloads are stored as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    #[default]
    None,
    Json,
    Xml,
    Txt,
    Html,
    Png,
    Jpg,
}

impl FormatTag {
    /// File extension for this tag, `None` when no suffix is appended
    pub fn extension(self) -> Option<&'static str> {
        match self {
            FormatTag::None => None,
            FormatTag::Json => Some("json"),
            FormatTag::Xml => Some("xml"),
            FormatTag::Txt => Some("txt"),
            FormatTag::Html => Some("html"),
            FormatTag::Png => Some("png"),
            FormatTag::Jpg => Some("jpg"),
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("none"))
    }
}

impl FromStr for FormatTag {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(FormatTag::None),
            "json" => Ok(FormatTag::Json),
            "xml" => Ok(FormatTag::Xml),
            "txt" => Ok(FormatTag::Txt),
            "html" => Ok(FormatTag::Html),
            "png" => Ok(FormatTag::Png),
            "jpg" => Ok(FormatTag::Jpg),
            other => Err(CacheError::Configuration(format!(
                "unknown format tag: {}",
                other
            ))),
        }
    }
}

/// How entry expiry is persisted on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationStrategy {
    /// Absolute expiry timestamp in a `.ttl` file next to the artifact
    #[default]
    Sidecar,
    /// Expiry encoded as the artifact's modification time
    #[serde(rename = "mtime")]
    ModificationTime,
}

impl fmt::Display for ExpirationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationStrategy::Sidecar => f.write_str("sidecar"),
            ExpirationStrategy::ModificationTime => f.write_str("mtime"),
        }
    }
}

impl FromStr for ExpirationStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sidecar" => Ok(ExpirationStrategy::Sidecar),
            "mtime" | "modification_time" => Ok(ExpirationStrategy::ModificationTime),
            other => Err(CacheError::Configuration(format!(
                "unknown expiration strategy: {}",
                other
            ))),
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
}
