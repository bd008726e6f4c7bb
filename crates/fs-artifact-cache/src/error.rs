//! Error types for the artifact cache

use std::fmt;

/// Errors surfaced to callers of the cache.
///
/// Storage failures during data operations are never returned here: they are
/// logged and reported as a miss or a `false` result instead.
#[derive(Debug)]
pub enum CacheError {
    /// An empty key was passed to a keyed operation
    InvalidKey,
    /// The base path or an environment value could not be used
    Configuration(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidKey => write!(f, "Invalid cache key: key is empty"),
            CacheError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

pub type Result<T> = std::result::Result<T, CacheError>;
