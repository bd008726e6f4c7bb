//! Embedded filesystem artifact cache with TTL expiration
//!
//! Stores opaque byte payloads under a sharded directory tree below a base
//! path. Entries may expire after a per-entry or store-wide TTL, recorded
//! either in a `.ttl` sidecar file or in the artifact's modification time.
//! Expired entries are hidden from reads but never eagerly deleted.

mod cache;
mod config;
mod error;
mod expiration;
mod path;
mod store;
mod types;

pub use cache::FsCache;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use expiration::{ExpirationPolicy, ModTimeTtl, SidecarTtl};
pub use path::PathMapper;
pub use store::ArtifactStore;
pub use types::{CacheStats, ExpirationStrategy, FormatTag};
