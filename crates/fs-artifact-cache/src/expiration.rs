//! Entry expiration strategies
//!
//! An entry is expired once `now >= expires_at`. When expiry metadata cannot
//! be read or parsed the entry is treated as expired (fail-closed).
//!
//! Expiry is recorded while the writer still holds the artifact's exclusive
//! lock and evaluated while a reader holds its shared lock, so a reader never
//! pairs new content with stale expiry metadata.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{File, FileTimes, Metadata};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::path::sidecar_for;
use crate::store::ArtifactStore;
use crate::types::ExpirationStrategy;

/// Unix seconds of the modification time marking an entry without TTL
/// under [`ModTimeTtl`] (2106-02-07)
pub const NEVER_SECS: u64 = u32::MAX as u64;

pub fn never() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(NEVER_SECS)
}

/// Expiry instant for an entry written at `now` with `ttl`, capped at [`never`]
pub fn expiry_after(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl).map_or_else(never, |t| t.min(never()))
}

/// Persists and evaluates entry expiry for artifacts
pub trait ExpirationPolicy: fmt::Debug + Send + Sync {
    fn strategy(&self) -> ExpirationStrategy;

    /// Record the expiry of a freshly written artifact. `None` means the
    /// entry never expires and clears any previous expiry.
    ///
    /// Called with the artifact's exclusive lock held; `file` is the open
    /// artifact.
    fn record(
        &self,
        artifact: &Path,
        file: &File,
        written_at: SystemTime,
        expires_at: Option<SystemTime>,
    ) -> io::Result<()>;

    /// Recorded expiry of an artifact, `None` if it has none
    fn expires_at(&self, artifact: &Path, metadata: &Metadata) -> io::Result<Option<SystemTime>>;

    /// Drop expiry metadata kept beside an artifact
    fn forget(&self, artifact: &Path) -> io::Result<()>;

    fn is_expired(&self, artifact: &Path, metadata: &Metadata, now: SystemTime) -> bool {
        match self.expires_at(artifact, metadata) {
            Ok(Some(expires_at)) => now >= expires_at,
            Ok(None) => false,
            Err(e) => {
                warn!(
                    path = ?artifact,
                    error = %e,
                    "Unreadable expiry metadata, treating entry as expired"
                );
                true
            }
        }
    }
}

/// Build the policy for a configured strategy
pub fn policy_for(strategy: ExpirationStrategy, store: ArtifactStore) -> Box<dyn ExpirationPolicy> {
    match strategy {
        ExpirationStrategy::Sidecar => Box::new(SidecarTtl::new(store)),
        ExpirationStrategy::ModificationTime => Box::new(ModTimeTtl),
    }
}

/// Expiry stored as decimal unix seconds in `<artifact>.ttl`
#[derive(Debug, Clone, Default)]
pub struct SidecarTtl {
    store: ArtifactStore,
}

impl SidecarTtl {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

/// Whole unix seconds, rounded up so the recorded expiry is never earlier
/// than the requested one.
fn timestamp_ceil(t: SystemTime) -> i64 {
    let dt = DateTime::<Utc>::from(t);
    if dt.timestamp_subsec_nanos() > 0 {
        dt.timestamp() + 1
    } else {
        dt.timestamp()
    }
}

fn parse_timestamp(raw: &[u8]) -> io::Result<SystemTime> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .trim();
    let secs: i64 = text.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid expiry timestamp {:?}: {}", text, e),
        )
    })?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(SystemTime::from)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expiry timestamp out of range: {}", secs),
            )
        })
}

impl ExpirationPolicy for SidecarTtl {
    fn strategy(&self) -> ExpirationStrategy {
        ExpirationStrategy::Sidecar
    }

    fn record(
        &self,
        artifact: &Path,
        _file: &File,
        _written_at: SystemTime,
        expires_at: Option<SystemTime>,
    ) -> io::Result<()> {
        // Lock order is always artifact, then sidecar
        let sidecar = sidecar_for(artifact);
        match expires_at {
            Some(t) => {
                let stamp = timestamp_ceil(t).to_string();
                self.store.write(&sidecar, stamp.as_bytes())?;
            }
            None => {
                self.store.remove(&sidecar)?;
            }
        }
        Ok(())
    }

    fn expires_at(&self, artifact: &Path, _metadata: &Metadata) -> io::Result<Option<SystemTime>> {
        match self.store.read(&sidecar_for(artifact))? {
            Some(raw) => parse_timestamp(&raw).map(Some),
            None => Ok(None),
        }
    }

    fn forget(&self, artifact: &Path) -> io::Result<()> {
        self.store.remove(&sidecar_for(artifact)).map(|_| ())
    }
}

/// Expiry stored as the artifact's modification time
///
/// Entries without a TTL carry [`never`] as their modification time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModTimeTtl;

impl ExpirationPolicy for ModTimeTtl {
    fn strategy(&self) -> ExpirationStrategy {
        ExpirationStrategy::ModificationTime
    }

    fn record(
        &self,
        _artifact: &Path,
        file: &File,
        written_at: SystemTime,
        expires_at: Option<SystemTime>,
    ) -> io::Result<()> {
        let times = FileTimes::new()
            .set_accessed(written_at)
            .set_modified(expires_at.unwrap_or_else(never));
        file.set_times(times)
    }

    fn expires_at(&self, _artifact: &Path, metadata: &Metadata) -> io::Result<Option<SystemTime>> {
        let modified = metadata.modified()?;
        if modified >= never() {
            Ok(None)
        } else {
            Ok(Some(modified))
        }
    }

    fn forget(&self, _artifact: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// Write `artifact` and record its expiry under the write lock
    fn put(policy: &dyn ExpirationPolicy, artifact: &Path, expires_at: Option<SystemTime>) {
        ArtifactStore::new()
            .write_with(artifact, b"hello", |file| {
                policy.record(artifact, file, at(100), expires_at)
            })
            .unwrap();
    }

    fn expired(policy: &dyn ExpirationPolicy, artifact: &Path, now: SystemTime) -> bool {
        let metadata = fs::metadata(artifact).unwrap();
        policy.is_expired(artifact, &metadata, now)
    }

    fn recorded(policy: &dyn ExpirationPolicy, artifact: &Path) -> io::Result<Option<SystemTime>> {
        let metadata = fs::metadata(artifact).unwrap();
        policy.expires_at(artifact, &metadata)
    }

    #[test]
    fn test_expiry_after() {
        assert_eq!(expiry_after(at(100), Duration::from_secs(2)), at(102));
        assert_eq!(expiry_after(at(100), Duration::MAX), never());
        assert_eq!(expiry_after(never(), Duration::from_secs(1)), never());
    }

    #[test]
    fn test_timestamp_ceil() {
        assert_eq!(timestamp_ceil(at(1_700_000_000)), 1_700_000_000);
        assert_eq!(
            timestamp_ceil(at(1_700_000_000) + Duration::from_millis(1)),
            1_700_000_001
        );
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp(b"1700000000").unwrap(), at(1_700_000_000));
        assert_eq!(parse_timestamp(b" 42\n").unwrap(), at(42));
        assert!(parse_timestamp(b"tomorrow").is_err());
        assert!(parse_timestamp(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn test_sidecar_record_writes_decimal_seconds() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact.txt");
        let policy = SidecarTtl::default();
        put(&policy, &artifact, Some(at(1_700_000_002)));

        let raw = fs::read_to_string(dir.path().join("artifact.txt.ttl")).unwrap();
        assert_eq!(raw, "1700000002");
        assert_eq!(recorded(&policy, &artifact).unwrap(), Some(at(1_700_000_002)));
    }

    #[test]
    fn test_sidecar_boundary_is_inclusive() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = SidecarTtl::default();
        put(&policy, &artifact, Some(at(102)));

        assert!(!expired(&policy, &artifact, at(101)));
        assert!(!expired(&policy, &artifact, at(102) - Duration::from_millis(1)));
        assert!(expired(&policy, &artifact, at(102)));
        assert!(expired(&policy, &artifact, at(103)));
    }

    #[test]
    fn test_sidecar_rounds_fractional_expiry_up() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = SidecarTtl::default();
        let expiry = at(102) + Duration::from_millis(900);
        put(&policy, &artifact, Some(expiry));

        // Never reported expired before the requested instant
        assert!(!expired(&policy, &artifact, expiry));
        assert!(expired(&policy, &artifact, at(103)));
    }

    #[test]
    fn test_sidecar_none_removes_stale_sidecar() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = SidecarTtl::default();
        put(&policy, &artifact, Some(at(101)));
        assert!(expired(&policy, &artifact, at(200)));

        put(&policy, &artifact, None);
        assert!(!dir.path().join("artifact.ttl").exists());
        assert_eq!(recorded(&policy, &artifact).unwrap(), None);
        assert!(!expired(&policy, &artifact, at(200)));
    }

    #[test]
    fn test_sidecar_without_file_never_expires() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        fs::write(&artifact, b"hello").unwrap();
        assert!(!expired(&SidecarTtl::default(), &artifact, SystemTime::now()));
    }

    #[test]
    fn test_sidecar_garbage_fails_closed() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        fs::write(&artifact, b"hello").unwrap();
        fs::write(dir.path().join("artifact.ttl"), b"not a number").unwrap();

        let policy = SidecarTtl::default();
        assert!(recorded(&policy, &artifact).is_err());
        assert!(expired(&policy, &artifact, at(0)));
    }

    #[test]
    fn test_sidecar_record_failure_propagates() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        fs::create_dir(dir.path().join("artifact.ttl")).unwrap();

        let policy = SidecarTtl::default();
        let result = ArtifactStore::new().write_with(&artifact, b"hello", |file| {
            policy.record(&artifact, file, at(100), Some(at(200)))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_sidecar_forget() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = SidecarTtl::default();
        put(&policy, &artifact, Some(at(500)));

        policy.forget(&artifact).unwrap();
        policy.forget(&artifact).unwrap();
        assert!(!dir.path().join("artifact.ttl").exists());
    }

    #[test]
    fn test_mtime_record_and_evaluate() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = ModTimeTtl;
        let expiry = at(1_700_000_002) + Duration::from_millis(250);
        put(&policy, &artifact, Some(expiry));

        assert_eq!(fs::metadata(&artifact).unwrap().modified().unwrap(), expiry);
        assert_eq!(recorded(&policy, &artifact).unwrap(), Some(expiry));
        assert!(!expired(&policy, &artifact, at(1_700_000_001)));
        assert!(expired(&policy, &artifact, expiry));
        assert!(!dir.path().join("artifact.ttl").exists());
    }

    #[test]
    fn test_mtime_without_ttl_never_expires() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        let policy = ModTimeTtl;
        put(&policy, &artifact, None);

        let later = SystemTime::now() + Duration::from_secs(86_400);
        assert_eq!(recorded(&policy, &artifact).unwrap(), None);
        assert!(!expired(&policy, &artifact, later));
    }

    #[test]
    fn test_mtime_plain_write_is_already_expired() {
        // Without a recorded expiry the mtime is the write time, which is
        // in the past by the time anyone reads it.
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("artifact");
        ArtifactStore::new().write(&artifact, b"hello").unwrap();

        let now = SystemTime::now() + Duration::from_secs(1);
        assert!(expired(&ModTimeTtl, &artifact, now));
    }

    #[test]
    fn test_policy_for() {
        let store = ArtifactStore::new();
        assert_eq!(
            policy_for(ExpirationStrategy::Sidecar, store.clone()).strategy(),
            ExpirationStrategy::Sidecar
        );
        assert_eq!(
            policy_for(ExpirationStrategy::ModificationTime, store).strategy(),
            ExpirationStrategy::ModificationTime
        );
    }
}
