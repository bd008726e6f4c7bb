//! Filesystem operations on artifact files
//!
//! Writers hold an exclusive advisory lock on the destination file for the
//! whole truncate-write-finish sequence, readers hold a shared lock while
//! they read content and metadata. Locks are released when the `File` is
//! dropped, on every exit path.

use fs2::FileExt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Permissions for created shard directories: rwxr-x---
pub const DIR_MODE: u32 = 0o750;

/// True when `contents` is empty or only ASCII whitespace
pub fn is_blank(contents: &[u8]) -> bool {
    contents.iter().all(|b| b.is_ascii_whitespace() || *b == 0x0b)
}

/// Raw byte storage below a root directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir_mode: u32,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self { dir_mode: DIR_MODE }
    }
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `dir` and any missing parents with the store's directory mode
    pub fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_mode);
        }
        builder.create(dir)
    }

    /// Write `contents` to `path` under an exclusive lock.
    ///
    /// Returns `Ok(false)` without touching the filesystem when `contents`
    /// is blank.
    pub fn write(&self, path: &Path, contents: &[u8]) -> io::Result<bool> {
        self.write_with(path, contents, |_| Ok(()))
    }

    /// Like [`write`](Self::write), running `finish` on the written file
    /// before the exclusive lock is released.
    pub fn write_with<F>(&self, path: &Path, contents: &[u8], finish: F) -> io::Result<bool>
    where
        F: FnOnce(&File) -> io::Result<()>,
    {
        if is_blank(contents) {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        // Truncation waits for the lock so a concurrent writer's bytes are
        // never mixed with ours.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        file.set_len(0)?;
        file.write_all(contents)?;
        file.flush()?;
        finish(&file)?;

        debug!(path = ?path, size = contents.len(), "Wrote artifact");
        Ok(true)
    }

    /// Open a regular file and take a shared lock on it
    fn open_shared(&self, path: &Path) -> io::Result<Option<(File, Metadata)>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        FileExt::lock_shared(&file)?;

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some((file, metadata)))
    }

    /// Read the file at `path` under a shared lock; `Ok(None)` if it is absent
    pub fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        self.read_with(path, |contents, _| contents)
    }

    /// Read the file at `path` and hand its content and metadata to `f`
    /// while the shared lock is still held.
    pub fn read_with<T, F>(&self, path: &Path, f: F) -> io::Result<Option<T>>
    where
        F: FnOnce(Vec<u8>, &Metadata) -> T,
    {
        let Some((mut file, metadata)) = self.open_shared(path)? else {
            return Ok(None);
        };

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(Some(f(contents, &metadata)))
    }

    /// Hand the metadata of the file at `path` to `f` under a shared lock
    pub fn inspect<T, F>(&self, path: &Path, f: F) -> io::Result<Option<T>>
    where
        F: FnOnce(&Metadata) -> T,
    {
        Ok(self.open_shared(path)?.map(|(_file, metadata)| f(&metadata)))
    }

    /// Remove the file at `path`. Returns whether a file was removed; an
    /// absent file is not an error.
    pub fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete everything beneath `root`, keeping `root` itself.
    ///
    /// Walks depth-first with an explicit stack and stops at the first
    /// failure; whatever was removed before it stays removed. Symlinks are
    /// removed, never followed. Entries that vanish concurrently are skipped.
    /// Returns the number of removed entries.
    pub fn clear(&self, root: &Path) -> io::Result<usize> {
        let removed = clear_tree(root, |path| self.remove(path))?;
        debug!(root = ?root, removed, "Cleared directory tree");
        Ok(removed)
    }
}

enum Visit {
    Enter(PathBuf),
    Leave(PathBuf),
}

fn push_children(dir: &Path, stack: &mut Vec<Visit>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        stack.push(Visit::Enter(entry?.path()));
    }
    Ok(())
}

fn clear_tree<F>(root: &Path, mut remove_file: F) -> io::Result<usize>
where
    F: FnMut(&Path) -> io::Result<bool>,
{
    let mut stack = Vec::new();
    push_children(root, &mut stack)?;

    let mut removed = 0;
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(path) => {
                let file_type = match fs::symlink_metadata(&path) {
                    Ok(meta) => meta.file_type(),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                };
                if file_type.is_dir() {
                    stack.push(Visit::Leave(path.clone()));
                    match push_children(&path, &mut stack) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                } else if remove_file(&path)? {
                    removed += 1;
                }
            }
            Visit::Leave(path) => match fs::remove_dir(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
        }
    }

    Ok(removed)
}
