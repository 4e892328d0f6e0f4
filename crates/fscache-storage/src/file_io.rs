//! Locked file I/O
//!
//! Cooperative `flock(2)` locking between processes sharing a cache tree:
//! - reads take a shared lock for the duration of the read
//! - writes take an exclusive lock, either waiting for it or giving up
//!
//! Locks are released when the guard drops, after the data is written.

use fscache_common::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::time::SystemTime;

/// How a write acquires its lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteLock {
    /// No locking
    None,
    /// Wait for the exclusive lock
    Blocking,
    /// Fail with `LockContention` if another process holds a lock
    NonBlocking,
}

impl WriteLock {
    /// Pick the lock mode from the `file_locking` / `file_blocking` options
    #[must_use]
    pub const fn from_options(locking: bool, blocking: bool) -> Self {
        match (locking, blocking) {
            (false, _) => Self::None,
            (true, true) => Self::Blocking,
            (true, false) => Self::NonBlocking,
        }
    }
}

fn runtime(action: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::runtime(format!("failed to {action} {}: {e}", path.display()))
}

/// Read a whole file; `None` if it does not exist
pub fn read_file(path: &Path, locking: bool) -> Result<Option<Vec<u8>>> {
    if !locking {
        return match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(runtime("read", path, e)),
        };
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(runtime("open", path, e)),
    };

    let mut locked = Flock::lock(file, FlockArg::LockShared)
        .map_err(|(_, errno)| runtime("lock", path, errno))?;

    let mut data = Vec::new();
    locked
        .read_to_end(&mut data)
        .map_err(|e| runtime("read", path, e))?;

    Ok(Some(data))
}

/// Write a whole file, creating it with `permission` if needed
pub fn write_file(path: &Path, data: &[u8], lock: WriteLock, permission: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(permission);

    if lock == WriteLock::None {
        let mut file = options
            .truncate(true)
            .open(path)
            .map_err(|e| runtime("open", path, e))?;
        return file.write_all(data).map_err(|e| runtime("write", path, e));
    }

    // Truncate only once the lock is held, so readers never see a torn file
    let file = options
        .truncate(false)
        .open(path)
        .map_err(|e| runtime("open", path, e))?;

    let arg = if lock == WriteLock::Blocking {
        FlockArg::LockExclusive
    } else {
        FlockArg::LockExclusiveNonblock
    };

    let mut locked = Flock::lock(file, arg).map_err(|(_, errno)| {
        if errno == Errno::EWOULDBLOCK {
            Error::LockContention {
                path: path.display().to_string(),
            }
        } else {
            runtime("lock", path, errno)
        }
    })?;

    locked
        .set_len(0)
        .map_err(|e| runtime("truncate", path, e))?;
    locked
        .write_all(data)
        .map_err(|e| runtime("write", path, e))
}

/// Remove a file; `Ok(false)` if it was already gone
///
/// A failed unlink is only an error when the file is still there afterwards.
pub fn unlink(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) if path.exists() => Err(runtime("unlink", path, e)),
        Err(_) => Ok(false),
    }
}

/// Set a file's modification time
pub fn touch(path: &Path, mtime: SystemTime) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| runtime("open", path, e))?;
    file.set_modified(mtime)
        .map_err(|e| runtime("touch", path, e))
}

/// Create a directory and any missing parents with `permission`
pub fn create_dirs(path: &Path, permission: u32) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(permission)
        .create(path)
        .map_err(|e| runtime("create directory", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-foo.dat");

        let mut payload = vec![0u8; 8192];
        rand::thread_rng().fill_bytes(&mut payload);

        for lock in [WriteLock::None, WriteLock::Blocking, WriteLock::NonBlocking] {
            write_file(&path, &payload, lock, 0o660).unwrap();
            assert_eq!(read_file(&path, true).unwrap().unwrap(), payload);
            assert_eq!(read_file(&path, false).unwrap().unwrap(), payload);
        }
    }

    #[test]
    fn test_overwrite_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-foo.dat");

        write_file(&path, b"a much longer value", WriteLock::Blocking, 0o660).unwrap();
        write_file(&path, b"short", WriteLock::Blocking, 0o660).unwrap();
        assert_eq!(read_file(&path, true).unwrap().unwrap(), b"short");
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nothing.dat");
        assert!(read_file(&path, true).unwrap().is_none());
        assert!(read_file(&path, false).unwrap().is_none());
    }

    #[test]
    fn test_non_blocking_write_contention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-foo.dat");
        write_file(&path, b"first", WriteLock::Blocking, 0o660).unwrap();

        // A separate open file description holds the lock
        let holder = Flock::lock(File::open(&path).unwrap(), FlockArg::LockShared).unwrap();

        let err = write_file(&path, b"second", WriteLock::NonBlocking, 0o660).unwrap_err();
        assert!(err.is_lock_contention());
        drop(holder);

        assert_eq!(read_file(&path, true).unwrap().unwrap(), b"first");
        write_file(&path, b"second", WriteLock::NonBlocking, 0o660).unwrap();
        assert_eq!(read_file(&path, true).unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_unlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-foo.dat");
        write_file(&path, b"x", WriteLock::None, 0o660).unwrap();

        assert!(unlink(&path).unwrap());
        assert!(!unlink(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_touch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app-foo.dat");
        write_file(&path, b"x", WriteLock::None, 0o660).unwrap();

        let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        touch(&path, when).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), when);

        assert!(touch(&dir.path().join("missing.dat"), when).is_err());
    }

    #[test]
    fn test_create_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("app-ac").join("app-bd");
        create_dirs(&nested, 0o770).unwrap();
        assert!(nested.is_dir());
        // Existing directories are fine
        create_dirs(&nested, 0o770).unwrap();
    }
}
