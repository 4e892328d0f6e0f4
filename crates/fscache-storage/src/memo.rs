//! Single-slot stat memo
//!
//! Remembers the file spec and stat info of the last key resolved, so an
//! `exists` followed by a `get` of the same key costs one `stat(2)`.

use crate::clock::unix_secs;
use crate::layout::{FileSpec, PathMapper};
use fscache_common::{Error, Result};
use parking_lot::Mutex;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stat info of an existing value file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInfo {
    pub filespec: FileSpec,
    pub mtime: SystemTime,
    pub size: u64,
    pub ctime: Option<SystemTime>,
    pub atime: Option<SystemTime>,
}

impl KeyInfo {
    /// Stat the value file of `filespec`; `None` if it does not exist
    pub fn stat(filespec: FileSpec, with_ctime: bool, with_atime: bool) -> Result<Option<Self>> {
        let path = filespec.data_path();
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::runtime(format!(
                    "failed to stat {}: {e}",
                    path.display()
                )));
            }
        };

        let mtime = meta.modified().map_err(|e| {
            Error::runtime(format!("failed to read mtime of {}: {e}", path.display()))
        })?;

        Ok(Some(Self {
            filespec,
            mtime,
            size: meta.len(),
            ctime: with_ctime.then(|| change_time(&meta)).flatten(),
            atime: with_atime.then(|| meta.accessed().ok()).flatten(),
        }))
    }

    /// Modification time in whole seconds
    #[must_use]
    pub fn mtime_secs(&self) -> u64 {
        unix_secs(self.mtime)
    }

    /// Expired iff `ttl > 0` and `now >= mtime + ttl`, at one second precision
    #[must_use]
    pub fn is_expired(&self, ttl: u64, now: SystemTime) -> bool {
        ttl > 0 && unix_secs(now) >= self.mtime_secs().saturating_add(ttl)
    }
}

fn change_time(meta: &Metadata) -> Option<SystemTime> {
    let secs = u64::try_from(meta.ctime()).ok()?;
    let nanos = u32::try_from(meta.ctime_nsec()).ok()?;
    Some(UNIX_EPOCH + Duration::new(secs, nanos))
}

/// Which optional times a lookup should collect
#[derive(Clone, Copy, Debug, Default)]
pub struct StatFields {
    pub ctime: bool,
    pub atime: bool,
}

/// The memo slot, keyed by `(namespace, key)`
#[derive(Debug, Default)]
pub struct KeyMemo {
    slot: Mutex<Option<(String, String, KeyInfo)>>,
}

impl KeyMemo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stat info for a key, from the memo when it holds the same key
    pub fn lookup(
        &self,
        mapper: &PathMapper,
        namespace: &str,
        key: &str,
        fields: StatFields,
    ) -> Result<Option<KeyInfo>> {
        if let Some((ns, k, info)) = self.slot.lock().as_ref() {
            if ns == namespace && k == key {
                return Ok(Some(info.clone()));
            }
        }

        let filespec = mapper.resolve(namespace, key);
        let info = KeyInfo::stat(filespec, fields.ctime, fields.atime)?;

        let mut slot = self.slot.lock();
        *slot = info
            .clone()
            .map(|info| (namespace.to_string(), key.to_string(), info));
        Ok(info)
    }

    /// Forget the memoized entry
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_io::{self, WriteLock};
    use tempfile::tempdir;

    #[test]
    fn test_stat_missing_is_none() {
        let dir = tempdir().unwrap();
        let spec = FileSpec::new(dir.path().join("app-none"));
        assert!(KeyInfo::stat(spec, true, true).unwrap().is_none());
    }

    #[test]
    fn test_stat_optional_times() {
        let dir = tempdir().unwrap();
        let spec = FileSpec::new(dir.path().join("app-foo"));
        file_io::write_file(&spec.data_path(), b"bar", WriteLock::None, 0o660).unwrap();

        let bare = KeyInfo::stat(spec.clone(), false, false).unwrap().unwrap();
        assert_eq!(bare.size, 3);
        assert!(bare.ctime.is_none() && bare.atime.is_none());

        let full = KeyInfo::stat(spec, true, true).unwrap().unwrap();
        assert!(full.ctime.is_some() && full.atime.is_some());
    }

    #[test]
    fn test_expiry_boundary() {
        let info = KeyInfo {
            filespec: FileSpec::new("/tmp/c/app-foo".into()),
            mtime: UNIX_EPOCH + Duration::from_secs(1_000),
            size: 0,
            ctime: None,
            atime: None,
        };
        let at = |secs| UNIX_EPOCH + Duration::from_secs(secs);

        assert!(!info.is_expired(0, at(4_000_000_000)));
        assert!(!info.is_expired(10, at(1_009)));
        assert!(info.is_expired(10, at(1_010)));
        assert!(info.is_expired(10, at(1_011)));
    }

    #[test]
    fn test_memo_hits_and_clears() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 0);
        let memo = KeyMemo::new();
        let fields = StatFields::default();

        assert!(memo.lookup(&mapper, "app", "foo", fields).unwrap().is_none());

        let spec = mapper.resolve("app", "foo");
        file_io::write_file(&spec.data_path(), b"bar", WriteLock::None, 0o660).unwrap();
        let first = memo.lookup(&mapper, "app", "foo", fields).unwrap().unwrap();

        // The memo answers even after the file is gone
        std::fs::remove_file(spec.data_path()).unwrap();
        let second = memo.lookup(&mapper, "app", "foo", fields).unwrap().unwrap();
        assert_eq!(first, second);

        memo.clear();
        assert!(memo.lookup(&mapper, "app", "foo", fields).unwrap().is_none());
    }

    #[test]
    fn test_memo_is_per_key() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 1);
        let memo = KeyMemo::new();
        let fields = StatFields::default();

        let spec = mapper.resolve("app", "foo");
        file_io::create_dirs(spec.parent().unwrap(), 0o770).unwrap();
        file_io::write_file(&spec.data_path(), b"bar", WriteLock::None, 0o660).unwrap();

        assert!(memo.lookup(&mapper, "app", "foo", fields).unwrap().is_some());
        assert!(memo.lookup(&mapper, "other", "foo", fields).unwrap().is_none());
        assert!(memo.lookup(&mapper, "app", "baz", fields).unwrap().is_none());
    }
}
