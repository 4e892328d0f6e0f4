//! Bulk removal of entries and empty shard directories

use crate::file_io;
use crate::scan::{EntryFilter, GlobWalker};
use fscache_common::Result;
use nix::errno::Errno;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Remove every entry under `prefix` that passes `filter`
///
/// Returns the number of value files removed. A value file that cannot be
/// removed aborts the sweep; side-car removal is best effort.
pub fn clear_by_prefix(
    cache_dir: &Path,
    prefix: &str,
    dir_level: u8,
    filter: &EntryFilter,
) -> Result<usize> {
    let mut removed = 0;

    for data_path in GlobWalker::open(cache_dir, prefix, dir_level)? {
        let Some(candidate) = filter.check(&data_path)? else {
            continue;
        };

        if file_io::unlink(&data_path)? {
            removed += 1;
        }

        let info_path = candidate.info.filespec.info_path();
        if let Err(e) = file_io::unlink(&info_path) {
            warn!("Failed to remove {}: {}", info_path.display(), e);
        }
    }

    debug!(
        "Cleared {} entries with prefix '{}' (mode {})",
        removed,
        prefix,
        filter.mode()
    );
    Ok(removed)
}

/// Remove empty shard directories under `dir`, deepest first
///
/// Only directories named `<prefix>*` within `dir_level` levels are
/// considered. Non-empty directories stay; other failures are logged.
/// Returns the number of directories removed.
pub fn remove_empty_dirs(dir: &Path, prefix: &str, dir_level: u8) -> usize {
    if dir_level == 0 {
        return 0;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_shard = entry.file_type().is_ok_and(|t| t.is_dir())
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix));
        if !is_shard {
            continue;
        }

        let path = entry.path();
        removed += remove_empty_dirs(&path, prefix, dir_level - 1);

        match fs::remove_dir(&path) {
            Ok(()) => removed += 1,
            Err(e)
                if e.raw_os_error() == Some(Errno::ENOTEMPTY as i32)
                    || e.raw_os_error() == Some(Errno::EEXIST as i32) => {}
            Err(e) => warn!("Failed to remove directory {}: {}", path.display(), e),
        }
    }
    removed
}
