//! Configuration types for fscache
//!
//! This module defines the options recognised by the filesystem cache
//! adapter. Every field has a default so partial TOML tables deserialize.

use crate::checksum::IntegrityAlgo;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default key and namespace pattern
pub const DEFAULT_PATTERN: &str = r"(?i)^[a-z0-9_+\-]*$";

/// Highest supported shard depth
pub const MAX_DIR_LEVEL: u8 = 16;

/// Options for the filesystem cache adapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemOptions {
    /// Default namespace for items
    pub namespace: String,
    /// Joins namespace and key (and shard segment) in file names
    pub namespace_separator: String,
    /// Pattern namespaces must match
    pub namespace_pattern: String,
    /// Pattern keys must match
    pub key_pattern: String,
    /// Root of the cache tree (None = system temp dir)
    pub cache_dir: Option<PathBuf>,
    /// Permission bits for cache files (subject to the process umask)
    pub file_permission: u32,
    /// Permission bits for shard directories (subject to the process umask)
    pub dir_permission: u32,
    /// Number of shard directory levels (0-16)
    pub dir_level: u8,
    /// Lock files on read and write
    pub file_locking: bool,
    /// Wait for the write lock instead of skipping the write
    pub file_blocking: bool,
    /// Don't report access time as metadata
    pub no_atime: bool,
    /// Don't report change time as metadata
    pub no_ctime: bool,
    /// Verify a stored digest when reading values
    pub read_control: bool,
    /// Digest algorithm used by read control
    pub read_control_algo: IntegrityAlgo,
    /// Drop memoized stat info at the start of every operation
    pub clear_stat_cache: bool,
    /// Default time-to-live in seconds (0 = never expires)
    pub ttl: u64,
    /// Report missing items as a sentinel instead of an error
    pub ignore_missing_items: bool,
    /// Allow read operations
    pub readable: bool,
    /// Allow write operations
    pub writable: bool,
}

impl Default for FilesystemOptions {
    fn default() -> Self {
        Self {
            namespace: "fscache".to_string(),
            namespace_separator: "-".to_string(),
            namespace_pattern: DEFAULT_PATTERN.to_string(),
            key_pattern: DEFAULT_PATTERN.to_string(),
            cache_dir: None,
            file_permission: 0o660,
            dir_permission: 0o770,
            dir_level: 1,
            file_locking: true,
            file_blocking: true,
            no_atime: true,
            no_ctime: true,
            read_control: false,
            read_control_algo: IntegrityAlgo::default(),
            clear_stat_cache: true,
            ttl: 0,
            ignore_missing_items: false,
            readable: true,
            writable: true,
        }
    }
}

impl FilesystemOptions {
    /// Create options rooted at `cache_dir`
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..Default::default()
        }
    }

    /// Set file permissions from a umask
    pub fn set_file_umask(&mut self, umask: u32) -> Result<()> {
        let permission = !umask & 0o777;
        validate_file_permission(permission)?;
        self.file_permission = permission;
        Ok(())
    }

    /// The umask equivalent of the file permission
    #[must_use]
    pub const fn file_umask(&self) -> u32 {
        !self.file_permission & 0o777
    }

    /// Set directory permissions from a umask
    pub fn set_dir_umask(&mut self, umask: u32) -> Result<()> {
        let permission = !umask & 0o777;
        validate_dir_permission(permission)?;
        self.dir_permission = permission;
        Ok(())
    }

    /// The umask equivalent of the directory permission
    #[must_use]
    pub const fn dir_umask(&self) -> u32 {
        !self.dir_permission & 0o777
    }

    /// Check option values without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        validate_file_permission(self.file_permission)?;
        validate_dir_permission(self.dir_permission)?;

        if self.dir_level > MAX_DIR_LEVEL {
            return Err(Error::invalid_argument(format!(
                "directory level {} must be between 0 and {}",
                self.dir_level, MAX_DIR_LEVEL
            )));
        }

        if self.namespace_separator.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::invalid_argument(
                "namespace separator must not contain a path separator",
            ));
        }

        Ok(())
    }
}

fn validate_file_permission(permission: u32) -> Result<()> {
    if permission & 0o600 != 0o600 {
        return Err(Error::invalid_argument(
            "invalid file permission: need permissions to read and write files by owner",
        ));
    }
    if permission & 0o111 != 0 {
        return Err(Error::invalid_argument(
            "invalid file permission: executable cache files are not allowed",
        ));
    }
    Ok(())
}

fn validate_dir_permission(permission: u32) -> Result<()> {
    if permission & 0o700 != 0o700 {
        return Err(Error::invalid_argument(
            "invalid directory permission: need permissions to execute, read and write directories by owner",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FilesystemOptions::default();
        assert_eq!(options.namespace_separator, "-");
        assert_eq!(options.dir_level, 1);
        assert_eq!(options.ttl, 0);
        assert!(options.file_locking && options.file_blocking);
        assert!(options.no_atime && options.no_ctime);
        assert_eq!(options.file_umask(), 0o117);
        assert_eq!(options.dir_umask(), 0o007);
        options.validate().unwrap();
    }

    #[test]
    fn test_file_umask_rules() {
        let mut options = FilesystemOptions::default();

        options.set_file_umask(0o022).unwrap_err(); // would allow exec bits
        options.set_file_umask(0o277).unwrap_err(); // owner can't write
        options.set_file_umask(0o177).unwrap();
        assert_eq!(options.file_permission, 0o600);
    }

    #[test]
    fn test_dir_umask_rules() {
        let mut options = FilesystemOptions::default();

        options.set_dir_umask(0o100).unwrap_err();
        options.set_dir_umask(0o022).unwrap();
        assert_eq!(options.dir_permission, 0o755);
    }

    #[test]
    fn test_dir_level_range() {
        let options = FilesystemOptions {
            dir_level: 17,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::InvalidArgument(_))));

        let options = FilesystemOptions {
            dir_level: 16,
            ..Default::default()
        };
        options.validate().unwrap();
    }

    #[test]
    fn test_executable_file_permission_rejected() {
        let options = FilesystemOptions {
            file_permission: 0o770,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
