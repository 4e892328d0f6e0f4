//! Static capabilities and filesystem capacity

use fscache_common::types::MAX_FILE_NAME;
use fscache_common::{Error, FilesystemOptions, Result};
use serde::Serialize;
use std::path::Path;

/// What the adapter supports, derived from its options
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Value types stored natively
    pub supported_datatypes: Vec<&'static str>,
    /// Metadata fields `get_metadata` can report
    pub supported_metadata: Vec<&'static str>,
    /// Largest accepted ttl in seconds (0 = unlimited)
    pub max_ttl: u64,
    /// Ttl is applied at read time, not fixed at write time
    pub static_ttl: bool,
    /// Ttl resolution in seconds
    pub ttl_precision: u64,
    pub use_request_time: bool,
    /// Expired entries stay readable through scans
    pub expired_read: bool,
    pub max_key_length: usize,
    pub namespace_is_prefix: bool,
    pub namespace_separator: String,
    pub tagging: bool,
    pub iterable: bool,
    pub clear_all_namespaces: bool,
    pub clear_by_namespace: bool,
}

impl Capabilities {
    #[must_use]
    pub fn from_options(options: &FilesystemOptions) -> Self {
        let mut metadata = vec!["mtime", "filespec", "size", "tags"];
        if !options.no_ctime {
            metadata.push("ctime");
        }
        if !options.no_atime {
            metadata.push("atime");
        }

        Self {
            supported_datatypes: vec!["bytes"],
            supported_metadata: metadata,
            max_ttl: 0,
            static_ttl: false,
            ttl_precision: 1,
            use_request_time: false,
            expired_read: true,
            max_key_length: MAX_FILE_NAME,
            namespace_is_prefix: true,
            namespace_separator: options.namespace_separator.clone(),
            tagging: true,
            iterable: true,
            clear_all_namespaces: true,
            clear_by_namespace: true,
        }
    }
}

/// Size of the filesystem holding the cache directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub total_bytes: u64,
    /// Space available to unprivileged writers
    pub free_bytes: u64,
}

impl Capacity {
    /// Query the filesystem holding `path`
    pub fn of(path: &Path) -> Result<Self> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|e| {
            Error::runtime(format!("failed to query capacity of {}: {e}", path.display()))
        })?;

        let fragment = u64::from(stat.fragment_size());
        Ok(Self {
            total_bytes: u64::from(stat.blocks()).saturating_mul(fragment),
            free_bytes: u64::from(stat.blocks_available()).saturating_mul(fragment),
        })
    }
}
