//! On-disk layout definitions
//!
//! Cache Layout (dir_level = 2, namespace `app`, separator `-`):
//! ```text
//! <cache_dir>/
//!   app-ac/                 shard level 1: md5(key)[0..2]
//!     app-bd/               shard level 2: md5(key)[2..4]
//!       app-foo.dat         raw value bytes, no header
//!       app-foo.ifo         side-car metadata (tags, integrity digest)
//! ```
//!
//! Each shard level holds at most 256 children per namespace. The mapping
//! is pure: changing `dir_level` or the separator orphans existing entries.

use fscache_common::checksum::md5_hex;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix of the value file
pub const DATA_SUFFIX: &str = ".dat";

/// Suffix of the side-car metadata file
pub const INFO_SUFFIX: &str = ".ifo";

/// Resolved location of an entry, without suffix
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileSpec(PathBuf);

impl FileSpec {
    /// Wrap a suffix-less path
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self(path)
    }

    /// Recover the file spec from a value file path
    #[must_use]
    pub fn from_data_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(DATA_SUFFIX)?;
        Some(Self(path.with_file_name(stem)))
    }

    /// Path of the value file
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.with_suffix(DATA_SUFFIX)
    }

    /// Path of the side-car metadata file
    #[must_use]
    pub fn info_path(&self) -> PathBuf {
        self.with_suffix(INFO_SUFFIX)
    }

    /// Directory holding the entry
    #[must_use]
    pub fn parent(&self) -> Option<&Path> {
        self.0.parent()
    }

    /// The suffix-less path
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut os: OsString = self.0.clone().into_os_string();
        os.push(suffix);
        PathBuf::from(os)
    }
}

impl fmt::Debug for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSpec({})", self.0.display())
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps `(namespace, key)` to a file spec under the cache directory
#[derive(Clone, Debug)]
pub struct PathMapper {
    cache_dir: PathBuf,
    separator: String,
    dir_level: u8,
}

impl PathMapper {
    /// Create a mapper for a validated cache directory
    pub fn new(cache_dir: impl Into<PathBuf>, separator: impl Into<String>, dir_level: u8) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            separator: separator.into(),
            dir_level,
        }
    }

    /// Root of the cache tree
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Shard depth
    #[must_use]
    pub const fn dir_level(&self) -> u8 {
        self.dir_level
    }

    /// File name prefix shared by every entry and shard of a namespace
    ///
    /// The empty namespace has no prefix at all.
    #[must_use]
    pub fn prefix(&self, namespace: &str) -> String {
        if namespace.is_empty() {
            String::new()
        } else {
            format!("{namespace}{}", self.separator)
        }
    }

    /// Resolve the file spec of a key
    #[must_use]
    pub fn resolve(&self, namespace: &str, key: &str) -> FileSpec {
        let prefix = self.prefix(namespace);
        let mut path = self.cache_dir.clone();

        if self.dir_level > 0 {
            let hash = md5_hex(key.as_bytes());
            for level in 0..usize::from(self.dir_level) {
                let pair = &hash[level * 2..level * 2 + 2];
                path.push(format!("{prefix}{pair}"));
            }
        }

        path.push(format!("{prefix}{key}"));
        FileSpec::new(path)
    }

    /// Glob-style description of the files a prefix covers (for logging)
    #[must_use]
    pub fn pattern(&self, prefix: &str) -> String {
        let mut pattern = self.cache_dir.display().to_string();
        for _ in 0..self.dir_level {
            pattern.push(std::path::MAIN_SEPARATOR);
            pattern.push_str(prefix);
            pattern.push('*');
        }
        pattern.push(std::path::MAIN_SEPARATOR);
        pattern.push_str(prefix);
        pattern.push('*');
        pattern.push_str(DATA_SUFFIX);
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_one_level() {
        let mapper = PathMapper::new("/tmp/c", "-", 1);
        let spec = mapper.resolve("app", "foo");

        // md5("foo") = acbd18db...
        assert_eq!(spec.as_path(), Path::new("/tmp/c/app-ac/app-foo"));
        assert_eq!(spec.data_path(), Path::new("/tmp/c/app-ac/app-foo.dat"));
        assert_eq!(spec.info_path(), Path::new("/tmp/c/app-ac/app-foo.ifo"));
    }

    #[test]
    fn test_resolve_without_sharding() {
        let mapper = PathMapper::new("/tmp/c", "-", 0);
        let spec = mapper.resolve("app", "foo");
        assert_eq!(spec.as_path(), Path::new("/tmp/c/app-foo"));
    }

    #[test]
    fn test_resolve_is_deterministic_and_depth_matches_level() {
        for level in 0..=16u8 {
            let mapper = PathMapper::new("/tmp/c", "::", level);
            let first = mapper.resolve("ns", "some_key");
            let second = mapper.resolve("ns", "some_key");
            assert_eq!(first, second);

            let depth = first
                .as_path()
                .strip_prefix("/tmp/c")
                .unwrap()
                .components()
                .count()
                - 1;
            assert_eq!(depth, usize::from(level));
        }
    }

    #[test]
    fn test_shard_directories_are_prefixed() {
        let mapper = PathMapper::new("/tmp/c", "-", 3);
        let spec = mapper.resolve("app", "foo");
        let rel = spec.as_path().strip_prefix("/tmp/c").unwrap();
        let parts: Vec<_> = rel.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(parts, vec!["app-ac", "app-bd", "app-18", "app-foo"]);
    }

    #[test]
    fn test_empty_namespace_has_no_prefix() {
        let mapper = PathMapper::new("/tmp/c", "-", 1);
        assert_eq!(mapper.prefix(""), "");
        assert_eq!(
            mapper.resolve("", "foo").as_path(),
            Path::new("/tmp/c/ac/foo")
        );
    }

    #[test]
    fn test_from_data_path() {
        let spec = FileSpec::from_data_path(Path::new("/tmp/c/app-ac/app-foo.dat")).unwrap();
        assert_eq!(spec.as_path(), Path::new("/tmp/c/app-ac/app-foo"));
        assert!(FileSpec::from_data_path(Path::new("/tmp/c/app-foo.ifo")).is_none());
    }

    #[test]
    fn test_pattern() {
        let mapper = PathMapper::new("/tmp/c", "-", 2);
        assert_eq!(mapper.pattern("app-"), "/tmp/c/app-*/app-*/app-*.dat");
    }
}
