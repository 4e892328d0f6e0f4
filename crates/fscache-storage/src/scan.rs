//! Directory walking, entry filtering and the scan cursor
//!
//! The walker enumerates `<cache_dir>/(<prefix>*/){dir_level}<prefix>*.dat`
//! lazily, holding one open directory handle per shard level. The filter
//! applies the matching mode (expiry and tag bits) and is shared with the
//! bulk eraser.

use crate::codec::{self, EntryInfo};
use crate::file_io;
use crate::layout::{DATA_SUFFIX, FileSpec};
use crate::memo::{KeyInfo, StatFields};
use bytes::Bytes;
use fscache_common::{Error, MatchMode, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Pull-based enumeration of value files under a namespace prefix
#[derive(Debug)]
pub struct GlobWalker {
    prefix: String,
    dir_level: u8,
    stack: Vec<ReadDir>,
}

impl GlobWalker {
    /// Start walking `cache_dir`
    pub fn open(cache_dir: &Path, prefix: &str, dir_level: u8) -> Result<Self> {
        let root = fs::read_dir(cache_dir).map_err(|e| {
            Error::runtime(format!("failed to read directory {}: {e}", cache_dir.display()))
        })?;
        Ok(Self {
            prefix: prefix.to_string(),
            dir_level,
            stack: vec![root],
        })
    }

    /// Release every open directory handle
    pub fn close(&mut self) {
        self.stack.clear();
    }
}

impl Iterator for GlobWalker {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            let next = self.stack.last_mut()?.next();

            let entry = match next {
                None => {
                    self.stack.pop();
                    continue;
                }
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(self.prefix.as_str()) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else { continue };

            if depth < usize::from(self.dir_level) {
                if file_type.is_dir() {
                    match fs::read_dir(entry.path()) {
                        Ok(dir) => self.stack.push(dir),
                        Err(e) => warn!("Skipping shard {}: {}", entry.path().display(), e),
                    }
                }
            } else if file_type.is_file() && name.ends_with(DATA_SUFFIX) {
                return Some(entry.path());
            }
        }
    }
}

/// Decides whether an on-disk entry matches a mode, ttl and tag list
#[derive(Clone, Debug)]
pub struct EntryFilter {
    mode: MatchMode,
    ttl: u64,
    tags: Vec<String>,
    now: SystemTime,
    fields: StatFields,
    locking: bool,
}

/// An entry that passed the filter
#[derive(Debug)]
pub struct Candidate {
    pub info: KeyInfo,
    /// Side-car metadata, when the filter had to read it
    pub side_car: Option<EntryInfo>,
}

impl EntryFilter {
    /// Build a filter; a tag mode without tags is rejected
    pub fn new(mode: MatchMode, ttl: u64, tags: Vec<String>, now: SystemTime) -> Result<Self> {
        if mode.has_tag_filter() && tags.is_empty() {
            return Err(Error::invalid_argument(format!(
                "matching mode '{mode}' requires at least one tag"
            )));
        }
        Ok(Self {
            mode,
            ttl,
            tags,
            now,
            fields: StatFields::default(),
            locking: true,
        })
    }

    /// Collect optional stat times for candidates
    #[must_use]
    pub const fn with_fields(mut self, fields: StatFields) -> Self {
        self.fields = fields;
        self
    }

    /// Lock side-car files while reading them
    #[must_use]
    pub const fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Check one value file; `None` if it vanished or does not match
    pub fn check(&self, data_path: &Path) -> Result<Option<Candidate>> {
        let Some(filespec) = FileSpec::from_data_path(data_path) else {
            return Ok(None);
        };
        let Some(info) = KeyInfo::stat(filespec, self.fields.ctime, self.fields.atime)? else {
            return Ok(None);
        };

        if !self.mode.contains(MatchMode::ALL) {
            let expired = info.is_expired(self.ttl, self.now);
            let wanted = if self.mode.contains(MatchMode::EXPIRED) {
                expired
            } else {
                !expired
            };
            if !wanted {
                return Ok(None);
            }
        }

        if !self.mode.has_tag_filter() {
            return Ok(Some(Candidate {
                info,
                side_car: None,
            }));
        }

        let side_car = read_side_car(&info.filespec, self.locking)?;

        if self.mode.contains(MatchMode::TAGS_AND) && !side_car.has_all_tags(&self.tags) {
            return Ok(None);
        }
        if self.mode.contains(MatchMode::TAGS_OR) && !side_car.has_any_tag(&self.tags) {
            return Ok(None);
        }
        if self.mode.contains(MatchMode::TAGS_NEGATE) && side_car.has_any_tag(&self.tags) {
            return Ok(None);
        }

        Ok(Some(Candidate {
            info,
            side_car: Some(side_car),
        }))
    }
}

/// Side-car of an entry; missing or corrupted side-cars read as untagged
fn read_side_car(filespec: &FileSpec, locking: bool) -> Result<EntryInfo> {
    let info_path = filespec.info_path();
    match codec::read_info(&info_path, locking) {
        Ok(side_car) => Ok(side_car.unwrap_or_default()),
        Err(e) if e.is_integrity_failure() => {
            warn!("Treating {} as untagged: {}", info_path.display(), e);
            Ok(EntryInfo::default())
        }
        Err(e) => Err(e),
    }
}

/// Field a scan projects into each item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanField {
    Key,
    Value,
    Mtime,
    Ctime,
    Atime,
    Filespec,
    Tags,
}

/// One entry produced by a scan; unselected fields are `None`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanItem {
    pub key: String,
    pub value: Option<Bytes>,
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
    pub atime: Option<u64>,
    pub filespec: Option<PathBuf>,
    pub tags: Option<Vec<String>>,
}

/// An open scan over one namespace
#[derive(Debug)]
pub struct ScanCursor {
    walker: GlobWalker,
    filter: EntryFilter,
    prefix: String,
    select: Vec<ScanField>,
    locking: bool,
}

impl ScanCursor {
    pub fn new(
        walker: GlobWalker,
        filter: EntryFilter,
        prefix: String,
        select: Vec<ScanField>,
        locking: bool,
    ) -> Self {
        Self {
            walker,
            filter,
            prefix,
            select,
            locking,
        }
    }

    fn selects(&self, field: ScanField) -> bool {
        self.select.contains(&field)
    }

    /// Next matching entry; `None` once exhausted
    pub fn next_item(&mut self) -> Result<Option<ScanItem>> {
        while let Some(path) = self.walker.next() {
            let Some(candidate) = self.filter.check(&path)? else {
                continue;
            };
            if let Some(item) = self.project(candidate)? {
                return Ok(Some(item));
            }
        }
        debug!("Scan of prefix '{}' exhausted", self.prefix);
        Ok(None)
    }

    /// Release the directory handles
    pub fn close(&mut self) {
        self.walker.close();
    }

    fn project(&self, candidate: Candidate) -> Result<Option<ScanItem>> {
        let Candidate { info, side_car } = candidate;
        let key = info
            .filespec
            .as_path()
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(self.prefix.as_str()))
            .unwrap_or_default()
            .to_string();

        let mut item = ScanItem {
            key,
            ..ScanItem::default()
        };

        if self.selects(ScanField::Value) {
            match file_io::read_file(&info.filespec.data_path(), self.locking)? {
                Some(data) => item.value = Some(Bytes::from(data)),
                // Removed since the walker saw it
                None => return Ok(None),
            }
        }
        if self.selects(ScanField::Mtime) {
            item.mtime = Some(info.mtime_secs());
        }
        if self.selects(ScanField::Ctime) {
            item.ctime = info.ctime.map(crate::clock::unix_secs);
        }
        if self.selects(ScanField::Atime) {
            item.atime = info.atime.map(crate::clock::unix_secs);
        }
        if self.selects(ScanField::Filespec) {
            item.filespec = Some(info.filespec.as_path().to_path_buf());
        }
        if self.selects(ScanField::Tags) {
            let side_car = match side_car {
                Some(side_car) => side_car,
                None => read_side_car(&info.filespec, self.locking)?,
            };
            item.tags = Some(side_car.tags);
        }

        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_io::WriteLock;
    use crate::layout::PathMapper;
    use std::collections::BTreeSet;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn put(mapper: &PathMapper, ns: &str, key: &str, tags: &[&str]) -> FileSpec {
        let spec = mapper.resolve(ns, key);
        if let Some(parent) = spec.parent() {
            file_io::create_dirs(parent, 0o770).unwrap();
        }
        file_io::write_file(&spec.data_path(), key.as_bytes(), WriteLock::None, 0o660).unwrap();
        if !tags.is_empty() {
            let tags: Vec<String> = tags.iter().map(ToString::to_string).collect();
            let info = EntryInfo::new(&tags, None);
            file_io::write_file(&spec.info_path(), &info.encode().unwrap(), WriteLock::None, 0o660)
                .unwrap();
        }
        spec
    }

    fn keys(cursor: &mut ScanCursor) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        while let Some(item) = cursor.next_item().unwrap() {
            found.insert(item.key);
        }
        found
    }

    fn cursor(mapper: &PathMapper, ns: &str, filter: EntryFilter) -> ScanCursor {
        let prefix = mapper.prefix(ns);
        let walker = GlobWalker::open(mapper.cache_dir(), &prefix, mapper.dir_level()).unwrap();
        ScanCursor::new(walker, filter, prefix, vec![ScanField::Key, ScanField::Value], true)
    }

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_walker_respects_prefix_and_level() {
        for level in [0u8, 1, 2] {
            let dir = tempdir().unwrap();
            let mapper = PathMapper::new(dir.path(), "-", level);
            put(&mapper, "app", "a", &["t"]);
            put(&mapper, "app", "b", &[]);
            put(&mapper, "other", "c", &[]);

            let walker = GlobWalker::open(dir.path(), "app-", level).unwrap();
            let found: BTreeSet<_> = walker
                .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
                .collect();
            assert_eq!(found, set(&["app-a.dat", "app-b.dat"]));
        }
    }

    #[test]
    fn test_filter_expiry_modes() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 1);
        let old = put(&mapper, "app", "old", &[]);
        put(&mapper, "app", "new", &[]);

        let now = SystemTime::now();
        file_io::touch(&old.data_path(), now - Duration::from_secs(100)).unwrap();

        let filter = |mode| EntryFilter::new(mode, 50, Vec::new(), now).unwrap();
        assert_eq!(keys(&mut cursor(&mapper, "app", filter(MatchMode::ACTIVE))), set(&["new"]));
        assert_eq!(keys(&mut cursor(&mapper, "app", filter(MatchMode::EXPIRED))), set(&["old"]));
        assert_eq!(keys(&mut cursor(&mapper, "app", filter(MatchMode::ALL))), set(&["new", "old"]));
    }

    #[test]
    fn test_filter_ttl_zero_never_expires() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 0);
        let spec = put(&mapper, "app", "ancient", &[]);
        file_io::touch(&spec.data_path(), UNIX_EPOCH + Duration::from_secs(1)).unwrap();

        let now = SystemTime::now();
        let active = EntryFilter::new(MatchMode::ACTIVE, 0, Vec::new(), now).unwrap();
        let expired = EntryFilter::new(MatchMode::EXPIRED, 0, Vec::new(), now).unwrap();
        assert_eq!(keys(&mut cursor(&mapper, "app", active)), set(&["ancient"]));
        assert!(keys(&mut cursor(&mapper, "app", expired)).is_empty());
    }

    #[test]
    fn test_tag_modes() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 1);
        put(&mapper, "app", "ab", &["a", "b"]);
        put(&mapper, "app", "a", &["a"]);
        put(&mapper, "app", "c", &["c"]);
        put(&mapper, "app", "none", &[]);

        let now = SystemTime::now();
        let tags = |list: &[&str]| list.iter().map(ToString::to_string).collect::<Vec<_>>();
        let run = |mode, requested: &[&str]| {
            let filter = EntryFilter::new(MatchMode::ALL | mode, 0, tags(requested), now).unwrap();
            keys(&mut cursor(&mapper, "app", filter))
        };

        assert_eq!(run(MatchMode::TAGS_AND, &["a", "b"]), set(&["ab"]));
        assert_eq!(run(MatchMode::TAGS_OR, &["b", "c"]), set(&["ab", "c"]));
        assert_eq!(run(MatchMode::TAGS_NEGATE, &["a"]), set(&["c", "none"]));
        assert_eq!(
            run(MatchMode::TAGS_OR | MatchMode::TAGS_NEGATE, &["a"]),
            BTreeSet::new()
        );
    }

    #[test]
    fn test_tag_filter_is_idempotent() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 2);
        for i in 0..20 {
            let tag = if i % 3 == 0 { "x" } else { "y" };
            put(&mapper, "app", &format!("k{i}"), &[tag]);
        }

        let filter = || {
            EntryFilter::new(MatchMode::ACTIVE | MatchMode::TAGS_OR, 0, vec!["x".into()], SystemTime::now())
                .unwrap()
        };
        let first = keys(&mut cursor(&mapper, "app", filter()));
        let second = keys(&mut cursor(&mapper, "app", filter()));
        assert_eq!(first.len(), 7);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tag_mode_requires_tags() {
        let err = EntryFilter::new(MatchMode::TAGS_AND, 0, Vec::new(), SystemTime::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_projection() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 1);
        let spec = put(&mapper, "app", "foo", &["t1"]);

        let prefix = mapper.prefix("app");
        let walker = GlobWalker::open(dir.path(), &prefix, 1).unwrap();
        let filter = EntryFilter::new(MatchMode::ACTIVE, 0, Vec::new(), SystemTime::now()).unwrap();
        let mut cursor = ScanCursor::new(
            walker,
            filter,
            prefix,
            vec![ScanField::Key, ScanField::Mtime, ScanField::Filespec, ScanField::Tags],
            false,
        );

        let item = cursor.next_item().unwrap().unwrap();
        assert_eq!(item.key, "foo");
        assert!(item.value.is_none());
        assert!(item.mtime.is_some());
        assert_eq!(item.filespec.as_deref(), Some(spec.as_path()));
        assert_eq!(item.tags, Some(vec!["t1".to_string()]));
        assert!(cursor.next_item().unwrap().is_none());
    }

    #[test]
    fn test_tag_projection_reports_unreadable_side_car() {
        let dir = tempdir().unwrap();
        let mapper = PathMapper::new(dir.path(), "-", 0);
        let garbled = put(&mapper, "app", "garbled", &[]);
        fs::write(garbled.info_path(), b"not a side-car").unwrap();

        let tags_of = |ns: &str| {
            let prefix = mapper.prefix(ns);
            let walker = GlobWalker::open(dir.path(), &prefix, 0).unwrap();
            let filter = EntryFilter::new(MatchMode::ALL, 0, Vec::new(), SystemTime::now()).unwrap();
            let mut cursor =
                ScanCursor::new(walker, filter, prefix, vec![ScanField::Key, ScanField::Tags], false);
            cursor.next_item()
        };

        // A corrupted side-car reads as untagged
        let item = tags_of("app").unwrap().unwrap();
        assert_eq!(item.tags, Some(Vec::new()));

        // Any other failure reaches the caller
        let broken = put(&mapper, "other", "broken", &[]);
        fs::create_dir(broken.info_path()).unwrap();
        assert!(matches!(tags_of("other"), Err(Error::Runtime(_))));
    }
}
