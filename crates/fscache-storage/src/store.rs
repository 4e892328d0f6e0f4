//! Filesystem cache adapter
//!
//! Stores each entry as a value file plus an optional side-car metadata file
//! under a sharded directory tree. All state lives on disk; the adapter
//! only keeps a single-slot stat memo and the active scan cursor.

use crate::capabilities::{Capabilities, Capacity};
use crate::clock::{Clock, SystemClock};
use crate::codec::{self, EntryInfo};
use crate::entry::{CasToken, EntryMetadata};
use crate::eraser;
use crate::file_io::{self, WriteLock};
use crate::hooks::{self, Event, Interceptor, Operation, OutcomeValue};
use crate::layout::{FileSpec, PathMapper};
use crate::memo::{KeyInfo, KeyMemo, StatFields};
use crate::scan::{EntryFilter, GlobWalker, ScanCursor, ScanField, ScanItem};
use bytes::Bytes;
use fscache_common::checksum::digest_hex;
use fscache_common::{Error, FilesystemOptions, MatchMode, NameValidator, Result};
use nix::unistd::{AccessFlags, access};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-call overrides of the adapter options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemOptions {
    pub namespace: Option<String>,
    pub ttl: Option<u64>,
    /// Tags attached by write operations
    pub tags: Vec<String>,
    pub ignore_missing_items: Option<bool>,
}

impl ItemOptions {
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn ignore_missing_items(mut self, ignore: bool) -> Self {
        self.ignore_missing_items = Some(ignore);
        self
    }
}

/// Options for scans and bulk clears
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindOptions {
    pub namespace: Option<String>,
    pub ttl: Option<u64>,
    /// Tags the matching mode's tag bits compare against
    pub tags: Vec<String>,
    /// Fields projected into scan items (ignored by clears)
    pub select: Vec<ScanField>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            ttl: None,
            tags: Vec::new(),
            select: vec![ScanField::Key, ScanField::Value],
        }
    }
}

impl FindOptions {
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn select(mut self, fields: impl Into<Vec<ScanField>>) -> Self {
        self.select = fields.into();
        self
    }
}

fn key_strs<K: AsRef<str>>(keys: &[K]) -> impl Iterator<Item = &str> + Clone {
    keys.iter().map(AsRef::<str>::as_ref)
}

/// Call settings after applying overrides
#[derive(Debug)]
struct CallContext {
    namespace: String,
    prefix_len: usize,
    ttl: u64,
    tags: Vec<String>,
    ignore_missing: bool,
}

#[derive(Debug)]
enum ScanState {
    Idle,
    Active {
        namespace: String,
        cursor: Box<ScanCursor>,
    },
}

/// Key/value cache on a plain directory tree
pub struct FilesystemCache {
    options: FilesystemOptions,
    mapper: PathMapper,
    validator: NameValidator,
    memo: KeyMemo,
    scan: Mutex<ScanState>,
    clock: Arc<dyn Clock>,
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl fmt::Debug for FilesystemCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemCache")
            .field("cache_dir", &self.mapper.cache_dir())
            .field("namespace", &self.options.namespace)
            .field("dir_level", &self.mapper.dir_level())
            .finish_non_exhaustive()
    }
}

impl FilesystemCache {
    /// Open a cache with the system clock
    pub fn new(options: FilesystemOptions) -> Result<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Open a cache with a custom clock
    ///
    /// The cache directory must exist and be readable and writable; it
    /// defaults to the system temp directory.
    pub fn with_clock(mut options: FilesystemOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        options.validate()?;
        let validator = NameValidator::new(
            &options.key_pattern,
            &options.namespace_pattern,
            &options.namespace_separator,
        )?;
        validator.check_namespace(&options.namespace)?;

        let cache_dir = options.cache_dir.clone().unwrap_or_else(std::env::temp_dir);
        if !cache_dir.is_dir() {
            return Err(Error::invalid_argument(format!(
                "cache directory '{}' not found or not a directory",
                cache_dir.display()
            )));
        }
        access(&cache_dir, AccessFlags::R_OK | AccessFlags::W_OK).map_err(|e| {
            Error::invalid_argument(format!(
                "cache directory '{}' is not readable and writable: {e}",
                cache_dir.display()
            ))
        })?;
        let cache_dir = cache_dir.canonicalize().map_err(|e| {
            Error::runtime(format!("failed to resolve {}: {e}", cache_dir.display()))
        })?;

        options.cache_dir = Some(cache_dir.clone());
        let mapper = PathMapper::new(
            cache_dir,
            options.namespace_separator.clone(),
            options.dir_level,
        );

        info!(
            "Opened filesystem cache at {} (dir_level={}, namespace='{}')",
            mapper.cache_dir().display(),
            options.dir_level,
            options.namespace
        );

        Ok(Self {
            options,
            mapper,
            validator,
            memo: KeyMemo::new(),
            scan: Mutex::new(ScanState::Idle),
            clock,
            interceptors: RwLock::new(Vec::new()),
        })
    }

    /// Append an interceptor; interceptors run in registration order
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Effective options (with the resolved cache directory)
    #[must_use]
    pub const fn options(&self) -> &FilesystemOptions {
        &self.options
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_options(&self.options)
    }

    /// Total and free bytes of the filesystem holding the cache
    pub fn capacity(&self) -> Result<Capacity> {
        Capacity::of(self.mapper.cache_dir())
    }

    // ---- reading ----

    /// Value of a key; `None` for a miss when missing items are ignored
    pub fn get_item(&self, key: &str, opts: &ItemOptions) -> Result<Option<Bytes>> {
        if !self.options.readable {
            return Ok(None);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::GetItem, &call.namespace, [key]);
        self.run(&event, || {
            Ok(self.read_item(&call, key)?.map(|(value, _)| value))
        })
    }

    /// Value of a key together with its CAS token
    pub fn get_with_token(
        &self,
        key: &str,
        opts: &ItemOptions,
    ) -> Result<Option<(Bytes, CasToken)>> {
        if !self.options.readable {
            return Ok(None);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::GetWithToken, &call.namespace, [key]);
        self.run(&event, || {
            Ok(self
                .read_item(&call, key)?
                .map(|(value, info)| (value, CasToken::from_info(&info))))
        })
    }

    /// Values of several keys; missing keys are left out
    pub fn get_items<K: AsRef<str>>(
        &self,
        keys: &[K],
        opts: &ItemOptions,
    ) -> Result<BTreeMap<String, Bytes>> {
        if !self.options.readable {
            return Ok(BTreeMap::new());
        }
        let mut call = self.context(opts)?;
        self.check_keys(&call, keys)?;
        call.ignore_missing = true;

        let event = Event::new(Operation::GetItems, &call.namespace, key_strs(keys));
        self.run(&event, || {
            let mut values = BTreeMap::new();
            for key in key_strs(keys) {
                if let Some((value, _)) = self.read_item(&call, key)? {
                    values.insert(key.to_string(), value);
                }
            }
            Ok(values)
        })
    }

    /// Whether a key exists and has not expired
    pub fn has_item(&self, key: &str, opts: &ItemOptions) -> Result<bool> {
        if !self.options.readable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::HasItem, &call.namespace, [key]);
        self.run(&event, || Ok(self.live(&call, key)?.is_some()))
    }

    /// The subset of `keys` that exist and have not expired
    pub fn has_items<K: AsRef<str>>(&self, keys: &[K], opts: &ItemOptions) -> Result<Vec<String>> {
        if !self.options.readable {
            return Ok(Vec::new());
        }
        let call = self.context(opts)?;
        self.check_keys(&call, keys)?;

        let event = Event::new(Operation::HasItems, &call.namespace, key_strs(keys));
        self.run(&event, || {
            let mut found = Vec::new();
            for key in key_strs(keys) {
                if self.live(&call, key)?.is_some() {
                    found.push(key.to_string());
                }
            }
            Ok(found)
        })
    }

    /// Stat info and side-car metadata of a key
    pub fn get_metadata(&self, key: &str, opts: &ItemOptions) -> Result<Option<EntryMetadata>> {
        if !self.options.readable {
            return Ok(None);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::GetMetadata, &call.namespace, [key]);
        self.run(&event, || self.read_metadata(&call, key))
    }

    /// Metadata of several keys; missing keys are left out
    pub fn get_metadatas<K: AsRef<str>>(
        &self,
        keys: &[K],
        opts: &ItemOptions,
    ) -> Result<BTreeMap<String, EntryMetadata>> {
        if !self.options.readable {
            return Ok(BTreeMap::new());
        }
        let mut call = self.context(opts)?;
        self.check_keys(&call, keys)?;
        call.ignore_missing = true;

        let event = Event::new(Operation::GetMetadatas, &call.namespace, key_strs(keys));
        self.run(&event, || {
            let mut found = BTreeMap::new();
            for key in key_strs(keys) {
                if let Some(meta) = self.read_metadata(&call, key)? {
                    found.insert(key.to_string(), meta);
                }
            }
            Ok(found)
        })
    }

    // ---- writing ----

    /// Store a value; `false` if the write was skipped or metadata failed
    pub fn set_item(&self, key: &str, value: &[u8], opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::SetItem, &call.namespace, [key]);
        self.run(&event, || self.write_item(&call, key, value))
    }

    /// Store several values; returns the keys that were not stored
    pub fn set_items<K, V>(&self, items: &[(K, V)], opts: &ItemOptions) -> Result<Vec<String>>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.write_batch(Operation::SetItems, items, opts, |call, key, value| {
            self.write_item(call, key, value)
        })
    }

    /// Store a value only if the key does not exist
    pub fn add_item(&self, key: &str, value: &[u8], opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::AddItem, &call.namespace, [key]);
        self.run(&event, || {
            if self.live(&call, key)?.is_some() {
                return Err(Error::already_exists(&call.namespace, key));
            }
            self.write_item(&call, key, value)
        })
    }

    /// Add several values; existing keys are reported as not stored
    pub fn add_items<K, V>(&self, items: &[(K, V)], opts: &ItemOptions) -> Result<Vec<String>>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.write_batch(Operation::AddItems, items, opts, |call, key, value| {
            Ok(self.live(call, key)?.is_none() && self.write_item(call, key, value)?)
        })
    }

    /// Store a value only if the key exists
    pub fn replace_item(&self, key: &str, value: &[u8], opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::ReplaceItem, &call.namespace, [key]);
        self.run(&event, || {
            if self.live(&call, key)?.is_none() {
                return self.missing_flag(&call, key);
            }
            self.write_item(&call, key, value)
        })
    }

    /// Replace several values; missing keys are reported as not stored
    pub fn replace_items<K, V>(&self, items: &[(K, V)], opts: &ItemOptions) -> Result<Vec<String>>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.write_batch(Operation::ReplaceItems, items, opts, |call, key, value| {
            Ok(self.live(call, key)?.is_some() && self.write_item(call, key, value)?)
        })
    }

    /// Store a value only if the entry still matches `token`
    pub fn check_and_set_item(
        &self,
        token: &CasToken,
        key: &str,
        value: &[u8],
        opts: &ItemOptions,
    ) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::CheckAndSetItem, &call.namespace, [key]);
        self.run(&event, || {
            // Compare against the file as it is now, not a memoized stat
            self.memo.clear();
            let Some(info) = self.live(&call, key)? else {
                return self.missing_flag(&call, key);
            };
            let current = CasToken::from_info(&info);
            if current != *token {
                debug!("CAS token mismatch for '{}': {} != {}", key, token, current);
                return Ok(false);
            }
            self.write_item(&call, key, value)
        })
    }

    /// Reset an entry's mtime to now
    pub fn touch_item(&self, key: &str, opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::TouchItem, &call.namespace, [key]);
        self.run(&event, || self.touch(&call, key))
    }

    /// Touch several entries; returns the keys that were not touched
    pub fn touch_items<K: AsRef<str>>(&self, keys: &[K], opts: &ItemOptions) -> Result<Vec<String>> {
        self.key_batch(Operation::TouchItems, keys, opts, |call, key| self.touch(call, key))
    }

    /// Delete an entry
    pub fn remove_item(&self, key: &str, opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;
        self.check_key(&call, key)?;

        let event = Event::new(Operation::RemoveItem, &call.namespace, [key]);
        self.run(&event, || self.remove(&call, key))
    }

    /// Delete several entries; returns the keys that were not removed
    pub fn remove_items<K: AsRef<str>>(&self, keys: &[K], opts: &ItemOptions) -> Result<Vec<String>> {
        self.key_batch(Operation::RemoveItems, keys, opts, |call, key| self.remove(call, key))
    }

    // ---- iteration ----

    /// Open a scan over a namespace; the mode defaults to active entries
    pub fn find(&self, mode: MatchMode, opts: &FindOptions) -> Result<bool> {
        if !self.options.readable {
            return Ok(false);
        }
        let namespace = self.find_namespace(opts)?;

        let event = Event::new(Operation::Find, &namespace, std::iter::empty::<String>());
        self.run(&event, || {
            let mut scan = self.scan.lock();
            if matches!(*scan, ScanState::Active { .. }) {
                return Err(Error::AlreadyActive);
            }

            let filter = self.filter(mode.normalize(MatchMode::ACTIVE), opts)?;
            let prefix = self.mapper.prefix(&namespace);
            let walker = GlobWalker::open(self.mapper.cache_dir(), &prefix, self.mapper.dir_level())?;
            debug!("Scanning {} with mode {}", self.mapper.pattern(&prefix), filter.mode());

            let cursor = ScanCursor::new(
                walker,
                filter,
                prefix,
                opts.select.clone(),
                self.options.file_locking,
            );
            *scan = ScanState::Active {
                namespace: namespace.clone(),
                cursor: Box::new(cursor),
            };
            Ok(true)
        })
    }

    /// Next item of the active scan; `None` when exhausted or idle
    pub fn fetch(&self) -> Result<Option<ScanItem>> {
        let namespace = match &*self.scan.lock() {
            ScanState::Active { namespace, .. } => namespace.clone(),
            ScanState::Idle => return Ok(None),
        };

        let event = Event::new(Operation::Fetch, &namespace, std::iter::empty::<String>());
        self.run(&event, || {
            let mut scan = self.scan.lock();
            let ScanState::Active { cursor, .. } = &mut *scan else {
                return Ok(None);
            };
            let item = cursor.next_item()?;
            if item.is_none() {
                cursor.close();
                *scan = ScanState::Idle;
            }
            Ok(item)
        })
    }

    /// Drain the active scan
    pub fn fetch_all(&self) -> Result<Vec<ScanItem>> {
        let mut items = Vec::new();
        while let Some(item) = self.fetch()? {
            items.push(item);
        }
        Ok(items)
    }

    /// Abandon the active scan; `false` if none was open
    pub fn close_scan(&self) -> bool {
        let mut scan = self.scan.lock();
        match std::mem::replace(&mut *scan, ScanState::Idle) {
            ScanState::Active { mut cursor, .. } => {
                cursor.close();
                true
            }
            ScanState::Idle => false,
        }
    }

    // ---- cleaning ----

    /// Remove matching entries of every namespace; the mode defaults to expired
    pub fn clear(&self, mode: MatchMode, opts: &FindOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }

        let event = Event::new(Operation::Clear, "", std::iter::empty::<String>());
        self.run(&event, || self.clear_prefix("", mode, opts))
    }

    /// Remove matching entries of one namespace; the mode defaults to expired
    pub fn clear_by_namespace(&self, mode: MatchMode, opts: &FindOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let namespace = self.find_namespace(opts)?;
        if namespace.is_empty() {
            return Err(Error::invalid_argument("no namespace given"));
        }

        let event = Event::new(Operation::ClearByNamespace, &namespace, std::iter::empty::<String>());
        self.run(&event, || {
            self.clear_prefix(&self.mapper.prefix(&namespace), mode, opts)
        })
    }

    /// Remove empty shard directories of a namespace
    pub fn optimize(&self, opts: &ItemOptions) -> Result<bool> {
        if !self.options.writable {
            return Ok(false);
        }
        let call = self.context(opts)?;

        let event = Event::new(Operation::Optimize, &call.namespace, std::iter::empty::<String>());
        self.run(&event, || {
            let level = self.mapper.dir_level();
            if level > 0 {
                let prefix = self.mapper.prefix(&call.namespace);
                let removed = eraser::remove_empty_dirs(self.mapper.cache_dir(), &prefix, level);
                info!("Removed {} empty directories under {}", removed, self.mapper.pattern(&prefix));
            }
            Ok(true)
        })
    }

    // ---- internals ----

    fn run<T, F>(&self, event: &Event, op: F) -> Result<T>
    where
        T: OutcomeValue,
        F: FnOnce() -> Result<T>,
    {
        if self.options.clear_stat_cache {
            self.memo.clear();
        }
        let interceptors = self.interceptors.read().clone();
        hooks::intercept(&interceptors, event, op)
    }

    fn context(&self, opts: &ItemOptions) -> Result<CallContext> {
        let namespace = match &opts.namespace {
            Some(namespace) => {
                self.validator.check_namespace(namespace)?;
                namespace.clone()
            }
            None => self.options.namespace.clone(),
        };
        Ok(CallContext {
            prefix_len: self.mapper.prefix(&namespace).len(),
            namespace,
            ttl: opts.ttl.unwrap_or(self.options.ttl),
            tags: opts.tags.clone(),
            ignore_missing: opts
                .ignore_missing_items
                .unwrap_or(self.options.ignore_missing_items),
        })
    }

    fn find_namespace(&self, opts: &FindOptions) -> Result<String> {
        match &opts.namespace {
            Some(namespace) => {
                self.validator.check_namespace(namespace)?;
                Ok(namespace.clone())
            }
            None => Ok(self.options.namespace.clone()),
        }
    }

    fn check_key(&self, call: &CallContext, key: &str) -> Result<()> {
        self.validator.check_key(key, call.prefix_len)
    }

    fn check_keys<K: AsRef<str>>(&self, call: &CallContext, keys: &[K]) -> Result<()> {
        keys.iter()
            .try_for_each(|key| self.check_key(call, key.as_ref()))
    }

    const fn stat_fields(&self) -> StatFields {
        StatFields {
            ctime: !self.options.no_ctime,
            atime: !self.options.no_atime,
        }
    }

    fn filter(&self, mode: MatchMode, opts: &FindOptions) -> Result<EntryFilter> {
        Ok(EntryFilter::new(
            mode,
            opts.ttl.unwrap_or(self.options.ttl),
            opts.tags.clone(),
            self.clock.now(),
        )?
        .with_fields(self.stat_fields())
        .with_locking(self.options.file_locking))
    }

    /// Stat info of an existing entry, expired or not
    fn lookup(&self, call: &CallContext, key: &str) -> Result<Option<KeyInfo>> {
        self.memo
            .lookup(&self.mapper, &call.namespace, key, self.stat_fields())
    }

    /// Stat info of an existing, unexpired entry
    fn live(&self, call: &CallContext, key: &str) -> Result<Option<KeyInfo>> {
        let now = self.clock.now();
        Ok(self
            .lookup(call, key)?
            .filter(|info| !info.is_expired(call.ttl, now)))
    }

    fn missing<T>(&self, call: &CallContext, key: &str) -> Result<Option<T>> {
        if call.ignore_missing {
            Ok(None)
        } else {
            Err(Error::not_found(&call.namespace, key))
        }
    }

    fn missing_flag(&self, call: &CallContext, key: &str) -> Result<bool> {
        self.missing::<()>(call, key).map(|_| false)
    }

    fn read_item(&self, call: &CallContext, key: &str) -> Result<Option<(Bytes, KeyInfo)>> {
        let Some(info) = self.live(call, key)? else {
            return self.missing(call, key);
        };

        match self.read_value(&info) {
            Ok(Some(value)) => {
                debug!("Read '{}' ({} bytes) from {}", key, value.len(), info.filespec);
                Ok(Some((value, info)))
            }
            Ok(None) => {
                self.memo.clear();
                self.missing(call, key)
            }
            Err(e) => {
                self.self_heal(&info.filespec, &e);
                Err(e)
            }
        }
    }

    fn read_value(&self, info: &KeyInfo) -> Result<Option<Bytes>> {
        let locking = self.options.file_locking;
        let Some(data) = file_io::read_file(&info.filespec.data_path(), locking)? else {
            return Ok(None);
        };

        if self.options.read_control {
            let side_car = codec::read_info(&info.filespec.info_path(), locking)?;
            if let Some((algo, expected)) = side_car.as_ref().and_then(EntryInfo::integrity) {
                let actual = algo.digest(&data);
                if actual != expected {
                    return Err(Error::IntegrityMismatch {
                        expected: digest_hex(expected),
                        actual: digest_hex(&actual),
                    });
                }
            }
        }

        Ok(Some(Bytes::from(data)))
    }

    /// Drop an entry that failed to read; cleanup failures are only logged
    fn self_heal(&self, filespec: &FileSpec, cause: &Error) {
        warn!("Removing unreadable entry {}: {}", filespec, cause);
        for path in [filespec.data_path(), filespec.info_path()] {
            if let Err(e) = file_io::unlink(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        self.memo.clear();
    }

    fn read_metadata(&self, call: &CallContext, key: &str) -> Result<Option<EntryMetadata>> {
        let Some(info) = self.live(call, key)? else {
            return self.missing(call, key);
        };
        let side_car = codec::read_info(&info.filespec.info_path(), self.options.file_locking)?;
        Ok(Some(EntryMetadata::new(&info, side_car)))
    }

    fn write_item(&self, call: &CallContext, key: &str, value: &[u8]) -> Result<bool> {
        let filespec = self.mapper.resolve(&call.namespace, key);
        self.memo.clear();
        let stored = self.write_files(call, &filespec, value);
        self.memo.clear();
        stored
    }

    fn write_files(&self, call: &CallContext, filespec: &FileSpec, value: &[u8]) -> Result<bool> {
        if self.mapper.dir_level() > 0 {
            if let Some(parent) = filespec.parent() {
                file_io::create_dirs(parent, self.options.dir_permission)?;
            }
        }

        let lock = WriteLock::from_options(self.options.file_locking, self.options.file_blocking);
        let permission = self.options.file_permission;

        match file_io::write_file(&filespec.data_path(), value, lock, permission) {
            Ok(()) => {}
            Err(e) if e.is_lock_contention() => {
                debug!("Skipped write of {}: {}", filespec, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let algo = self.options.read_control_algo;
        let integrity = self
            .options
            .read_control
            .then(|| (algo, algo.digest(value)));
        let side_car = EntryInfo::new(&call.tags, integrity);

        // A stale side-car must not outlive the value it described
        let info_path = filespec.info_path();
        let updated = if side_car.is_empty() {
            file_io::unlink(&info_path).map(|_| ())
        } else {
            side_car
                .encode()
                .and_then(|bytes| file_io::write_file(&info_path, &bytes, lock, permission))
        };
        if let Err(e) = updated {
            warn!("Failed to update metadata {}: {}", info_path.display(), e);
            return Ok(false);
        }

        debug!("Stored {} ({} bytes)", filespec, value.len());
        Ok(true)
    }

    fn touch(&self, call: &CallContext, key: &str) -> Result<bool> {
        let Some(info) = self.live(call, key)? else {
            return self.missing_flag(call, key);
        };
        file_io::touch(&info.filespec.data_path(), self.clock.now())?;
        self.memo.clear();
        debug!("Touched {}", info.filespec);
        Ok(true)
    }

    fn remove(&self, call: &CallContext, key: &str) -> Result<bool> {
        let filespec = self.mapper.resolve(&call.namespace, key);
        self.memo.clear();

        if !file_io::unlink(&filespec.data_path())? {
            return self.missing_flag(call, key);
        }
        let info_path = filespec.info_path();
        if let Err(e) = file_io::unlink(&info_path) {
            warn!("Failed to remove {}: {}", info_path.display(), e);
        }
        debug!("Removed {}", filespec);
        Ok(true)
    }

    fn write_batch<K, V, F>(
        &self,
        operation: Operation,
        items: &[(K, V)],
        opts: &ItemOptions,
        write: F,
    ) -> Result<Vec<String>>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
        F: Fn(&CallContext, &str, &[u8]) -> Result<bool>,
    {
        let keys = items.iter().map(|(key, _)| AsRef::<str>::as_ref(key));
        if !self.options.writable {
            return Ok(keys.map(ToString::to_string).collect());
        }
        let call = self.context(opts)?;
        for key in keys.clone() {
            self.check_key(&call, key)?;
        }

        let event = Event::new(operation, &call.namespace, keys);
        self.run(&event, || {
            let mut failed = Vec::new();
            for (key, value) in items {
                let key = key.as_ref();
                if !write(&call, key, value.as_ref())? {
                    failed.push(key.to_string());
                }
            }
            Ok(failed)
        })
    }

    fn key_batch<K, F>(
        &self,
        operation: Operation,
        keys: &[K],
        opts: &ItemOptions,
        apply: F,
    ) -> Result<Vec<String>>
    where
        K: AsRef<str>,
        F: Fn(&CallContext, &str) -> Result<bool>,
    {
        if !self.options.writable {
            return Ok(keys.iter().map(|key| key.as_ref().to_string()).collect());
        }
        let mut call = self.context(opts)?;
        self.check_keys(&call, keys)?;
        call.ignore_missing = true;

        let event = Event::new(operation, &call.namespace, key_strs(keys));
        self.run(&event, || {
            let mut failed = Vec::new();
            for key in key_strs(keys) {
                if !apply(&call, key)? {
                    failed.push(key.to_string());
                }
            }
            Ok(failed)
        })
    }

    fn clear_prefix(&self, prefix: &str, mode: MatchMode, opts: &FindOptions) -> Result<bool> {
        let filter = self.filter(mode.normalize(MatchMode::EXPIRED), opts)?;
        let removed = eraser::clear_by_prefix(
            self.mapper.cache_dir(),
            prefix,
            self.mapper.dir_level(),
            &filter,
        )?;
        self.memo.clear();
        info!(
            "Cleared {} entries matching {} under {}",
            removed,
            filter.mode(),
            self.mapper.pattern(prefix)
        );
        Ok(true)
    }
}
