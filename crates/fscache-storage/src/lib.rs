//! fscache Storage Engine - Filesystem-backed key/value cache
//!
//! This crate implements the cache adapter including:
//! - Sharded on-disk layout derived from the MD5 of the key
//! - Cooperative `flock` locking for readers and writers
//! - Side-car metadata for tags and read-integrity digests
//! - TTL expiry, CAS tokens and tag-based invalidation
//! - Pull-based scans and bulk clears over the directory tree
//! - Interceptors around every public operation

pub mod capabilities;
pub mod clock;
pub mod codec;
pub mod entry;
pub mod eraser;
pub mod file_io;
pub mod hooks;
pub mod layout;
pub mod memo;
pub mod scan;
pub mod store;

// Re-exports
pub use capabilities::{Capabilities, Capacity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::EntryInfo;
pub use entry::{CasToken, EntryMetadata};
pub use hooks::{Event, ExceptionHandler, Interceptor, Operation, Outcome};
pub use layout::{DATA_SUFFIX, FileSpec, INFO_SUFFIX, PathMapper};
pub use scan::{ScanField, ScanItem};
pub use store::{FilesystemCache, FindOptions, ItemOptions};
