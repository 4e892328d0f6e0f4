//! Per-entry value types handed back to callers

use crate::clock::unix_secs;
use crate::codec::EntryInfo;
use crate::memo::KeyInfo;
use fscache_common::checksum::digest_hex;
use fscache_common::{Error, IntegrityAlgo, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

/// Compare-and-swap token derived from the value file's mtime and size
///
/// Rendered as `<secs>.<nanos>:<size>` with nanos zero-padded to nine
/// digits, so distinct `(mtime, size)` pairs never share a rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CasToken {
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
}

impl CasToken {
    /// Token for the current state of an entry
    #[must_use]
    pub fn from_info(info: &KeyInfo) -> Self {
        let (mtime_secs, mtime_nanos) = info
            .mtime
            .duration_since(UNIX_EPOCH)
            .map_or((0, 0), |d| (d.as_secs(), d.subsec_nanos()));
        Self {
            mtime_secs,
            mtime_nanos,
            size: info.size,
        }
    }
}

impl fmt::Display for CasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}:{}", self.mtime_secs, self.mtime_nanos, self.size)
    }
}

impl FromStr for CasToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_argument(format!("malformed CAS token '{s}'"));

        let (mtime, size) = s.split_once(':').ok_or_else(invalid)?;
        let (secs, nanos) = mtime.split_once('.').ok_or_else(invalid)?;
        if nanos.len() != 9 {
            return Err(invalid());
        }

        let token = Self {
            mtime_secs: secs.parse().map_err(|_| invalid())?,
            mtime_nanos: nanos.parse().map_err(|_| invalid())?,
            size: size.parse().map_err(|_| invalid())?,
        };
        if token.mtime_nanos >= 1_000_000_000 {
            return Err(invalid());
        }
        Ok(token)
    }
}

/// Metadata of a stored entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Entry location without suffix
    pub filespec: PathBuf,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// Value size in bytes
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atime: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<IntegrityAlgo>,
    /// Hex digest recorded at write time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl EntryMetadata {
    /// Merge stat info with the decoded side-car
    #[must_use]
    pub fn new(info: &KeyInfo, side_car: Option<EntryInfo>) -> Self {
        let side_car = side_car.unwrap_or_default();
        let (hash_algo, hash) = match side_car.integrity() {
            Some((algo, hash)) => (Some(algo), Some(digest_hex(hash))),
            None => (None, None),
        };
        Self {
            filespec: info.filespec.as_path().to_path_buf(),
            mtime: info.mtime_secs(),
            size: info.size,
            ctime: info.ctime.map(unix_secs),
            atime: info.atime.map(unix_secs),
            tags: side_car.tags,
            hash_algo,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FileSpec;
    use std::time::Duration;

    fn info(secs: u64, nanos: u32, size: u64) -> KeyInfo {
        KeyInfo {
            filespec: FileSpec::new("/tmp/c/app-ac/app-foo".into()),
            mtime: UNIX_EPOCH + Duration::new(secs, nanos),
            size,
            ctime: None,
            atime: None,
        }
    }

    #[test]
    fn test_cas_token_display_and_parse() {
        let token = CasToken::from_info(&info(1_700_000_000, 42, 3));
        assert_eq!(token.to_string(), "1700000000.000000042:3");
        assert_eq!(token.to_string().parse::<CasToken>().unwrap(), token);
    }

    #[test]
    fn test_cas_token_is_unambiguous() {
        // A plain concatenation would render both as "1011"
        let a = CasToken::from_info(&info(10, 0, 11));
        let b = CasToken::from_info(&info(101, 0, 1));
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_cas_token_rejects_garbage() {
        for bad in ["", "12", "12:3", "12.5:3", "x.000000000:1", "1.000000000:", "1.999999999x:1"] {
            assert!(bad.parse::<CasToken>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_metadata_merges_side_car() {
        let side_car = EntryInfo::new(
            &["red".to_string()],
            Some((IntegrityAlgo::Md5, IntegrityAlgo::Md5.digest(b"foo"))),
        );
        let meta = EntryMetadata::new(&info(100, 0, 3), Some(side_car));
        assert_eq!(meta.mtime, 100);
        assert_eq!(meta.tags, vec!["red".to_string()]);
        assert_eq!(meta.hash_algo, Some(IntegrityAlgo::Md5));
        assert_eq!(meta.hash.as_deref(), Some("acbd18db4cc2f85cedef654fccc4a4d8"));

        let bare = EntryMetadata::new(&info(100, 0, 3), None);
        assert!(bare.tags.is_empty() && bare.hash.is_none());
    }
}
