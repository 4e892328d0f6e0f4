//! Side-car metadata codec
//!
//! The `.ifo` file next to each value holds the entry's tags and its
//! read-control digest. It is written only when one of them is present.
//!
//! Record format:
//! ```text
//! +--------+---------+--------+---------------+--------+
//! | Magic  | Version | Length | bincode(info) | CRC32C |
//! | 4B     | 1B      | 4B     | var           | 4B     |
//! +--------+---------+--------+---------------+--------+
//! ```

use crate::file_io;
use fscache_common::{Error, IntegrityAlgo, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Metadata record magic number
const INFO_MAGIC: [u8; 4] = *b"FCIF";

/// Current record version
const INFO_VERSION: u8 = 1;

/// Header size (magic + version + length)
const HEADER_SIZE: usize = 9;

/// Decoded side-car metadata
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Tags attached at write time (deduplicated, insertion order)
    pub tags: Vec<String>,
    /// Read-control digest of the value
    pub hash: Option<Vec<u8>>,
    /// Algorithm that produced `hash`
    pub algo: Option<IntegrityAlgo>,
}

impl EntryInfo {
    /// Build metadata for a write, dropping duplicate tags
    #[must_use]
    pub fn new(tags: &[String], integrity: Option<(IntegrityAlgo, Vec<u8>)>) -> Self {
        let mut seen = BTreeSet::new();
        let tags = tags
            .iter()
            .filter(|tag| seen.insert(tag.as_str()))
            .cloned()
            .collect();
        let (algo, hash) = match integrity {
            Some((algo, hash)) => (Some(algo), Some(hash)),
            None => (None, None),
        };
        Self { tags, hash, algo }
    }

    /// True when there is nothing worth persisting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.hash.is_none()
    }

    /// Stored digest and its algorithm, when both are present
    #[must_use]
    pub fn integrity(&self) -> Option<(IntegrityAlgo, &[u8])> {
        match (self.algo, self.hash.as_deref()) {
            (Some(algo), Some(hash)) => Some((algo, hash)),
            _ => None,
        }
    }

    /// Stored tags include every requested tag
    #[must_use]
    pub fn has_all_tags(&self, requested: &[String]) -> bool {
        requested.iter().all(|tag| self.tags.contains(tag))
    }

    /// Stored tags include at least one requested tag
    #[must_use]
    pub fn has_any_tag(&self, requested: &[String]) -> bool {
        requested.iter().any(|tag| self.tags.contains(tag))
    }

    /// Serialize to the on-disk record
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("failed to encode metadata: {e}")))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| Error::Serialization("metadata record too large".into()))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
        buf.extend_from_slice(&INFO_MAGIC);
        buf.push(INFO_VERSION);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&body);

        // CRC over everything except the CRC itself
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Parse an on-disk record; `path` only labels errors
    pub fn decode(data: &[u8], path: &Path) -> Result<Self> {
        let corrupted = |reason: &str| Error::CorruptedMetadata {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if data.len() < HEADER_SIZE + 4 {
            return Err(corrupted("record too small"));
        }
        if data[0..4] != INFO_MAGIC {
            return Err(corrupted("invalid magic"));
        }
        if data[4] != INFO_VERSION {
            return Err(corrupted("unsupported version"));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[5..9]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;

        let total = HEADER_SIZE + body_len + 4;
        if data.len() != total {
            return Err(corrupted("record length mismatch"));
        }

        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&data[total - 4..]);
        if crc32c::crc32c(&data[..total - 4]) != u32::from_le_bytes(crc_bytes) {
            return Err(corrupted("CRC mismatch"));
        }

        bincode::deserialize(&data[HEADER_SIZE..total - 4])
            .map_err(|e| corrupted(&format!("undecodable body: {e}")))
    }
}

/// Read and decode a side-car file; a missing file is `None`
pub fn read_info(path: &Path, locking: bool) -> Result<Option<EntryInfo>> {
    file_io::read_file(path, locking)?
        .map(|data| EntryInfo::decode(&data, path))
        .transpose()
}
