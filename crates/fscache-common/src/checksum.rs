//! Integrity hash algorithms for fscache
//!
//! Provides the hash functions used by read control: a digest of the value
//! is stored in the side-car metadata on write and recomputed on read.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hash algorithm used for read-integrity verification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgo {
    /// CRC32C (fast, 4 bytes)
    #[default]
    Crc32c,
    /// xxHash64 (fast, 8 bytes)
    Xxh64,
    /// SHA-256 (32 bytes)
    Sha256,
    /// MD5 (16 bytes)
    Md5,
}

impl IntegrityAlgo {
    /// All supported algorithms
    pub const ALL: [Self; 4] = [Self::Crc32c, Self::Xxh64, Self::Sha256, Self::Md5];

    /// Compute the raw digest of `data`
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Crc32c => crc32c::crc32c(data).to_be_bytes().to_vec(),
            Self::Xxh64 => xxhash_rust::xxh64::xxh64(data, 0).to_be_bytes().to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Md5 => md5::compute(data).0.to_vec(),
        }
    }

    /// Verify `data` against a stored digest
    #[must_use]
    pub fn verify(self, data: &[u8], expected: &[u8]) -> bool {
        self.digest(data) == expected
    }

    /// Canonical lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Crc32c => "crc32c",
            Self::Xxh64 => "xxh64",
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for IntegrityAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IntegrityAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name() == lower)
            .ok_or_else(|| Error::invalid_argument(format!("unsupported hash algorithm '{s}'")))
    }
}

/// Hex encode a digest for error messages and listings
#[must_use]
pub fn digest_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}

/// MD5 hex digest of a key, used to derive shard directory names
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_digest_lengths() {
        let data = b"hello, world!";
        assert_eq!(IntegrityAlgo::Crc32c.digest(data).len(), 4);
        assert_eq!(IntegrityAlgo::Xxh64.digest(data).len(), 8);
        assert_eq!(IntegrityAlgo::Sha256.digest(data).len(), 32);
        assert_eq!(IntegrityAlgo::Md5.digest(data).len(), 16);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut data = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut data);

        for algo in IntegrityAlgo::ALL {
            let digest = algo.digest(&data);
            assert!(algo.verify(&data, &digest));

            let mut corrupted = data.clone();
            corrupted[100] ^= 0x01;
            assert!(!algo.verify(&corrupted, &digest), "{algo} missed a bit flip");
        }
    }

    #[test]
    fn test_parse_algo() {
        assert_eq!("crc32c".parse::<IntegrityAlgo>().unwrap(), IntegrityAlgo::Crc32c);
        assert_eq!("SHA256".parse::<IntegrityAlgo>().unwrap(), IntegrityAlgo::Sha256);
        assert!("whirlpool".parse::<IntegrityAlgo>().is_err());
    }

    #[test]
    fn test_md5_hex_known_value() {
        // md5("foo")
        assert_eq!(md5_hex(b"foo"), "acbd18db4cc2f85cedef654fccc4a4d8");
    }
}
