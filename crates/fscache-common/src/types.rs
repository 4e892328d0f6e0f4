//! Core type definitions for fscache
//!
//! This module defines the matching-mode bitmask used by scans and bulk
//! clears, and the pattern validator applied to keys and namespaces.

use crate::error::{Error, Result};
use derive_more::{BitAnd, BitOr};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest key file name the filesystem accepts, minus the `.dat`/`.ifo` suffix
pub const MAX_FILE_NAME: usize = 255 - 4;

/// Bitmask selecting entries by expiry state and tag membership
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BitOr, BitAnd, Serialize, Deserialize)]
pub struct MatchMode(u8);

impl MatchMode {
    /// Entries that have not expired
    pub const ACTIVE: Self = Self(0o1);
    /// Entries that have expired
    pub const EXPIRED: Self = Self(0o2);
    /// Every entry regardless of expiry
    pub const ALL: Self = Self(0o3);
    /// Stored tags must include every requested tag
    pub const TAGS_AND: Self = Self(0o10);
    /// Stored tags must include at least one requested tag
    pub const TAGS_OR: Self = Self(0o20);
    /// Stored tags must include none of the requested tags
    pub const TAGS_NEGATE: Self = Self(0o40);

    const EXPIRY_BITS: u8 = 0o3;
    const TAG_BITS: u8 = 0o70;

    /// True if every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any tag matching bit is set
    #[must_use]
    pub const fn has_tag_filter(self) -> bool {
        self.0 & Self::TAG_BITS != 0
    }

    /// Fill in the expiry bits with `default` when none are set
    #[must_use]
    pub const fn normalize(self, default: Self) -> Self {
        if self.0 & Self::EXPIRY_BITS == 0 {
            Self(self.0 | (default.0 & Self::EXPIRY_BITS))
        } else {
            self
        }
    }
}

impl fmt::Debug for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchMode({self})")
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::ALL) {
            parts.push("all");
        } else if self.contains(Self::EXPIRED) {
            parts.push("expired");
        } else if self.contains(Self::ACTIVE) {
            parts.push("active");
        }
        if self.contains(Self::TAGS_AND) {
            parts.push("tags-and");
        }
        if self.contains(Self::TAGS_OR) {
            parts.push("tags-or");
        }
        if self.contains(Self::TAGS_NEGATE) {
            parts.push("tags-negate");
        }
        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join("|"))
        }
    }
}

impl FromStr for MatchMode {
    type Err = Error;

    /// Parse `active`, `expired`, `all`, `tags-and`, `tags-or`, `tags-negate`
    /// joined by `|` or `,`
    fn from_str(s: &str) -> Result<Self> {
        s.split(['|', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::default(), |mode, part| {
                let bit = match part.to_ascii_lowercase().as_str() {
                    "active" => Self::ACTIVE,
                    "expired" => Self::EXPIRED,
                    "all" => Self::ALL,
                    "tags-and" => Self::TAGS_AND,
                    "tags-or" => Self::TAGS_OR,
                    "tags-negate" => Self::TAGS_NEGATE,
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "unknown matching mode '{other}'"
                        )));
                    }
                };
                Ok(mode | bit)
            })
    }
}

/// Validates keys and namespaces against the configured patterns
#[derive(Clone, Debug)]
pub struct NameValidator {
    key: Regex,
    namespace: Regex,
    separator: String,
}

impl NameValidator {
    /// Compile the key and namespace patterns
    ///
    /// Namespaces may not contain `separator`, otherwise the file name prefix
    /// of one namespace would also match the entries of another.
    pub fn new(key_pattern: &str, namespace_pattern: &str, separator: &str) -> Result<Self> {
        let compile = |what: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::invalid_argument(format!("invalid {what} pattern '{pattern}': {e}"))
            })
        };
        Ok(Self {
            key: compile("key", key_pattern)?,
            namespace: compile("namespace", namespace_pattern)?,
            separator: separator.to_string(),
        })
    }

    /// Check a key; `prefix_len` is the length of `namespace + separator`
    pub fn check_key(&self, key: &str, prefix_len: usize) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("the key can't be empty"));
        }
        if !self.key.is_match(key) {
            return Err(Error::invalid_argument(format!(
                "the key '{key}' doesn't match against pattern '{}'",
                self.key.as_str()
            )));
        }
        if prefix_len + key.len() > MAX_FILE_NAME {
            return Err(Error::invalid_argument(format!(
                "the key '{key}' exceeds the maximum file name length"
            )));
        }
        Ok(())
    }

    /// Check a namespace
    pub fn check_namespace(&self, namespace: &str) -> Result<()> {
        if !self.namespace.is_match(namespace) {
            return Err(Error::invalid_argument(format!(
                "the namespace '{namespace}' doesn't match against pattern '{}'",
                self.namespace.as_str()
            )));
        }
        if !self.separator.is_empty() && namespace.contains(&self.separator) {
            return Err(Error::invalid_argument(format!(
                "the namespace '{namespace}' contains the separator '{}'",
                self.separator
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PATTERN;

    #[test]
    fn test_match_mode_bits() {
        assert!(MatchMode::ALL.contains(MatchMode::ACTIVE));
        assert!(MatchMode::ALL.contains(MatchMode::EXPIRED));
        assert!(!MatchMode::ACTIVE.contains(MatchMode::ALL));

        let mode = MatchMode::EXPIRED | MatchMode::TAGS_OR;
        assert!(mode.has_tag_filter());
        assert!(!MatchMode::ALL.has_tag_filter());
    }

    #[test]
    fn test_match_mode_normalize() {
        assert_eq!(
            MatchMode::TAGS_AND.normalize(MatchMode::ACTIVE),
            MatchMode::ACTIVE | MatchMode::TAGS_AND
        );
        assert_eq!(
            MatchMode::EXPIRED.normalize(MatchMode::ACTIVE),
            MatchMode::EXPIRED
        );
    }

    #[test]
    fn test_match_mode_parse_and_display() {
        let mode: MatchMode = "expired|tags-and".parse().unwrap();
        assert_eq!(mode, MatchMode::EXPIRED | MatchMode::TAGS_AND);
        assert_eq!(mode.to_string(), "expired|tags-and");

        assert_eq!("all".parse::<MatchMode>().unwrap(), MatchMode::ALL);
        assert!("sometimes".parse::<MatchMode>().is_err());
    }

    #[test]
    fn test_default_pattern() {
        let validator = NameValidator::new(DEFAULT_PATTERN, DEFAULT_PATTERN, "-").unwrap();

        validator.check_key("Foo_bar+1-2", 4).unwrap();
        assert!(validator.check_key("", 4).is_err());
        assert!(validator.check_key("foo/bar", 4).is_err());
        assert!(validator.check_key("foo.bar", 4).is_err());
        assert!(validator.check_key(&"k".repeat(250), 4).is_err());

        validator.check_namespace("app").unwrap();
        validator.check_namespace("").unwrap();
        assert!(validator.check_namespace("a b").is_err());
    }

    #[test]
    fn test_namespace_must_not_contain_separator() {
        let validator = NameValidator::new(DEFAULT_PATTERN, DEFAULT_PATTERN, "-").unwrap();
        assert!(matches!(
            validator.check_namespace("app-x"),
            Err(Error::InvalidArgument(_))
        ));
        validator.check_namespace("app_x").unwrap();

        // Keys may still carry the separator
        validator.check_key("x-foo", 4).unwrap();

        let validator = NameValidator::new(DEFAULT_PATTERN, DEFAULT_PATTERN, "__").unwrap();
        validator.check_namespace("app-x").unwrap();
        assert!(validator.check_namespace("app__x").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            NameValidator::new("([", DEFAULT_PATTERN, "-"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
