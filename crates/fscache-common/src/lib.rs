//! fscache Common - Shared types and utilities
//!
//! This crate provides the error type, configuration structures, integrity
//! hash algorithms and matching-mode types used by the fscache storage
//! engine and its tools.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::IntegrityAlgo;
pub use config::FilesystemOptions;
pub use error::{Error, Result};
pub use types::*;
