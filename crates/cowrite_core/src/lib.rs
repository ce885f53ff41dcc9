#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Document storage engine (update log, snapshots, compaction)
pub mod doc;

/// Error (common error types)
pub mod error;

pub use error::{CowriteError, Result};
