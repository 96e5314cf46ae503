//! ArchivIO Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, and configuration
//! structures used across all ArchivIO components.

pub mod config;
pub mod error;
pub mod filetree;
pub mod stat;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use filetree::{FileEntry, FileKind};
pub use stat::{AggregateStatResult, aggregate_file_tree};
pub use types::*;
