//! ArchivIO Client - File-storage gateway client
//!
//! This crate provides the HTTP client the archiver uses to talk to the
//! file-storage gateway: listing provider file trees and requesting copies
//! into the archive provider.

pub mod gateway;

// Re-exports
pub use gateway::{CopyOutcome, CopyRequest, CopySide, GatewayClient};
