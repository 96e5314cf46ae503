//! ArchivIO Registry - Registration archive-state tracking
//!
//! Keeps the per-provider archive status of every registration in memory,
//! with optional redb-backed persistence so state survives restarts.

pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

// Re-exports
pub use registry::Registry;
pub use store::RegistryStore;
pub use types::{Completion, ProviderState, Registration};
