//! ArchivIO Archiver - Archive pipeline orchestration
//!
//! Drives registrations through their archive runs: per-provider file-tree
//! stats, the total-size gate, copies into the archive provider, signed
//! completion webhooks, and the stalled-run sweeper.

pub mod archiver;
pub mod metrics;
pub mod sweep;
pub mod token;

// Re-exports
pub use archiver::{ArchiveRequest, Archiver, CompletionReport, StartReceipt};
pub use metrics::{ArchiverMetrics, archiver_metrics};
pub use sweep::sweep_loop;
pub use token::{CallbackToken, signing_key};
