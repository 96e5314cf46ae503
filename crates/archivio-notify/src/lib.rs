//! ArchivIO Notify - Outcome notifications
//!
//! Renders and delivers the mails sent when an archive run finishes: a
//! success note to the initiating user, or a user + support pair when the
//! run fails.

pub mod message;
pub mod notifier;

// Re-exports
pub use message::{Message, NotifyContext, NotifyDetail, ProviderFailure, Template};
pub use notifier::{HttpNotifier, LogNotifier, MemoryNotifier, Notifier, NotifyService};
