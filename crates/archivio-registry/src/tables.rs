//! Redb table definitions for persistent registry storage.

use redb::TableDefinition;

// Key: registration id, Value: bincode-encoded Registration
pub const REGISTRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("registrations");
