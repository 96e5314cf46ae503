//! Persistent registry store backed by redb.
//!
//! Provides typed put/load methods for the registrations table. All writes
//! are synchronous (write txn + commit). Reads go through the in-memory
//! HashMap in the registry layer; this module only handles persistence.

use crate::tables;
use crate::types::Registration;
use redb::{Database, ReadableTable};
use std::path::Path;
use tracing::error;

/// Error type for registry store operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for RegistryStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type RegistryStoreResult<T> = Result<T, RegistryStoreError>;

/// Persistent registry store backed by redb.
pub struct RegistryStore {
    db: Database,
}

impl RegistryStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> RegistryStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::REGISTRATIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn put_registration(&self, id: &str, registration: &Registration) {
        if let Err(e) = self.put_bincode(tables::REGISTRATIONS, id, registration) {
            error!("Failed to persist registration '{}': {}", id, e);
        }
    }

    pub fn load_registrations(&self) -> RegistryStoreResult<Vec<(String, Registration)>> {
        self.load_bincode_table(tables::REGISTRATIONS)
    }

    // ---- Generic helpers ----

    fn put_bincode<T: serde::Serialize>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> RegistryStoreResult<()> {
        let bytes = bincode::serialize(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_bincode_table<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
    ) -> RegistryStoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            let bytes = entry.1.value();
            match bincode::deserialize::<T>(bytes) {
                Ok(val) => result.push((key, val)),
                Err(e) => error!("Failed to decode entry '{}': {}", key, e),
            }
        }
        Ok(result)
    }
}
