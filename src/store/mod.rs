//! Ordered key-value storage boundary.
//!
//! The cache core only depends on the [`Store`] trait: point reads plus an
//! atomic, all-or-nothing batch write. [`RedbStore`] is the production
//! backend; [`MemStore`] backs tests and tooling.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const REFS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("node_refs");

/// Errors raised by a [`Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend database could not be opened or is unusable.
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    /// Backend storage-level failure.
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    /// Backend table failure.
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    /// Backend transaction failure.
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    /// Backend commit failure; the batch was not applied.
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    /// Filesystem failure while opening the backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure reported by a non-redb backend.
    #[error("{0}")]
    Backend(String),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// An ordered set of puts applied all-or-nothing by [`Store::write`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    puts: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.puts.push((key, value));
    }

    /// Number of queued puts.
    pub fn len(&self) -> usize {
        self.puts.len()
    }

    /// Whether the batch holds no puts.
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }

    /// Consumes the batch, yielding its puts in insertion order.
    pub fn into_puts(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.puts
    }
}

/// An ordered byte-key/byte-value store.
///
/// Implementations must make `get` safe to call concurrently with `write`,
/// and `write` must apply the whole batch atomically. Key order must be
/// plain lexicographic byte order.
pub trait Store: Send + Sync {
    /// Point lookup; `None` when the key has never been written.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Applies every put in `batch` as a single atomic commit.
    fn write(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Persistent [`Store`] backed by a single redb table.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so read transactions never race its
        // first creation.
        let write_txn = db.begin_write()?;
        {
            let _table = write_txn.open_table(REFS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REFS_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REFS_TABLE)?;
            for (key, value) in batch.into_puts() {
                table.insert(key.as_slice(), value.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// In-memory [`Store`] for tests and tooling. Not durable.
#[derive(Default)]
pub struct MemStore {
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        for (key, value) in batch.into_puts() {
            entries.insert(key, value);
        }
        Ok(())
    }
}
