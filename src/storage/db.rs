use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("ISBN {isbn} is already registered to book {book_id}")]
    DuplicateIsbn { isbn: String, book_id: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

/// Embedded catalog database. Clones share the same redb handle.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub books: u64,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("library.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BOOKS)?;
            let _ = write_txn.open_table(BOOK_ISBNS)?;
            let _ = write_txn.open_table(AUTHOR_BOOKS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Remove every book and index entry.
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut stats = PurgeStats::default();

        {
            let mut table = write_txn.open_table(BOOKS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
                stats.books += 1;
            }
        }

        {
            let mut table = write_txn.open_table(BOOK_ISBNS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        {
            let mut table = write_txn.open_table(AUTHOR_BOOKS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(stats)
    }
}
