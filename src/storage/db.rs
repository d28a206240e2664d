use redb::{
    Database as RedbDatabase, ReadTransaction, ReadableTable, ReadableTableMetadata, Table,
    WriteTransaction,
};
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

pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub posts: u64,
    pub similarity_data: u64,
    pub pools: u64,
    pub elements: u64,
    pub media_files: u64,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("post-similarity.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        let write_txn = db.begin_write()?;
        create_tables(&write_txn)?;
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

    /// Purge all data - for testing only
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let stats = PurgeStats {
            posts: write_txn.open_table(POSTS)?.len()?,
            similarity_data: write_txn.open_table(SIMILARITY_DATA)?.len()?,
            pools: write_txn.open_table(SIMILARITY_POOLS)?.len()?,
            elements: write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?.len()?,
            media_files: write_txn.open_table(MEDIA_FILES)?.len()?,
        };

        write_txn.delete_table(POSTS)?;
        write_txn.delete_table(SIMILARITY_DATA)?;
        write_txn.delete_multimap_table(SIMILARITY_DATA_BY_POST)?;
        write_txn.delete_multimap_table(SIMILARITY_DATA_CHUNKS)?;
        write_txn.delete_multimap_table(SIMILARITY_DATA_RATIO)?;
        write_txn.delete_table(SIMILARITY_POOLS)?;
        write_txn.delete_table(SIMILARITY_POOLS_BY_POST)?;
        write_txn.delete_table(SIMILARITY_POOL_SUBJECTS)?;
        write_txn.delete_table(SIMILARITY_POOL_ELEMENTS)?;
        write_txn.delete_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
        write_txn.delete_table(MEDIA_FILES)?;
        write_txn.delete_table(MEDIA_FILES_BY_URL)?;
        write_txn.delete_table(SEQUENCES)?;
        create_tables(&write_txn)?;

        write_txn.commit()?;
        Ok(stats)
    }
}

fn create_tables(write_txn: &WriteTransaction) -> Result<(), DatabaseError> {
    let _ = write_txn.open_table(POSTS)?;
    let _ = write_txn.open_table(SIMILARITY_DATA)?;
    let _ = write_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
    let _ = write_txn.open_multimap_table(SIMILARITY_DATA_CHUNKS)?;
    let _ = write_txn.open_multimap_table(SIMILARITY_DATA_RATIO)?;
    let _ = write_txn.open_table(SIMILARITY_POOLS)?;
    let _ = write_txn.open_table(SIMILARITY_POOLS_BY_POST)?;
    let _ = write_txn.open_table(SIMILARITY_POOL_SUBJECTS)?;
    let _ = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
    let _ = write_txn.open_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
    let _ = write_txn.open_table(MEDIA_FILES)?;
    let _ = write_txn.open_table(MEDIA_FILES_BY_URL)?;
    let _ = write_txn.open_table(SEQUENCES)?;
    Ok(())
}

/// Allocate the next id from the named sequence. Ids are never reused, even
/// after the row holding the previous maximum is deleted.
pub(super) fn next_id(write_txn: &WriteTransaction, sequence: &str) -> Result<u64, DatabaseError> {
    let mut table = write_txn.open_table(SEQUENCES)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}

/// Decode a msgpack record stored under `id`, if present.
pub(super) fn get_record<T, R>(table: &T, id: u64) -> Result<Option<R>, DatabaseError>
where
    T: ReadableTable<u64, &'static [u8]>,
    R: serde::de::DeserializeOwned,
{
    match table.get(id)? {
        Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
        None => Ok(None),
    }
}

/// Encode and store a msgpack record under `id`.
pub(super) fn put_record<R: serde::Serialize>(
    table: &mut Table<'_, u64, &'static [u8]>,
    id: u64,
    record: &R,
) -> Result<(), DatabaseError> {
    let data = rmp_serde::to_vec_named(record)?;
    table.insert(id, data.as_slice())?;
    Ok(())
}
