use redb::ReadableTable;

use super::db::{get_record, put_record, Database, DatabaseError};
use super::models::PostRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // Post operations
    // ========================================================================

    /// Store (or replace) a post record
    pub fn put_post(&self, post: &PostRecord) -> Result<(), DatabaseError> {
        debug_assert!(!post.md5.is_empty(), "post md5 must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(POSTS)?;
            put_record(&mut table, post.id, post)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_post(&self, id: u64) -> Result<Option<PostRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(POSTS)?;
        get_record(&table, id)
    }

    /// Fetch posts by id, skipping ids that do not exist
    pub fn get_posts(&self, ids: &[u64]) -> Result<Vec<PostRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(POSTS)?;

        let mut posts = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(post) = get_record(&table, id)? {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    /// Up to `limit` posts with id greater than `after`, oldest first
    pub fn posts_after(&self, after: u64, limit: usize) -> Result<Vec<PostRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(POSTS)?;

        let mut posts = Vec::new();
        for result in table.range((after + 1)..)?.take(limit) {
            let (_, value) = result?;
            posts.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(posts)
    }

    /// Remove a post record. Similarity rows are cleaned up by the caller.
    pub fn delete_post(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(POSTS)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
