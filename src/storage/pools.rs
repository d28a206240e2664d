use chrono::Utc;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};

use super::db::{get_record, next_id, put_record, Database, DatabaseError};
use super::models::{SimilarityPool, SimilarityPoolElement};
use super::tables::*;

/// Result of linking one matched pair of posts.
#[derive(Debug, Clone)]
pub struct PairedElements {
    /// Element in the subject's pool pointing at the other post
    pub subject: SimilarityPoolElement,
    /// Element in the other post's pool pointing back at the subject
    pub sibling: SimilarityPoolElement,
    /// At least one of the two rows did not exist before
    pub created: bool,
}

impl Database {
    // ========================================================================
    // Pool operations
    // ========================================================================

    pub fn get_pool(&self, id: u64) -> Result<Option<SimilarityPool>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SIMILARITY_POOLS)?;
        get_record(&table, id)
    }

    pub fn get_pool_by_post(&self, post_id: u64) -> Result<Option<SimilarityPool>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let by_post = read_txn.open_table(SIMILARITY_POOLS_BY_POST)?;
        let pool_id = match by_post.get(post_id)? {
            Some(id) => id.value(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(SIMILARITY_POOLS)?;
        get_record(&table, pool_id)
    }

    /// Get or create the pools of several posts in one transaction
    pub fn get_or_create_pools(
        &self,
        post_ids: &[u64],
    ) -> Result<Vec<SimilarityPool>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut pools = Vec::with_capacity(post_ids.len());
        for &post_id in post_ids {
            pools.push(pool_for_post(&write_txn, post_id)?.0);
        }
        write_txn.commit()?;
        Ok(pools)
    }

    /// Store the outcome of populating a post's pool as a batch subject.
    /// Marks the post in the subject index, which drives pool catch-up.
    pub fn record_pool_run(
        &self,
        post_id: u64,
        total_results: u64,
        calculation_time: f64,
    ) -> Result<SimilarityPool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let (mut pool, _) = pool_for_post(&write_txn, post_id)?;
        pool.total_results = total_results;
        pool.calculation_time = calculation_time;
        pool.updated = Utc::now();
        {
            let mut table = write_txn.open_table(SIMILARITY_POOLS)?;
            put_record(&mut table, pool.id, &pool)?;
            let mut subjects = write_txn.open_table(SIMILARITY_POOL_SUBJECTS)?;
            subjects.insert(post_id, pool.id)?;
        }
        write_txn.commit()?;
        Ok(pool)
    }

    /// Highest post id whose pool was populated as a subject (0 when empty)
    pub fn max_subject_pool_post_id(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let subjects = read_txn.open_table(SIMILARITY_POOL_SUBJECTS)?;
        let last = subjects.last()?;
        Ok(last.map(|(k, _)| k.value()).unwrap_or(0))
    }

    /// Forget that a post was populated as a subject so catch-up or a
    /// rebuild treats it as new.
    pub fn clear_pool_subject(&self, post_id: u64) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut subjects = write_txn.open_table(SIMILARITY_POOL_SUBJECTS)?;
            subjects.remove(post_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove a post's pool row and its indexes. Elements must already be gone.
    pub fn delete_pool_for_post(&self, post_id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut by_post = write_txn.open_table(SIMILARITY_POOLS_BY_POST)?;
            let pool_id = by_post.remove(post_id)?.map(|v| v.value());
            let mut subjects = write_txn.open_table(SIMILARITY_POOL_SUBJECTS)?;
            subjects.remove(post_id)?;
            match pool_id {
                Some(pool_id) => {
                    let mut table = write_txn.open_table(SIMILARITY_POOLS)?;
                    let removed = table.remove(pool_id)?.is_some();
                    removed
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Element operations
    // ========================================================================

    pub fn get_element(&self, id: u64) -> Result<Option<SimilarityPoolElement>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
        get_record(&table, id)
    }

    /// All elements of a pool, best score first
    pub fn get_elements_for_pool(
        &self,
        pool_id: u64,
    ) -> Result<Vec<SimilarityPoolElement>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
        let table = read_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;

        let mut elements: Vec<SimilarityPoolElement> = Vec::new();
        for result in index.range((pool_id, 0)..=(pool_id, u64::MAX))? {
            let (_, element_id) = result?;
            if let Some(element) = get_record(&table, element_id.value())? {
                elements.push(element);
            }
        }
        elements.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        Ok(elements)
    }

    pub fn element_count(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
        Ok(table.len()?)
    }

    /// Every stored element, in id order
    pub fn list_elements(&self) -> Result<Vec<SimilarityPoolElement>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;

        let mut elements = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            elements.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(elements)
    }

    /// Get-or-create both directions of a match and link them, in one
    /// transaction. Re-running with the same posts updates the score in place.
    pub fn pair_elements(
        &self,
        subject_post_id: u64,
        other_post_id: u64,
        score: f64,
    ) -> Result<PairedElements, DatabaseError> {
        let write_txn = self.begin_write()?;
        let (subject_pool, _) = pool_for_post(&write_txn, subject_post_id)?;
        let (other_pool, _) = pool_for_post(&write_txn, other_post_id)?;

        let (mut subject, subject_created) =
            element_for(&write_txn, subject_pool.id, other_post_id, score)?;
        let (mut sibling, sibling_created) =
            element_for(&write_txn, other_pool.id, subject_post_id, score)?;

        subject.score = score;
        subject.sibling_id = Some(sibling.id);
        sibling.score = score;
        sibling.sibling_id = Some(subject.id);
        {
            let mut table = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
            put_record(&mut table, subject.id, &subject)?;
            put_record(&mut table, sibling.id, &sibling)?;
        }
        write_txn.commit()?;

        Ok(PairedElements {
            subject,
            sibling,
            created: subject_created || sibling_created,
        })
    }

    /// Clear `sibling_id` on every listed element
    pub fn unlink_elements(&self, ids: &[u64]) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
            for &id in ids {
                let element: Option<SimilarityPoolElement> = get_record(&table, id)?;
                if let Some(mut element) = element {
                    if element.sibling_id.take().is_some() {
                        put_record(&mut table, id, &element)?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete the listed elements and their index entries, returning how many
    /// rows were removed
    pub fn delete_elements(&self, ids: &[u64]) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut removed = 0;
        {
            let mut table = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
            let mut index = write_txn.open_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
            for &id in ids {
                let element: Option<SimilarityPoolElement> = get_record(&table, id)?;
                if let Some(element) = element {
                    index.remove((element.pool_id, element.post_id))?;
                    table.remove(id)?;
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }
}

/// Get or create the pool of `post_id` inside an open write transaction.
fn pool_for_post(
    write_txn: &WriteTransaction,
    post_id: u64,
) -> Result<(SimilarityPool, bool), DatabaseError> {
    let existing = {
        let by_post = write_txn.open_table(SIMILARITY_POOLS_BY_POST)?;
        let pool_id = by_post.get(post_id)?.map(|v| v.value());
        match pool_id {
            Some(pool_id) => {
                let table = write_txn.open_table(SIMILARITY_POOLS)?;
                get_record(&table, pool_id)?
            }
            None => None,
        }
    };
    if let Some(pool) = existing {
        return Ok((pool, false));
    }

    let now = Utc::now();
    let pool = SimilarityPool {
        id: next_id(write_txn, "similarity_pools")?,
        post_id,
        total_results: 0,
        calculation_time: 0.0,
        created: now,
        updated: now,
    };
    let mut table = write_txn.open_table(SIMILARITY_POOLS)?;
    put_record(&mut table, pool.id, &pool)?;
    let mut by_post = write_txn.open_table(SIMILARITY_POOLS_BY_POST)?;
    by_post.insert(post_id, pool.id)?;
    Ok((pool, true))
}

/// Get or create the element of `pool_id` pointing at `post_id`.
fn element_for(
    write_txn: &WriteTransaction,
    pool_id: u64,
    post_id: u64,
    score: f64,
) -> Result<(SimilarityPoolElement, bool), DatabaseError> {
    let existing = {
        let index = write_txn.open_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
        let element_id = index.get((pool_id, post_id))?.map(|v| v.value());
        match element_id {
            Some(element_id) => {
                let table = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
                get_record(&table, element_id)?
            }
            None => None,
        }
    };
    if let Some(element) = existing {
        return Ok((element, false));
    }

    let element = SimilarityPoolElement {
        id: next_id(write_txn, "similarity_pool_elements")?,
        pool_id,
        post_id,
        score,
        sibling_id: None,
    };
    let mut table = write_txn.open_table(SIMILARITY_POOL_ELEMENTS)?;
    put_record(&mut table, element.id, &element)?;
    let mut index = write_txn.open_table(SIMILARITY_POOL_ELEMENT_INDEX)?;
    index.insert((pool_id, post_id), element.id)?;
    Ok((element, true))
}
