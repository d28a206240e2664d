use std::collections::{BTreeSet, HashSet};

use redb::{ReadableMultimapTable, ReadableTable, WriteTransaction};

use super::db::{get_record, next_id, put_record, Database, DatabaseError};
use super::models::SimilarityData;
use super::tables::*;
use crate::similarity::filter::CandidateQuery;
use crate::similarity::hash::ImageHash;

/// Ratio as an integer index key (4 decimal places).
fn ratio_key(ratio: f64) -> u64 {
    (ratio * 10_000.0).round().max(0.0) as u64
}

impl Database {
    // ========================================================================
    // Similarity data operations
    // ========================================================================

    /// Store one row per hash for a post, all in a single transaction, and
    /// maintain the post, chunk and ratio indexes.
    pub fn insert_similarity_data(
        &self,
        post_id: u64,
        ratio: f64,
        hashes: &[ImageHash],
    ) -> Result<Vec<SimilarityData>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut rows = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let row = SimilarityData {
                id: next_id(&write_txn, "similarity_data")?,
                post_id,
                ratio,
                chunks: hash.to_chunks(),
            };
            insert_row(&write_txn, &row)?;
            rows.push(row);
        }
        write_txn.commit()?;
        Ok(rows)
    }

    pub fn get_similarity_data_for_post(
        &self,
        post_id: u64,
    ) -> Result<Vec<SimilarityData>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let by_post = read_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
        let table = read_txn.open_table(SIMILARITY_DATA)?;

        let mut rows = Vec::new();
        for id in by_post.get(post_id)? {
            if let Some(row) = get_record(&table, id?.value())? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Delete every similarity row of a post, returning how many were removed
    pub fn delete_similarity_data_for_post(&self, post_id: u64) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;
        let rows: Vec<SimilarityData> = {
            let by_post = write_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
            let table = write_txn.open_table(SIMILARITY_DATA)?;
            let mut rows = Vec::new();
            for id in by_post.get(post_id)? {
                if let Some(row) = get_record(&table, id?.value())? {
                    rows.push(row);
                }
            }
            rows
        };

        for row in &rows {
            remove_row(&write_txn, row)?;
        }
        write_txn.commit()?;
        Ok(rows.len())
    }

    /// Highest post id that has similarity data (0 when empty)
    pub fn max_similarity_data_post_id(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let by_post = read_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
        let last = by_post.iter()?.next_back().transpose()?;
        Ok(last.map(|(k, _)| k.value()).unwrap_or(0))
    }

    /// Up to `limit` distinct post ids with similarity data greater than `after`
    pub fn similarity_data_post_ids_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let by_post = read_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;

        let mut post_ids = Vec::new();
        for result in by_post.range((after + 1)..)?.take(limit) {
            let (key, _) = result?;
            post_ids.push(key.value());
        }
        Ok(post_ids)
    }

    /// Execute a candidate query inside the store: ratio range scan, then
    /// per-band intersection of chunk postings, unioned across bands.
    pub fn find_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<SimilarityData>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let ratio_index = read_txn.open_multimap_table(SIMILARITY_DATA_RATIO)?;
        let chunk_index = read_txn.open_multimap_table(SIMILARITY_DATA_CHUNKS)?;
        let table = read_txn.open_table(SIMILARITY_DATA)?;

        let mut in_ratio: HashSet<u64> = HashSet::new();
        let range = ratio_key(query.ratio_low)..=ratio_key(query.ratio_high);
        for result in ratio_index.range(range)? {
            let (_, ids) = result?;
            for id in ids {
                in_ratio.insert(id?.value());
            }
        }
        if in_ratio.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidate_ids: BTreeSet<u64> = BTreeSet::new();
        for band in &query.bands {
            let mut surviving = in_ratio.clone();
            for term in band {
                if surviving.is_empty() {
                    break;
                }
                let mut postings = HashSet::new();
                for id in chunk_index.get((term.index as u8, term.value.as_str()))? {
                    postings.insert(id?.value());
                }
                surviving.retain(|id| postings.contains(id));
            }
            candidate_ids.extend(surviving);
        }

        let mut rows = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            if let Some(row) = get_record::<_, SimilarityData>(&table, id)? {
                if query.exclude_post_id != Some(row.post_id) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }
}

fn insert_row(write_txn: &WriteTransaction, row: &SimilarityData) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(SIMILARITY_DATA)?;
    put_record(&mut table, row.id, row)?;

    let mut by_post = write_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
    by_post.insert(row.post_id, row.id)?;

    let mut ratio_index = write_txn.open_multimap_table(SIMILARITY_DATA_RATIO)?;
    ratio_index.insert(ratio_key(row.ratio), row.id)?;

    let mut chunk_index = write_txn.open_multimap_table(SIMILARITY_DATA_CHUNKS)?;
    for (index, chunk) in row.chunks.iter().enumerate() {
        chunk_index.insert((index as u8, chunk.as_str()), row.id)?;
    }
    Ok(())
}

fn remove_row(write_txn: &WriteTransaction, row: &SimilarityData) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(SIMILARITY_DATA)?;
    table.remove(row.id)?;

    let mut by_post = write_txn.open_multimap_table(SIMILARITY_DATA_BY_POST)?;
    by_post.remove(row.post_id, row.id)?;

    let mut ratio_index = write_txn.open_multimap_table(SIMILARITY_DATA_RATIO)?;
    ratio_index.remove(ratio_key(row.ratio), row.id)?;

    let mut chunk_index = write_txn.open_multimap_table(SIMILARITY_DATA_CHUNKS)?;
    for (index, chunk) in row.chunks.iter().enumerate() {
        chunk_index.remove((index as u8, chunk.as_str()), row.id)?;
    }
    Ok(())
}
