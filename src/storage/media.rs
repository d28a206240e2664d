use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{get_record, next_id, put_record, Database, DatabaseError};
use super::models::MediaFile;
use super::tables::*;

impl Database {
    // ========================================================================
    // Media cache operations
    // ========================================================================

    pub fn get_media_by_url(&self, url: &str) -> Result<Option<MediaFile>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let by_url = read_txn.open_table(MEDIA_FILES_BY_URL)?;
        let id = match by_url.get(url)? {
            Some(id) => id.value(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(MEDIA_FILES)?;
        get_record(&table, id)
    }

    /// Insert or refresh the cache row for `media_url`. An existing row keeps
    /// its id.
    pub fn put_media_file(
        &self,
        media_url: &str,
        md5: &str,
        file_ext: &str,
        expires: DateTime<Utc>,
    ) -> Result<MediaFile, DatabaseError> {
        let write_txn = self.begin_write()?;
        let existing = {
            let by_url = write_txn.open_table(MEDIA_FILES_BY_URL)?;
            let id = by_url.get(media_url)?.map(|v| v.value());
            id
        };
        let id = match existing {
            Some(id) => id,
            None => next_id(&write_txn, "media_files")?,
        };

        let media = MediaFile {
            id,
            md5: md5.to_string(),
            file_ext: file_ext.to_string(),
            media_url: media_url.to_string(),
            expires,
        };
        {
            let mut table = write_txn.open_table(MEDIA_FILES)?;
            put_record(&mut table, id, &media)?;
            let mut by_url = write_txn.open_table(MEDIA_FILES_BY_URL)?;
            by_url.insert(media_url, id)?;
        }
        write_txn.commit()?;
        Ok(media)
    }

    /// Rows whose expiry is at or before `now`
    pub fn expired_media_files(&self, now: DateTime<Utc>) -> Result<Vec<MediaFile>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MEDIA_FILES)?;

        let mut expired = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let media: MediaFile = rmp_serde::from_slice(value.value())?;
            if media.is_expired(now) {
                expired.push(media);
            }
        }
        Ok(expired)
    }

    /// Whether any live row other than `except_id` still points at `md5`
    pub fn media_digest_in_use(&self, md5: &str, except_id: u64) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MEDIA_FILES)?;

        for result in table.iter()? {
            let (key, value) = result?;
            if key.value() == except_id {
                continue;
            }
            let media: MediaFile = rmp_serde::from_slice(value.value())?;
            if media.md5 == md5 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn delete_media_file(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(MEDIA_FILES)?;
            let media: Option<MediaFile> = get_record(&table, id)?;
            match media {
                Some(media) => {
                    table.remove(id)?;
                    let mut by_url = write_txn.open_table(MEDIA_FILES_BY_URL)?;
                    by_url.remove(media.media_url.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
