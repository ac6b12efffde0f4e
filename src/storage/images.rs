use chrono::{SubsecRound, Utc};
use redb::{ReadTransaction, ReadableTable};

use super::db::{Database, DatabaseError};
use super::models::{ImageRecord, PageCursor};
use super::tables::*;

/// One page of the newest-first listing.
#[derive(Debug, Clone)]
pub struct ImagePage {
    pub items: Vec<ImageRecord>,
    /// Present when more records follow the last item.
    pub next_cursor: Option<PageCursor>,
}

impl Database {
    // ========================================================================
    // Image record operations
    // ========================================================================

    /// Insert a new record with a generated id and timestamps.
    pub fn create_image(
        &self,
        original_path: &str,
        processed_path: &str,
        scope_id: Option<&str>,
    ) -> Result<ImageRecord, DatabaseError> {
        debug_assert!(!original_path.is_empty(), "original path must not be empty");
        debug_assert!(!processed_path.is_empty(), "processed path must not be empty");

        // Microsecond precision keeps page cursors exact.
        let now = Utc::now().trunc_subsecs(6);
        let record = ImageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            original_path: original_path.to_string(),
            processed_path: processed_path.to_string(),
            scope_id: scope_id.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
        };
        let micros = record.created_at.timestamp_micros();

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(IMAGES)?;
            let data = rmp_serde::to_vec_named(&record)?;
            table.insert(record.id.as_str(), data.as_slice())?;

            let mut by_created = write_txn.open_table(IMAGES_BY_CREATED)?;
            by_created.insert((micros, record.id.as_str()), ())?;

            if let Some(ref scope_id) = record.scope_id {
                let mut scoped = write_txn.open_table(SCOPE_IMAGES_BY_CREATED)?;
                scoped.insert((scope_id.as_str(), micros, record.id.as_str()), ())?;
            }
        }
        write_txn.commit()?;

        tracing::debug!(image_id = %record.id, scope_id = ?record.scope_id, "Created image record");
        Ok(record)
    }

    /// Get a record by id
    pub fn get_image(&self, id: &str) -> Result<Option<ImageRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(IMAGES)?;

        match table.get(id)? {
            Some(data) => {
                let record: ImageRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records, optionally restricted to one scope, newest first.
    pub fn list_images(&self, scope_id: Option<&str>) -> Result<Vec<ImageRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let ids = newest_ids(&read_txn, scope_id, None, usize::MAX)?;
        load_records(&read_txn, &ids)
    }

    /// Cursor-paginated variant of [`Database::list_images`].
    ///
    /// Walks the creation index backwards from the cursor and reads at most
    /// `limit + 1` entries.
    pub fn list_images_page(
        &self,
        scope_id: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<ImagePage, DatabaseError> {
        let read_txn = self.begin_read()?;
        let ids = newest_ids(&read_txn, scope_id, cursor, limit.saturating_add(1))?;
        let mut items = load_records(&read_txn, &ids)?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(PageCursor::for_record)
        } else {
            None
        };

        Ok(ImagePage { items, next_cursor })
    }

    /// Delete a record by id and return it. A missing id is `DatabaseError::NotFound`.
    pub fn delete_image(&self, id: &str) -> Result<ImageRecord, DatabaseError> {
        let write_txn = self.begin_write()?;

        let removed: Option<ImageRecord> = {
            let mut table = write_txn.open_table(IMAGES)?;
            let result = match table.remove(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        let Some(record) = removed else {
            write_txn.abort()?;
            return Err(DatabaseError::NotFound(id.to_string()));
        };

        {
            let micros = record.created_at.timestamp_micros();
            let mut by_created = write_txn.open_table(IMAGES_BY_CREATED)?;
            by_created.remove((micros, id))?;

            if let Some(ref scope_id) = record.scope_id {
                let mut scoped = write_txn.open_table(SCOPE_IMAGES_BY_CREATED)?;
                scoped.remove((scope_id.as_str(), micros, id))?;
            }
        }
        write_txn.commit()?;

        tracing::debug!(image_id = %id, "Deleted image record");
        Ok(record)
    }

    /// Delete every record in a scope. Returns the number of records removed.
    pub fn delete_images_by_scope(&self, scope_id: &str) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;

        let mut deleted = 0;
        {
            let mut scoped = write_txn.open_table(SCOPE_IMAGES_BY_CREATED)?;
            let mut entries: Vec<(i64, String)> = Vec::new();
            for entry in scoped.range((scope_id, i64::MIN, "")..=(scope_id, i64::MAX, ""))? {
                let (key, _) = entry?;
                let (_, micros, id) = key.value();
                entries.push((micros, id.to_string()));
            }

            let mut table = write_txn.open_table(IMAGES)?;
            let mut by_created = write_txn.open_table(IMAGES_BY_CREATED)?;
            for (micros, id) in &entries {
                scoped.remove((scope_id, *micros, id.as_str()))?;
                by_created.remove((*micros, id.as_str()))?;
                if table.remove(id.as_str())?.is_some() {
                    deleted += 1;
                }
            }
        }
        write_txn.commit()?;

        tracing::debug!(scope_id = %scope_id, deleted, "Deleted image records for scope");
        Ok(deleted)
    }
}

/// Record ids in newest-first order, strictly after `cursor` when given.
fn newest_ids(
    read_txn: &ReadTransaction,
    scope_id: Option<&str>,
    cursor: Option<&PageCursor>,
    limit: usize,
) -> Result<Vec<String>, DatabaseError> {
    let (upper_micros, upper_id) = match cursor {
        Some(c) => (c.created_at.timestamp_micros(), c.id.as_str()),
        // Nothing is ever created at i64::MAX micros, so the exclusive bound covers everything.
        None => (i64::MAX, ""),
    };

    let mut ids = Vec::new();
    match scope_id {
        Some(scope_id) => {
            let index = read_txn.open_table(SCOPE_IMAGES_BY_CREATED)?;
            let range =
                index.range((scope_id, i64::MIN, "")..(scope_id, upper_micros, upper_id))?;
            for entry in range.rev().take(limit) {
                let (key, _) = entry?;
                ids.push(key.value().2.to_string());
            }
        }
        None => {
            let index = read_txn.open_table(IMAGES_BY_CREATED)?;
            for entry in index.range(..(upper_micros, upper_id))?.rev().take(limit) {
                let (key, _) = entry?;
                ids.push(key.value().1.to_string());
            }
        }
    }
    Ok(ids)
}

fn load_records(
    read_txn: &ReadTransaction,
    ids: &[String],
) -> Result<Vec<ImageRecord>, DatabaseError> {
    let table = read_txn.open_table(IMAGES)?;
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(data) = table.get(id.as_str())? {
            records.push(rmp_serde::from_slice::<ImageRecord>(data.value())?);
        }
    }
    Ok(records)
}
