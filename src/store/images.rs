//! Image-cache metadata table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;

use super::{ImageCacheEntry, ImageUsage, LocalStore};
use crate::clock::{from_millis, to_millis};
use crate::error::StorageError;

const IMAGE_COLUMNS: &str = "url, local_path, size_bytes, cached_at, last_accessed_at, is_permanent";

impl LocalStore {
  pub fn image_entry(&self, url: &str) -> Result<Option<ImageCacheEntry>, StorageError> {
    self.read(|conn| select_image(conn, url))
  }

  pub fn upsert_image(&self, entry: &ImageCacheEntry) -> Result<(), StorageError> {
    self.write(|tx| {
      tx.execute(
        "INSERT INTO images (url, local_path, size_bytes, cached_at, last_accessed_at, is_permanent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (url) DO UPDATE SET
           local_path = excluded.local_path,
           size_bytes = excluded.size_bytes,
           cached_at = excluded.cached_at,
           last_accessed_at = excluded.last_accessed_at,
           is_permanent = MAX(is_permanent, excluded.is_permanent)",
        params![
          entry.url,
          entry.local_path.to_string_lossy().into_owned(),
          entry.size_bytes as i64,
          to_millis(entry.cached_at),
          to_millis(entry.last_accessed_at),
          entry.is_permanent,
        ],
      )?;
      Ok(())
    })
  }

  /// Record a cache hit and return the refreshed entry.
  pub fn touch_image(&self, url: &str) -> Result<Option<ImageCacheEntry>, StorageError> {
    let now = to_millis(self.now());
    self.write(|tx| {
      tx.execute(
        "UPDATE images SET last_accessed_at = MAX(last_accessed_at, ?2) WHERE url = ?1",
        params![url, now],
      )?;
      select_image(tx, url)
    })
  }

  /// Returns false when no entry exists for `url`.
  pub fn set_image_permanent(&self, url: &str, permanent: bool) -> Result<bool, StorageError> {
    self.write(|tx| {
      let changed = tx.execute(
        "UPDATE images SET is_permanent = ?2 WHERE url = ?1",
        params![url, permanent],
      )?;
      Ok(changed > 0)
    })
  }

  pub fn remove_image(&self, url: &str) -> Result<Option<ImageCacheEntry>, StorageError> {
    self.write(|tx| {
      let entry = select_image(tx, url)?;
      if entry.is_some() {
        tx.execute("DELETE FROM images WHERE url = ?1", params![url])?;
      }
      Ok(entry)
    })
  }

  pub fn image_entries(&self) -> Result<Vec<ImageCacheEntry>, StorageError> {
    self.read(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images ORDER BY last_accessed_at, cached_at, url"
      ))?;
      let mut rows = stmt.query([])?;
      let mut entries = Vec::new();
      while let Some(row) = rows.next()? {
        entries.push(image_from_row(row)?);
      }
      Ok(entries)
    })
  }

  pub fn image_usage(&self) -> Result<ImageUsage, StorageError> {
    self.read(|conn| {
      Ok(conn.query_row(
        "SELECT
           COUNT(*),
           COALESCE(SUM(size_bytes), 0),
           COALESCE(SUM(CASE WHEN is_permanent = 0 THEN size_bytes ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN is_permanent = 1 THEN size_bytes ELSE 0 END), 0)
         FROM images",
        [],
        |row| {
          Ok(ImageUsage {
            entries: row.get::<_, i64>(0)? as u64,
            total_bytes: row.get::<_, i64>(1)? as u64,
            evictable_bytes: row.get::<_, i64>(2)? as u64,
            pinned_bytes: row.get::<_, i64>(3)? as u64,
          })
        },
      )?)
    })
  }

  /// Remove least recently accessed unpinned entries until the unpinned total
  /// fits in `cap_bytes`. Returns the removed entries so the caller can delete
  /// their files. Pinned entries and `keep` are never selected, even when
  /// they alone exceed the cap.
  pub fn evict_images(
    &self,
    cap_bytes: u64,
    keep: Option<&str>,
  ) -> Result<Vec<ImageCacheEntry>, StorageError> {
    self.write(|tx| {
      let mut evicted = Vec::new();

      loop {
        let evictable: i64 = tx.query_row(
          "SELECT COALESCE(SUM(size_bytes), 0) FROM images WHERE is_permanent = 0",
          [],
          |row| row.get(0),
        )?;
        if evictable as u64 <= cap_bytes {
          break;
        }

        let victim = {
          let mut stmt = tx.prepare_cached(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE is_permanent = 0 AND (?1 IS NULL OR url <> ?1)
             ORDER BY last_accessed_at, cached_at, url
             LIMIT 1"
          ))?;
          let mut rows = stmt.query(params![keep])?;
          match rows.next()? {
            Some(row) => image_from_row(row)?,
            None => break,
          }
        };

        tx.execute("DELETE FROM images WHERE url = ?1", params![victim.url])?;
        evicted.push(victim);
      }

      Ok(evicted)
    })
  }
}

fn select_image(conn: &Connection, url: &str) -> Result<Option<ImageCacheEntry>, StorageError> {
  let mut stmt = conn.prepare_cached(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE url = ?1"))?;
  stmt
    .query_row(params![url], |row| Ok(image_from_row(row)))
    .optional()?
    .transpose()
}

fn image_from_row(row: &Row) -> Result<ImageCacheEntry, StorageError> {
  let local_path: String = row.get(1)?;
  Ok(ImageCacheEntry {
    url: row.get(0)?,
    local_path: PathBuf::from(local_path),
    size_bytes: row.get::<_, i64>(2)? as u64,
    cached_at: from_millis(row.get(3)?),
    last_accessed_at: from_millis(row.get(4)?),
    is_permanent: row.get(5)?,
  })
}
