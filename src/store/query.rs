use rusqlite::params;
use std::collections::VecDeque;

use super::{record_from_row, CachedRecord, LocalStore, RECORD_COLUMNS};
use crate::error::StorageError;

const PAGE_SIZE: i64 = 64;

/// Lazy scan over one entity type, filtered by a predicate.
///
/// Rows are loaded a page at a time using the last seen id as a cursor, so a
/// scan never holds a read transaction open between pages. The scan ends after
/// the last page; a storage error is yielded once and ends it as well.
pub struct RecordIter<'a, P> {
  store: &'a LocalStore,
  entity_type: String,
  predicate: P,
  cursor: Option<String>,
  page: VecDeque<CachedRecord>,
  exhausted: bool,
}

impl<'a, P> RecordIter<'a, P>
where
  P: FnMut(&CachedRecord) -> bool,
{
  pub(super) fn new(store: &'a LocalStore, entity_type: &str, predicate: P) -> Self {
    Self {
      store,
      entity_type: entity_type.to_string(),
      predicate,
      cursor: None,
      page: VecDeque::new(),
      exhausted: false,
    }
  }

  fn load_page(&self) -> Result<Vec<CachedRecord>, StorageError> {
    self.store.read(|conn| {
      let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM records
         WHERE entity_type = ?1 AND (?2 IS NULL OR id > ?2)
         ORDER BY id
         LIMIT ?3"
      ))?;
      let mut rows = stmt.query(params![self.entity_type, self.cursor, PAGE_SIZE])?;
      let mut page = Vec::new();
      while let Some(row) = rows.next()? {
        page.push(record_from_row(row)?);
      }
      Ok(page)
    })
  }
}

impl<P> Iterator for RecordIter<'_, P>
where
  P: FnMut(&CachedRecord) -> bool,
{
  type Item = Result<CachedRecord, StorageError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      while let Some(record) = self.page.pop_front() {
        if (self.predicate)(&record) {
          return Some(Ok(record));
        }
      }

      if self.exhausted {
        return None;
      }

      match self.load_page() {
        Ok(rows) => {
          if (rows.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
          }
          if let Some(last) = rows.last() {
            self.cursor = Some(last.id.clone());
          }
          self.page.extend(rows);
        }
        Err(e) => {
          self.exhausted = true;
          return Some(Err(e));
        }
      }
    }
  }
}
