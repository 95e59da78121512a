//! Durable local store for cached entities, the mutation journal, pull
//! checkpoints and image-cache metadata.
//!
//! All writes go through a single writer connection inside an exclusive
//! (`IMMEDIATE`) transaction, so a failed operation leaves no partial state.
//! Reads use a small pool of separate connections over WAL and only ever see
//! committed data.

mod entity;
mod images;
mod query;
pub mod schema;
mod types;

pub use entity::{Entity, Typed};
pub use query::RecordIter;
pub use types::{
  ApplyReport, CachedRecord, ConflictDiscarded, ImageCacheEntry, ImageUsage, MutationLogEntry,
  Operation, RemoteRecord, SyncCheckpoint,
};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::{from_millis, to_millis, SharedClock};
use crate::error::StorageError;

/// Idle reader connections kept around between reads.
const MAX_IDLE_READERS: usize = 4;

const RECORD_COLUMNS: &str =
  "entity_type, id, payload, local_updated_at, remote_updated_at, dirty, last_synced_at";

const JOURNAL_COLUMNS: &str =
  "sequence_id, entity_type, entity_id, operation, snapshot, created_at, synced, discarded";

struct Inner {
  path: PathBuf,
  writer: Mutex<Connection>,
  readers: Mutex<Vec<Connection>>,
  clock: SharedClock,
  /// Bumped after every commit that can change the pending journal
  journal: watch::Sender<u64>,
}

/// Handle to the local store. Cheap to clone; clones share connections.
pub struct LocalStore {
  inner: Arc<Inner>,
  /// How long a dirty record is protected from a newer remote write
  grace_window: Duration,
}

impl Clone for LocalStore {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      grace_window: self.grace_window,
    }
  }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
  StorageError::LockPoisoned(e.to_string())
}

impl LocalStore {
  /// Open or create the store at `path` and replay any unsynced journal
  /// entries left by an interrupted session.
  pub fn open(path: impl AsRef<Path>, clock: SharedClock) -> Result<Self, StorageError> {
    let path = path.as_ref().to_path_buf();

    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(&path)?;
    schema::init_schema(&conn)?;
    let (journal, _) = watch::channel(0);

    let store = Self {
      inner: Arc::new(Inner {
        path,
        writer: Mutex::new(conn),
        readers: Mutex::new(Vec::new()),
        clock,
        journal,
      }),
      grace_window: Duration::minutes(10),
    };

    let replayed = store.replay_unsynced()?;
    if replayed > 0 {
      info!(replayed, "replayed unsynced journal entries");
    }

    Ok(store)
  }

  /// Set the grace window used by the pull conflict policy.
  pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
    self.grace_window = grace_window;
    self
  }

  pub fn grace_window(&self) -> Duration {
    self.grace_window
  }

  pub fn path(&self) -> &Path {
    &self.inner.path
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.inner.clock.now()
  }

  /// Receiver that changes whenever the set of pending journal entries may
  /// have changed: local writes, acknowledgements, discards and resets.
  pub fn journal_changes(&self) -> watch::Receiver<u64> {
    self.inner.journal.subscribe()
  }

  fn journal_changed(&self) {
    self.inner.journal.send_modify(|version| *version = version.wrapping_add(1));
  }

  fn open_reader(&self) -> Result<Connection, StorageError> {
    let conn = Connection::open_with_flags(
      &self.inner.path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
  }

  /// Run `f` against a pooled read-only connection.
  pub(crate) fn read<T>(
    &self,
    f: impl FnOnce(&Connection) -> Result<T, StorageError>,
  ) -> Result<T, StorageError> {
    let pooled = self.inner.readers.lock().map_err(poisoned)?.pop();
    let conn = match pooled {
      Some(conn) => conn,
      None => self.open_reader()?,
    };

    let result = f(&conn);

    if let Ok(mut pool) = self.inner.readers.lock() {
      if pool.len() < MAX_IDLE_READERS {
        pool.push(conn);
      }
    }

    result
  }

  /// Run `f` inside an exclusive write transaction. Any error rolls back.
  pub(crate) fn write<T>(
    &self,
    f: impl FnOnce(&Transaction) -> Result<T, StorageError>,
  ) -> Result<T, StorageError> {
    let mut conn = self.inner.writer.lock().map_err(poisoned)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
  }

  // ==========================================================================
  // Entity reads
  // ==========================================================================

  pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<CachedRecord>, StorageError> {
    self.read(|conn| select_record(conn, entity_type, id))
  }

  /// Lazily iterate the records of `entity_type` that satisfy `predicate`.
  ///
  /// Each call starts a fresh scan; rows are fetched in pages ordered by id.
  pub fn query<P>(&self, entity_type: &str, predicate: P) -> RecordIter<'_, P>
  where
    P: FnMut(&CachedRecord) -> bool,
  {
    RecordIter::new(self, entity_type, predicate)
  }

  pub fn records(&self, entity_type: &str) -> Result<Vec<CachedRecord>, StorageError> {
    self.query(entity_type, |_| true).collect()
  }

  pub fn get_typed<T: Entity>(&self, id: &str) -> Result<Option<Typed<T>>, StorageError> {
    self
      .get(T::entity_type(), id)?
      .map(Typed::decode)
      .transpose()
  }

  /// Entity types known locally, from records, the journal or checkpoints.
  pub fn entity_types(&self) -> Result<Vec<String>, StorageError> {
    self.read(|conn| {
      let mut stmt = conn.prepare(
        "SELECT entity_type FROM records
         UNION SELECT entity_type FROM journal
         UNION SELECT entity_type FROM checkpoints
         ORDER BY 1",
      )?;
      let types = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
      Ok(types)
    })
  }

  // ==========================================================================
  // Local writes
  // ==========================================================================

  /// Write `payload`, mark the record dirty and journal the change, atomically.
  pub fn put(
    &self,
    entity_type: &str,
    id: &str,
    payload: Value,
  ) -> Result<MutationLogEntry, StorageError> {
    let now = self.now();
    let snapshot = serde_json::to_string(&payload)?;

    let entry = self.write(|tx| {
      let existed = tx
        .query_row(
          "SELECT 1 FROM records WHERE entity_type = ?1 AND id = ?2",
          params![entity_type, id],
          |_| Ok(()),
        )
        .optional()?
        .is_some();

      tx.execute(
        "INSERT INTO records (entity_type, id, payload, local_updated_at, dirty)
         VALUES (?1, ?2, ?3, ?4, 1)
         ON CONFLICT (entity_type, id) DO UPDATE SET
           payload = excluded.payload,
           local_updated_at = excluded.local_updated_at,
           dirty = 1",
        params![entity_type, id, snapshot, to_millis(now)],
      )?;

      let operation = if existed {
        Operation::Update
      } else {
        Operation::Create
      };
      append_journal(tx, entity_type, id, operation, &snapshot, payload, now)
    })?;

    debug!(entity_type, id, seq = entry.sequence_id, op = entry.operation.as_str(), "local write");
    self.journal_changed();
    Ok(entry)
  }

  pub fn put_typed<T: Entity>(&self, value: &T) -> Result<MutationLogEntry, StorageError> {
    let payload = serde_json::to_value(value)?;
    self.put(T::entity_type(), &value.entity_id(), payload)
  }

  /// Remove the record and journal the delete. Returns `None` when there was
  /// nothing to delete.
  pub fn delete(
    &self,
    entity_type: &str,
    id: &str,
  ) -> Result<Option<MutationLogEntry>, StorageError> {
    let now = self.now();

    let entry = self.write(|tx| {
      let Some(current) = select_record(tx, entity_type, id)? else {
        return Ok(None);
      };

      tx.execute(
        "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
        params![entity_type, id],
      )?;

      let snapshot = serde_json::to_string(&current.payload)?;
      append_journal(
        tx,
        entity_type,
        id,
        Operation::Delete,
        &snapshot,
        current.payload,
        now,
      )
      .map(Some)
    })?;

    if let Some(entry) = &entry {
      debug!(entity_type, id, seq = entry.sequence_id, "local delete");
      self.journal_changed();
    }
    Ok(entry)
  }

  // ==========================================================================
  // Journal
  // ==========================================================================

  /// Unsynced, undiscarded journal entries in `sequence_id` order.
  pub fn pending_mutations(&self, limit: usize) -> Result<Vec<MutationLogEntry>, StorageError> {
    self.read(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM journal
         WHERE synced = 0 AND discarded = 0
         ORDER BY sequence_id
         LIMIT ?1"
      ))?;
      let mut rows = stmt.query(params![limit as i64])?;
      let mut entries = Vec::new();
      while let Some(row) = rows.next()? {
        entries.push(journal_from_row(row)?);
      }
      Ok(entries)
    })
  }

  pub fn pending_count(&self) -> Result<u64, StorageError> {
    self.read(|conn| {
      let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM journal WHERE synced = 0 AND discarded = 0",
        [],
        |row| row.get(0),
      )?;
      Ok(count as u64)
    })
  }

  pub fn journal_entry(&self, sequence_id: i64) -> Result<Option<MutationLogEntry>, StorageError> {
    self.read(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM journal WHERE sequence_id = ?1"
      ))?;
      let mut rows = stmt.query(params![sequence_id])?;
      match rows.next()? {
        Some(row) => Ok(Some(journal_from_row(row)?)),
        None => Ok(None),
      }
    })
  }

  /// Mark acknowledged entries synced and clear `dirty` on every record that
  /// has no pending entries left. Marking an entry twice is harmless.
  pub fn mark_synced(&self, sequence_ids: &[i64]) -> Result<usize, StorageError> {
    if sequence_ids.is_empty() {
      return Ok(0);
    }
    let now = to_millis(self.now());

    let marked = self.write(|tx| {
      let mut marked = 0;
      let mut touched: Vec<(String, String)> = Vec::new();

      for seq in sequence_ids {
        marked += tx.execute(
          "UPDATE journal SET synced = 1
           WHERE sequence_id = ?1 AND synced = 0 AND discarded = 0",
          params![seq],
        )?;

        let key: Option<(String, String)> = tx
          .query_row(
            "SELECT entity_type, entity_id FROM journal WHERE sequence_id = ?1",
            params![seq],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;
        if let Some(key) = key {
          if !touched.contains(&key) {
            touched.push(key);
          }
        }
      }

      for (entity_type, id) in &touched {
        if !has_pending(tx, entity_type, id)? {
          tx.execute(
            "UPDATE records SET dirty = 0, last_synced_at = ?3
             WHERE entity_type = ?1 AND id = ?2",
            params![entity_type, id, now],
          )?;
        }
      }

      Ok(marked)
    })?;

    if marked > 0 {
      self.journal_changed();
    }
    Ok(marked)
  }

  /// Purge synced or discarded entries created before `older_than`.
  pub fn compact_journal(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
    let purged = self.write(|tx| {
      Ok(tx.execute(
        "DELETE FROM journal WHERE (synced = 1 OR discarded = 1) AND created_at < ?1",
        params![to_millis(older_than)],
      )?)
    })?;
    if purged > 0 {
      debug!(purged, "compacted mutation journal");
    }
    Ok(purged)
  }

  /// Re-apply every unsynced journal snapshot to the entity table.
  ///
  /// Applying the same entries any number of times yields the same state.
  pub fn replay_unsynced(&self) -> Result<usize, StorageError> {
    self.write(|tx| {
      let entries = {
        let mut stmt = tx.prepare(&format!(
          "SELECT {JOURNAL_COLUMNS} FROM journal
           WHERE synced = 0 AND discarded = 0
           ORDER BY sequence_id"
        ))?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
          entries.push(journal_from_row(row)?);
        }
        entries
      };

      for entry in &entries {
        match entry.operation {
          Operation::Create | Operation::Update => {
            tx.execute(
              "INSERT INTO records (entity_type, id, payload, local_updated_at, dirty)
               VALUES (?1, ?2, ?3, ?4, 1)
               ON CONFLICT (entity_type, id) DO UPDATE SET
                 payload = excluded.payload,
                 local_updated_at = MAX(local_updated_at, excluded.local_updated_at),
                 dirty = 1",
              params![
                entry.entity_type,
                entry.entity_id,
                serde_json::to_string(&entry.snapshot)?,
                to_millis(entry.created_at),
              ],
            )?;
          }
          Operation::Delete => {
            tx.execute(
              "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
              params![entry.entity_type, entry.entity_id],
            )?;
          }
        }
      }

      Ok(entries.len())
    })
  }

  // ==========================================================================
  // Pull merge
  // ==========================================================================

  pub fn checkpoint(&self, entity_type: &str) -> Result<Option<SyncCheckpoint>, StorageError> {
    self.read(|conn| {
      let at: Option<i64> = conn
        .query_row(
          "SELECT last_pulled_at FROM checkpoints WHERE entity_type = ?1",
          params![entity_type],
          |row| row.get(0),
        )
        .optional()?;
      Ok(at.map(|ms| SyncCheckpoint {
        entity_type: entity_type.to_string(),
        last_pulled_at: from_millis(ms),
      }))
    })
  }

  /// Merge a pull batch under the grace-window conflict policy and advance
  /// the checkpoint, in one transaction.
  ///
  /// `checkpoint` overrides the watermark derived from the batch. Either way
  /// it never moves past a deferred record, so that record is pulled again,
  /// and it never moves backwards.
  pub fn apply_remote_batch(
    &self,
    entity_type: &str,
    records: &[RemoteRecord],
    checkpoint: Option<DateTime<Utc>>,
  ) -> Result<ApplyReport, StorageError> {
    let now = self.now();
    let grace_window = self.grace_window;

    let report = self.write(|tx| {
      let mut report = ApplyReport::default();
      let mut oldest_deferred: Option<DateTime<Utc>> = None;

      for remote in records {
        let local = select_record(tx, entity_type, &remote.id)?;
        let last_local_edit = last_pending_edit(tx, entity_type, &remote.id)?;
        let dirty = local.as_ref().map(|r| r.dirty).unwrap_or(false) || last_local_edit.is_some();

        if !dirty {
          apply_remote(tx, entity_type, remote, local.is_some(), now)?;
          report.count_applied(remote, local.is_some());
          continue;
        }

        let local_edit_at = last_local_edit
          .or_else(|| local.as_ref().map(|r| r.local_updated_at))
          .unwrap_or(now);

        if remote.updated_at > local_edit_at && now - local_edit_at > grace_window {
          let discarded_payload = match &local {
            Some(record) => record.payload.clone(),
            None => last_pending_snapshot(tx, entity_type, &remote.id)?.unwrap_or(Value::Null),
          };

          tx.execute(
            "UPDATE journal SET discarded = 1
             WHERE entity_type = ?1 AND entity_id = ?2 AND synced = 0 AND discarded = 0",
            params![entity_type, remote.id],
          )?;
          apply_remote(tx, entity_type, remote, local.is_some(), now)?;

          warn!(
            entity_type,
            id = %remote.id,
            local_updated_at = %local_edit_at,
            remote_updated_at = %remote.updated_at,
            "remote write supersedes stale local edit, local change discarded"
          );
          report.conflicts.push(ConflictDiscarded {
            entity_type: entity_type.to_string(),
            entity_id: remote.id.clone(),
            discarded_payload,
            local_updated_at: local_edit_at,
            remote_updated_at: remote.updated_at,
          });
          report.count_applied(remote, local.is_some());
        } else {
          debug!(entity_type, id = %remote.id, "deferring remote change, local edit in flight");
          report.deferred.push(remote.id.clone());
          oldest_deferred = Some(match oldest_deferred {
            Some(t) if t <= remote.updated_at => t,
            _ => remote.updated_at,
          });
        }
      }

      let mut watermark = checkpoint.or_else(|| records.iter().map(|r| r.updated_at).max());
      if let (Some(mark), Some(deferred)) = (watermark, oldest_deferred) {
        let limit = deferred - Duration::milliseconds(1);
        if limit < mark {
          watermark = Some(limit);
        }
      }

      if let Some(mark) = watermark {
        tx.execute(
          "INSERT INTO checkpoints (entity_type, last_pulled_at) VALUES (?1, ?2)
           ON CONFLICT (entity_type) DO UPDATE SET
             last_pulled_at = MAX(last_pulled_at, excluded.last_pulled_at)",
          params![entity_type, to_millis(mark)],
        )?;
        let stored: i64 = tx.query_row(
          "SELECT last_pulled_at FROM checkpoints WHERE entity_type = ?1",
          params![entity_type],
          |row| row.get(0),
        )?;
        report.checkpoint = Some(from_millis(stored));
      }

      Ok(report)
    })?;

    debug!(
      entity_type,
      applied = report.applied,
      deleted = report.deleted,
      deferred = report.deferred.len(),
      conflicts = report.conflicts.len(),
      "merged remote batch"
    );
    if !report.conflicts.is_empty() {
      self.journal_changed();
    }
    Ok(report)
  }

  // ==========================================================================
  // Maintenance
  // ==========================================================================

  /// Run SQLite's integrity check. A failure means the cache should be reset.
  pub fn integrity_check(&self) -> Result<(), StorageError> {
    let result: String = self.read(|conn| {
      Ok(conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?)
    })?;
    if result == "ok" {
      Ok(())
    } else {
      error!(%result, "local cache failed integrity check");
      Err(StorageError::Corrupt(result))
    }
  }

  /// Drop every cached record, journal entry, checkpoint and image entry.
  ///
  /// Journal sequence numbers keep counting up so the remote never sees a
  /// reused `sequence_id`.
  pub fn reset(&self) -> Result<(), StorageError> {
    self.write(|tx| {
      for table in schema::TABLES {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
      }
      Ok(())
    })?;
    warn!(path = %self.inner.path.display(), "local cache reset");
    self.journal_changed();
    Ok(())
  }
}

// ============================================================================
// Row helpers
// ============================================================================

fn select_record(
  conn: &Connection,
  entity_type: &str,
  id: &str,
) -> Result<Option<CachedRecord>, StorageError> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ?1 AND id = ?2"
  ))?;
  let mut rows = stmt.query(params![entity_type, id])?;
  match rows.next()? {
    Some(row) => Ok(Some(record_from_row(row)?)),
    None => Ok(None),
  }
}

pub(crate) fn record_from_row(row: &Row) -> Result<CachedRecord, StorageError> {
  let payload: String = row.get(2)?;
  let remote_updated_at: Option<i64> = row.get(4)?;
  let last_synced_at: Option<i64> = row.get(6)?;

  Ok(CachedRecord {
    entity_type: row.get(0)?,
    id: row.get(1)?,
    payload: serde_json::from_str(&payload)?,
    local_updated_at: from_millis(row.get(3)?),
    remote_updated_at: remote_updated_at.map(from_millis),
    dirty: row.get(5)?,
    last_synced_at: last_synced_at.map(from_millis),
  })
}

fn journal_from_row(row: &Row) -> Result<MutationLogEntry, StorageError> {
  let operation: String = row.get(3)?;
  let snapshot: String = row.get(4)?;

  Ok(MutationLogEntry {
    sequence_id: row.get(0)?,
    entity_type: row.get(1)?,
    entity_id: row.get(2)?,
    operation: Operation::parse(&operation)?,
    snapshot: serde_json::from_str(&snapshot)?,
    created_at: from_millis(row.get(5)?),
    synced: row.get(6)?,
    discarded: row.get(7)?,
  })
}

fn append_journal(
  tx: &Transaction,
  entity_type: &str,
  id: &str,
  operation: Operation,
  snapshot_json: &str,
  snapshot: Value,
  now: DateTime<Utc>,
) -> Result<MutationLogEntry, StorageError> {
  tx.execute(
    "INSERT INTO journal (entity_type, entity_id, operation, snapshot, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![entity_type, id, operation.as_str(), snapshot_json, to_millis(now)],
  )?;

  Ok(MutationLogEntry {
    sequence_id: tx.last_insert_rowid(),
    entity_type: entity_type.to_string(),
    entity_id: id.to_string(),
    operation,
    snapshot,
    created_at: from_millis(to_millis(now)),
    synced: false,
    discarded: false,
  })
}

fn has_pending(tx: &Transaction, entity_type: &str, id: &str) -> Result<bool, StorageError> {
  Ok(tx.query_row(
    "SELECT EXISTS (
       SELECT 1 FROM journal
       WHERE entity_type = ?1 AND entity_id = ?2 AND synced = 0 AND discarded = 0
     )",
    params![entity_type, id],
    |row| row.get(0),
  )?)
}

/// Time of the newest pending local edit of a record, if any.
fn last_pending_edit(
  tx: &Transaction,
  entity_type: &str,
  id: &str,
) -> Result<Option<DateTime<Utc>>, StorageError> {
  let at: Option<i64> = tx.query_row(
    "SELECT MAX(created_at) FROM journal
     WHERE entity_type = ?1 AND entity_id = ?2 AND synced = 0 AND discarded = 0",
    params![entity_type, id],
    |row| row.get(0),
  )?;
  Ok(at.map(from_millis))
}

fn last_pending_snapshot(
  tx: &Transaction,
  entity_type: &str,
  id: &str,
) -> Result<Option<Value>, StorageError> {
  let snapshot: Option<String> = tx
    .query_row(
      "SELECT snapshot FROM journal
       WHERE entity_type = ?1 AND entity_id = ?2 AND synced = 0 AND discarded = 0
       ORDER BY sequence_id DESC LIMIT 1",
      params![entity_type, id],
      |row| row.get(0),
    )
    .optional()?;
  snapshot
    .map(|s| serde_json::from_str(&s).map_err(StorageError::from))
    .transpose()
}

fn apply_remote(
  tx: &Transaction,
  entity_type: &str,
  remote: &RemoteRecord,
  exists: bool,
  now: DateTime<Utc>,
) -> Result<(), StorageError> {
  if remote.deleted {
    if exists {
      tx.execute(
        "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
        params![entity_type, remote.id],
      )?;
    }
    return Ok(());
  }

  tx.execute(
    "INSERT INTO records
       (entity_type, id, payload, local_updated_at, remote_updated_at, dirty, last_synced_at)
     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?4)
     ON CONFLICT (entity_type, id) DO UPDATE SET
       payload = excluded.payload,
       remote_updated_at = excluded.remote_updated_at,
       dirty = 0,
       last_synced_at = excluded.last_synced_at",
    params![
      entity_type,
      remote.id,
      serde_json::to_string(&remote.payload)?,
      to_millis(now),
      to_millis(remote.updated_at),
    ],
  )?;
  Ok(())
}

#[cfg(test)]
mod tests;
