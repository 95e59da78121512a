use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

/// Connection pragmas shared by the writer and every reader.
pub fn configure(conn: &Connection) -> Result<(), StorageError> {
  conn.execute_batch(
    "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
  ",
  )?;
  Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
  configure(conn)?;
  conn.execute_batch(SCHEMA_SQL)?;
  Ok(())
}

/// Tables owned by the cache subsystem, in the order `reset` clears them.
pub const TABLES: &[&str] = &["journal", "records", "checkpoints", "images"];

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

-- One row per (entity_type, id); payload is opaque JSON
CREATE TABLE IF NOT EXISTS records (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    payload TEXT NOT NULL,
    local_updated_at INTEGER NOT NULL,
    remote_updated_at INTEGER,
    dirty INTEGER NOT NULL DEFAULT 0 CHECK (dirty IN (0, 1)),
    last_synced_at INTEGER,
    PRIMARY KEY (entity_type, id)
);

CREATE INDEX IF NOT EXISTS idx_records_dirty
    ON records(entity_type, dirty);

-- Append-only mutation journal
CREATE TABLE IF NOT EXISTS journal (
    sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
    snapshot TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0 CHECK (synced IN (0, 1)),
    discarded INTEGER NOT NULL DEFAULT 0 CHECK (discarded IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_journal_pending
    ON journal(synced, discarded, sequence_id);
CREATE INDEX IF NOT EXISTS idx_journal_entity
    ON journal(entity_type, entity_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    entity_type TEXT PRIMARY KEY,
    last_pulled_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    url TEXT PRIMARY KEY,
    local_path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    cached_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    is_permanent INTEGER NOT NULL DEFAULT 0 CHECK (is_permanent IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_images_lru
    ON images(is_permanent, last_accessed_at, cached_at);
"#;
