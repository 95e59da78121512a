//! Rows persisted by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::StorageError;

/// A locally cached copy of a remote document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRecord {
  pub id: String,
  pub entity_type: String,
  /// Domain fields, never interpreted by the cache
  pub payload: Value,
  pub local_updated_at: DateTime<Utc>,
  /// Last known remote write time, absent for records created locally
  pub remote_updated_at: Option<DateTime<Utc>>,
  /// Local mutation not yet acknowledged by the remote
  pub dirty: bool,
  pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Create,
  Update,
  Delete,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Result<Self, StorageError> {
    match s {
      "create" => Ok(Self::Create),
      "update" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      _ => Err(StorageError::Serialization(format!(
        "unknown journal operation: {s}"
      ))),
    }
  }
}

/// One pending (or acknowledged) local change in the mutation journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationLogEntry {
  /// Monotonic, assigned by the store
  pub sequence_id: i64,
  pub entity_type: String,
  pub entity_id: String,
  pub operation: Operation,
  /// Payload at the time of the mutation (last known payload for deletes)
  pub snapshot: Value,
  pub created_at: DateTime<Utc>,
  pub synced: bool,
  /// Superseded by a remote write under the grace-window policy
  pub discarded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncCheckpoint {
  pub entity_type: String,
  pub last_pulled_at: DateTime<Utc>,
}

/// A record as delivered by the remote store's pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
  pub id: String,
  #[serde(default)]
  pub payload: Value,
  pub updated_at: DateTime<Utc>,
  /// Remote tombstone
  #[serde(default)]
  pub deleted: bool,
}

/// A local mutation that lost to a newer remote write.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDiscarded {
  pub entity_type: String,
  pub entity_id: String,
  pub discarded_payload: Value,
  pub local_updated_at: DateTime<Utc>,
  pub remote_updated_at: DateTime<Utc>,
}

/// Outcome of merging one pull batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
  pub applied: usize,
  pub deleted: usize,
  /// Remote changes held back because a local edit is still in flight
  pub deferred: Vec<String>,
  pub conflicts: Vec<ConflictDiscarded>,
  pub checkpoint: Option<DateTime<Utc>>,
}

impl ApplyReport {
  /// A tombstone only counts when it removed a local row.
  pub(crate) fn count_applied(&mut self, remote: &RemoteRecord, existed: bool) {
    match (remote.deleted, existed) {
      (true, true) => self.deleted += 1,
      (true, false) => {}
      (false, _) => self.applied += 1,
    }
  }
}

/// Metadata for one cached binary asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageCacheEntry {
  pub url: String,
  pub local_path: PathBuf,
  pub size_bytes: u64,
  pub cached_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
  /// Exempt from eviction
  pub is_permanent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageUsage {
  pub entries: u64,
  pub total_bytes: u64,
  pub evictable_bytes: u64,
  pub pinned_bytes: u64,
}
