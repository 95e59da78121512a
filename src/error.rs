//! Typed errors for the cache subsystem.

use std::time::Duration;

use thiserror::Error;

/// Local transaction failure. Fatal to the single operation, never to the process.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The database file failed an integrity check; the app should offer a cache reset.
  #[error("local cache is corrupt: {0}")]
  Corrupt(String),

  #[error("lock poisoned: {0}")]
  LockPoisoned(String),
}

impl From<serde_json::Error> for StorageError {
  fn from(e: serde_json::Error) -> Self {
    StorageError::Serialization(e.to_string())
  }
}

impl StorageError {
  pub fn is_corrupt(&self) -> bool {
    match self {
      StorageError::Corrupt(_) => true,
      StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
        err.code,
        rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
      ),
      _ => false,
    }
  }
}

/// Failure talking to the remote document store. Always retried through backoff.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("remote unreachable: {0}")]
  Unreachable(String),

  #[error("remote returned {status}: {message}")]
  Server { status: u16, message: String },

  #[error("failed to decode remote response: {0}")]
  Decode(String),

  /// The remote accepted the request but refused some of the items.
  #[error("remote rejected {} item(s) of the batch", failed.len())]
  Rejected { failed: Vec<String> },
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      NetworkError::Timeout(Duration::ZERO)
    } else if e.is_decode() {
      NetworkError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
      NetworkError::Server {
        status: status.as_u16(),
        message: e.to_string(),
      }
    } else {
      NetworkError::Unreachable(e.to_string())
    }
  }
}

/// Image fetch failure. Callers fall back to a placeholder.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("offline, {0} is not cached")]
  Offline(String),

  #[error("invalid image url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("fetching {url} failed: {source}")]
  Network {
    url: String,
    #[source]
    source: NetworkError,
  },

  #[error("image {url} is {size} bytes, larger than the {cap} byte cache")]
  TooLarge { url: String, size: u64, cap: u64 },

  #[error("writing cached file failed: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// Why a sync cycle did not complete.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("sync cycle cancelled")]
  Cancelled,

  #[error("connectivity is offline")]
  Offline,
}

impl SyncError {
  /// Whether the backoff loop should try again.
  pub fn is_retryable(&self) -> bool {
    match self {
      SyncError::Network(_) => true,
      SyncError::Storage(e) => !e.is_corrupt(),
      SyncError::Cancelled | SyncError::Offline => false,
    }
  }
}
