//! Typed access to opaque cached payloads.

use serde::{de::DeserializeOwned, Serialize};

use super::types::CachedRecord;
use crate::error::StorageError;

/// A domain type that can be stored in the local cache.
///
/// The cache itself only ever sees the serialized JSON; implementors pick the
/// table (`entity_type`) and the stable id.
pub trait Entity: Serialize + DeserializeOwned {
  /// Entity type name for storage organization (e.g., "church", "announcement")
  fn entity_type() -> &'static str;

  /// Stable, globally unique identifier
  fn entity_id(&self) -> String;
}

/// A record decoded into its domain type.
#[derive(Debug, Clone)]
pub struct Typed<T> {
  pub value: T,
  pub dirty: bool,
  pub record: CachedRecord,
}

impl<T: Entity> Typed<T> {
  pub fn decode(record: CachedRecord) -> Result<Self, StorageError> {
    let value = serde_json::from_value(record.payload.clone())?;
    Ok(Self {
      value,
      dirty: record.dirty,
      record,
    })
  }
}
