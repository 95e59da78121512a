//! Synchronization between the local store and the remote document store.
//!
//! A cycle pushes the mutation journal in `sequence_id` order, in batches of
//! one entity type each, and only when every batch was acknowledged pulls
//! each entity type since its checkpoint. Failed cycles back off
//! exponentially; cycles never overlap.

mod backoff;
mod engine;
mod remote;

pub use backoff::Backoff;
pub use engine::{
  CycleReport, SyncEngine, SyncEngineBuilder, SyncEvent, SyncPhase, SyncStatus, Trigger,
};
pub use remote::{HttpRemote, PushItem, PushOutcome, RemoteStore};
