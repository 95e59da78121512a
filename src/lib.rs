//! Offline-first local cache and sync engine for the church directory client.
//!
//! The UI reads and writes only through [`LocalStore`]. A [`SyncEngine`]
//! drains the mutation journal to the remote and merges remote changes back,
//! gated by the [`ConnectivityMonitor`]. Remote images are served from a
//! bounded on-disk [`ImageCache`].

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod images;
pub mod store;
pub mod sync;

pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use error::{FetchError, NetworkError, StorageError, SyncError};
pub use images::ImageCache;
pub use store::{CachedRecord, Entity, LocalStore, MutationLogEntry};
pub use sync::{SyncEngine, SyncEvent, SyncStatus};
