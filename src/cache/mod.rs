//! Named caches for offline support.
//!
//! This module provides:
//! - Named caches of serialized entries (asset generations, the submission queue)
//! - Cache-first retrieval with write-through and offline fallbacks
//! - Persisted background sync registrations

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, OFFLINE_HTML};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{
  CacheEntry, CacheResult, CacheSource, CachedResponse, SyncRegistrar, UnsupportedRegistrar,
};
