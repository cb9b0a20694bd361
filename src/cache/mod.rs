//! Cache module for serving remote payloads through a persisted store
//!
//! [`CacheEngine`] checks the store before calling the remote source, refreshes
//! entries older than the caller's freshness window, and falls back to a stale
//! entry (flagged as degraded) when the refresh fails. The [`Store`] persists
//! every entry to a single JSON file.

mod engine;
mod store;
pub mod timestamp;

pub use engine::{
    CacheEngine, FetchError, Fetched, Origin, DEFAULT_FETCH_TIMEOUT, DEFAULT_FRESHNESS_WINDOW,
};
pub use store::{CacheEntry, Store, StoreError, STORE_FILE_NAME};
