//! Cache-aside fetch engine
//!
//! Serves fresh entries from the store, refreshes stale or missing ones from
//! the remote source, and falls back to whatever is cached when the refresh
//! fails. A stale entry never short-circuits the refresh attempt.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::store::{CacheEntry, Store, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::source::{RemoteSource, SourceError};

/// Freshness window used by the weather front end
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Upper bound on a single remote fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard failures of [`CacheEngine::get`]
#[derive(Debug, Error)]
pub enum FetchError {
    /// The key was empty
    #[error("Cache key cannot be empty")]
    InvalidKey,

    /// The remote fetch failed and nothing was cached for the key
    #[error("Network error: {0}")]
    Network(#[source] SourceError),

    /// The persisted store could not be loaded
    #[error("Cache unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A change the caller asked for could not be written to disk
    #[error("Failed to save cache: {0}")]
    Persist(#[source] StoreError),
}

/// Where a returned payload came from
#[derive(Debug)]
pub enum Origin {
    /// Served from the store without a network call
    Cache,
    /// Fetched just now and written to the store
    Remote,
    /// The refresh failed; this is the last cached payload
    Degraded(SourceError),
}

/// A payload returned by the engine, with freshness metadata
#[derive(Debug)]
pub struct Fetched {
    /// The payload
    pub data: Value,
    /// When the payload was stored
    pub cached_at: DateTime<Utc>,
    /// How this call obtained it
    pub origin: Origin,
}

impl Fetched {
    /// True when a failed refresh was masked by a cached payload
    pub fn is_degraded(&self) -> bool {
        matches!(self.origin, Origin::Degraded(_))
    }

    /// The refresh failure, if this payload is degraded
    pub fn degraded_cause(&self) -> Option<&SourceError> {
        match &self.origin {
            Origin::Degraded(cause) => Some(cause),
            _ => None,
        }
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;
type KeyLocks = Mutex<HashMap<String, KeyLock>>;

/// Exclusive hold on one key
///
/// Releasing the last hold on a key drops its lock from the table, so the
/// table only tracks keys with work in flight.
struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Waiters clone the lock under this mutex, so the count cannot grow here
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Cache-aside front for a [`RemoteSource`]
///
/// Owns the store and serializes work per key: at most one remote fetch is in
/// flight for any given key. Share it behind an `Arc` across tasks.
pub struct CacheEngine<S, C = SystemClock> {
    source: S,
    clock: C,
    store_path: PathBuf,
    store: Mutex<Option<Store>>,
    key_locks: KeyLocks,
    fetch_timeout: Duration,
}

impl<S: RemoteSource> CacheEngine<S, SystemClock> {
    /// Creates an engine on the wall clock, loading the store on first use
    pub fn new(store_path: impl Into<PathBuf>, source: S) -> Self {
        Self::with_clock(store_path, source, SystemClock)
    }
}

impl<S: RemoteSource, C: Clock> CacheEngine<S, C> {
    /// Creates an engine with an explicit clock, loading the store on first use
    pub fn with_clock(store_path: impl Into<PathBuf>, source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            store_path: store_path.into(),
            store: Mutex::new(None),
            key_locks: Mutex::new(HashMap::new()),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Creates an engine and loads the store immediately
    pub fn open(store_path: impl Into<PathBuf>, source: S, clock: C) -> Result<Self, StoreError> {
        let engine = Self::with_clock(store_path, source, clock);
        let store = Store::load(engine.store_path.clone())?;
        debug!(path = %engine.store_path.display(), entries = store.len(), "Loaded cache");
        *engine.store.lock() = Some(store);
        Ok(engine)
    }

    /// Sets the upper bound on each remote fetch
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the payload for `key`, refreshing it if older than `freshness_window`
    ///
    /// # Returns
    /// * `Ok(Fetched)` with origin `Cache` for a fresh hit, `Remote` after a
    ///   successful refresh, or `Degraded` when the refresh failed but an older
    ///   payload was available
    /// * `Err(FetchError::InvalidKey)` for an empty key
    /// * `Err(FetchError::Network)` when the refresh failed and nothing was cached
    /// * `Err(FetchError::StoreUnavailable)` when the store cannot be loaded
    pub async fn get(&self, key: &str, freshness_window: Duration) -> Result<Fetched, FetchError> {
        if key.is_empty() {
            return Err(FetchError::InvalidKey);
        }

        let _guard = self.lock_key(key).await;

        let cached = self.with_store(|store| store.get(key).cloned())?;
        let now = self.clock.now();

        if let Some(entry) = &cached {
            if is_fresh(entry.stored_at, now, freshness_window) {
                debug!(key = %key, "Cache hit");
                return Ok(Fetched {
                    data: entry.value.clone(),
                    cached_at: entry.stored_at,
                    origin: Origin::Cache,
                });
            }
            debug!(key = %key, stored_at = %entry.stored_at, "Cache entry is stale, refreshing");
        } else {
            debug!(key = %key, "Cache miss");
        }

        match self.fetch_remote(key).await {
            Ok(value) => {
                let stored_at = self.clock.now();
                let entry = CacheEntry {
                    key: key.to_string(),
                    value: value.clone(),
                    stored_at,
                };
                self.store_entry(entry)?;
                info!(key = %key, "Refreshed from remote source");
                Ok(Fetched {
                    data: value,
                    cached_at: stored_at,
                    origin: Origin::Remote,
                })
            }
            Err(cause) => match cached {
                Some(entry) => {
                    warn!(key = %key, error = %cause, "Remote fetch failed, serving cached data");
                    Ok(Fetched {
                        data: entry.value,
                        cached_at: entry.stored_at,
                        origin: Origin::Degraded(cause),
                    })
                }
                None => {
                    warn!(key = %key, error = %cause, "Remote fetch failed with nothing cached");
                    Err(FetchError::Network(cause))
                }
            },
        }
    }

    /// Drops the entry for `key` and persists the store
    ///
    /// Returns whether an entry was removed. When the store cannot be written
    /// the entry is put back and `FetchError::Persist` is returned, so memory
    /// and disk keep agreeing.
    pub async fn invalidate(&self, key: &str) -> Result<bool, FetchError> {
        if key.is_empty() {
            return Err(FetchError::InvalidKey);
        }

        let _guard = self.lock_key(key).await;

        self.with_store(|store| {
            let Some(removed) = store.remove(key) else {
                return Ok(false);
            };
            if let Err(e) = store.persist() {
                warn!(key = %key, error = %e, "Failed to persist cache after invalidation");
                store.put(removed);
                return Err(FetchError::Persist(e));
            }
            debug!(key = %key, "Invalidated cache entry");
            Ok(true)
        })?
    }

    /// Returns the stored entry for `key` without touching the network
    pub fn peek(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        self.with_store(|store| store.get(key).cloned())
    }

    /// Snapshot of every stored entry, in key order
    pub fn entries(&self) -> Result<Vec<CacheEntry>, FetchError> {
        self.with_store(|store| store.iter().cloned().collect())
    }

    /// Time since `stored_at` according to the engine's clock
    pub fn age_of(&self, stored_at: DateTime<Utc>) -> Duration {
        age(stored_at, self.clock.now())
    }

    async fn fetch_remote(&self, key: &str) -> Result<Value, SourceError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.fetch_timeout)),
        }
    }

    /// Overwrites the entry and persists. A persist failure is logged only;
    /// the in-memory entry stays valid.
    fn store_entry(&self, entry: CacheEntry) -> Result<(), FetchError> {
        self.with_store(|store| {
            let key = entry.key.clone();
            store.put(entry);
            if let Err(e) = store.persist() {
                warn!(key = %key, error = %e, "Failed to persist cache");
            }
        })
    }

    /// Runs `f` against the loaded store, loading it first if needed
    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> Result<T, FetchError> {
        let mut slot = self.store.lock();
        let store = match slot.take() {
            Some(store) => store,
            None => {
                let store = Store::load(self.store_path.clone()).map_err(|e| {
                    warn!(path = %self.store_path.display(), error = %e, "Failed to load cache");
                    FetchError::StoreUnavailable(e)
                })?;
                debug!(path = %self.store_path.display(), entries = store.len(), "Loaded cache");
                store
            }
        };

        Ok(f(slot.insert(store)))
    }

    async fn lock_key(&self, key: &str) -> KeyGuard<'_> {
        let lock = self
            .key_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();

        let mut held = KeyGuard {
            locks: &self.key_locks,
            key: key.to_string(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }
}

/// Time elapsed since `stored_at`; entries stamped in the future have age zero
fn age(stored_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(stored_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn is_fresh(stored_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    age(stored_at, now) < window
}
