//! # Cache stores
//!
//! The memoization core never keeps records in process memory of its own: it
//! talks to a [`CacheStore`], the single source of truth. A production store is
//! typically a document database with a TTL index on the expiry field.
//! [`MemoryStore`] is a `DashMap` backed implementation with the same
//! semantics, including a background sweeper standing in for the TTL monitor.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::StoreError;
use crate::{CacheKey, CacheRecord, Reference};

/// Acknowledgement requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Wait for the store to confirm the write.
    #[default]
    Acknowledged,
    /// Fire and forget: losing the write is acceptable.
    Unacknowledged,
}

/// Persistent key to record map with TTL based expiry.
///
/// Implementations must make each single-record operation atomic. Records
/// whose expiry has passed must eventually disappear without calls from the
/// memoization core; [`CacheStore::purge_expired`] is the hook for stores that
/// do not sweep on their own.
pub trait CacheStore: Send + Sync {
    /// Point lookup. Expired but not yet swept records may be returned.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError>;

    /// Inserts a record that must not exist yet.
    ///
    /// Fails with [`StoreError::Duplicate`] when a record already holds the key.
    fn insert(&self, record: CacheRecord, durability: Durability) -> Result<(), StoreError>;

    /// Inserts or replaces a record.
    fn set(&self, record: CacheRecord, durability: Durability) -> Result<(), StoreError>;

    /// Moves the expiry of an existing record. Returns whether a record was updated.
    fn update_expiry(
        &self,
        key: &CacheKey,
        expires: DateTime<Utc>,
        durability: Durability,
    ) -> Result<bool, StoreError>;

    /// Removes one record. Returns whether it existed.
    fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Removes every record stored under `prefix`.
    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

    /// Removes every record scoped to `reference`.
    fn delete_by_reference(&self, reference: &Reference) -> Result<usize, StoreError>;

    /// Physically removes records with `expires <= now`.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of records physically present.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process [`CacheStore`].
///
/// # Examples
///
/// ```
/// use cachemark_core::{Arguments, CacheKey, CacheRecord, CacheStore, Durability, MemoryStore};
/// use chrono::{Duration, Utc};
///
/// let store = MemoryStore::new();
/// let key = CacheKey::new(Some("demo".into()), None, &Arguments::new());
/// let record = CacheRecord::new(key.clone(), serde_json::json!("v"), Utc::now() + Duration::minutes(1));
///
/// store.insert(record.clone(), Durability::Acknowledged).unwrap();
/// assert!(store.insert(record, Durability::Acknowledged).is_err());
/// assert_eq!(store.get(&key).unwrap().unwrap().value, "v");
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<CacheKey, CacheRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records, in key order.
    pub fn records(&self) -> Vec<CacheRecord> {
        let mut records: Vec<CacheRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Starts a background thread purging expired records every `interval`.
    ///
    /// The thread stops when the returned [`Sweeper`] is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Sweeper {
        let store = Arc::clone(self);
        Sweeper::spawn(interval, move || sweep(&*store))
    }

    fn retain(&self, keep: impl Fn(&CacheRecord) -> bool) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let kept = keep(record);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }
}

fn sweep<S: CacheStore + ?Sized>(store: &S) {
    match store.purge_expired(Utc::now()) {
        Ok(0) => {}
        Ok(purged) => tracing::debug!(purged, "swept expired cache records"),
        Err(err) => tracing::warn!(error = %err, "failed to sweep expired cache records"),
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    fn insert(&self, record: CacheRecord, _durability: Durability) -> Result<(), StoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(record.key)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn set(&self, record: CacheRecord, _durability: Durability) -> Result<(), StoreError> {
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    fn update_expiry(
        &self,
        key: &CacheKey,
        expires: DateTime<Utc>,
        _durability: Durability,
    ) -> Result<bool, StoreError> {
        Ok(match self.records.get_mut(key) {
            Some(mut entry) => {
                entry.expires = expires;
                true
            }
            None => false,
        })
    }

    fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.records.remove(key).is_some())
    }

    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(self.retain(|record| record.key.prefix.as_deref() != Some(prefix)))
    }

    fn delete_by_reference(&self, reference: &Reference) -> Result<usize, StoreError> {
        Ok(self.retain(|record| record.key.reference.as_ref() != Some(reference)))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.retain(|record| record.is_live(now)))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Handle of a [`MemoryStore`] sweeper thread. Stops and joins the thread on drop.
#[derive(Debug)]
pub struct Sweeper {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Runs `tick` on a background thread every `interval` until stopped.
    fn spawn<F>(interval: Duration, tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            let (stopped, condvar) = &*thread_signal;
            let mut stopped = stopped.lock();
            while !*stopped {
                condvar.wait_for(&mut stopped, interval);
                if *stopped {
                    break;
                }
                MutexGuard::unlocked(&mut stopped, &tick);
            }
        });

        Sweeper {
            signal,
            handle: Some(handle),
        }
    }

    /// Stops the sweeper and waits for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let (stopped, condvar) = &*self.signal;
            *stopped.lock() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// How often the default store is swept unless reconfigured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct DefaultStore {
    store: RwLock<Arc<dyn CacheStore>>,
    sweeper: Mutex<Option<Sweeper>>,
}

static DEFAULT_STORE: Lazy<DefaultStore> = Lazy::new(|| DefaultStore {
    store: RwLock::new(Arc::new(MemoryStore::new()) as Arc<dyn CacheStore>),
    sweeper: Mutex::new(Some(sweep_default_store(DEFAULT_SWEEP_INTERVAL))),
});

fn sweep_default_store(interval: Duration) -> Sweeper {
    Sweeper::spawn(interval, || sweep(&*default_store()))
}

/// The store used by memoized functions that do not name one.
///
/// Starts out as an empty [`MemoryStore`]. Whatever store is installed is
/// purged of expired records every [`DEFAULT_SWEEP_INTERVAL`].
pub fn default_store() -> Arc<dyn CacheStore> {
    Arc::clone(&DEFAULT_STORE.store.read())
}

/// Replaces the default store, returning the previous one.
pub fn install_default_store(store: Arc<dyn CacheStore>) -> Arc<dyn CacheStore> {
    std::mem::replace(&mut *DEFAULT_STORE.store.write(), store)
}

/// Restarts the default store's sweeper with a new interval.
pub fn set_default_sweep_interval(interval: Duration) {
    let previous = DEFAULT_STORE.sweeper.lock().replace(sweep_default_store(interval));
    drop(previous);
}
