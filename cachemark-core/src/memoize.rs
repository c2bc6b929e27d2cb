//! # Memoization
//!
//! [`Memoize`] holds the configuration of one memoized operation; its
//! `execute*` / `invoke*` methods run the decision logic for a single call:
//!
//! 1. resolve the key prefix (explicit, or the canonical name of the callable)
//! 2. for calls bound to an [`Entity`], resolve the owning reference and skip
//!    the store entirely while the entity is unsaved or caching is vetoed
//! 3. derive the [`CacheKey`] from the effective arguments
//! 4. look the key up; a stale record is deleted on sight and counts as a miss
//! 5. on a hit, optionally push the expiry forward and return the stored value
//! 6. on a miss, compute, insert if still absent and return the computed value
//!
//! Nothing is cached in process: the [`CacheStore`] is the only state.
//!
//! # Examples
//!
//! ```
//! use cachemark_core::{Arguments, CanonicalName, Memoize, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let memo = Memoize::new().minutes(5);
//! let args = Arguments::new().with(&10u64).unwrap();
//!
//! let name = || CanonicalName::function("app::math", "square");
//! let first: u64 = memo.invoke(&store, name, &args, || 10 * 10).unwrap();
//! let second: u64 = memo.invoke(&store, name, &args, || unreachable!()).unwrap();
//!
//! assert_eq!(first, 100);
//! assert_eq!(second, 100);
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, Result, StoreError};
use crate::expiry::ExpiryPolicy;
use crate::fetch::fetch_value;
use crate::store::{CacheStore, Durability};
use crate::{veto, Arguments, CacheKey, CacheRecord, CanonicalName, Entity, Reference};

/// How a memoized call is scoped to an owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReferencePolicy {
    /// Entries are global to the prefix.
    #[default]
    None,
    /// Entries are scoped to the durable id of the bound entity. Calls that
    /// are not bound to one are left unscoped.
    Bound,
    /// Entries are scoped to a fixed reference.
    Explicit(Reference),
}

/// Configuration of a memoized operation.
#[derive(Debug, Clone)]
pub struct Memoize {
    prefix: Option<String>,
    reference: ReferencePolicy,
    expiry: ExpiryPolicy,
    refresh: bool,
    populate: bool,
    attributes: Vec<String>,
}

impl Default for Memoize {
    fn default() -> Self {
        Self::new()
    }
}

impl Memoize {
    /// Function-style memoization: keyed on the raw call arguments, not
    /// entity-scoped, one week default lifetime, populating on misses.
    pub fn new() -> Self {
        Self {
            prefix: None,
            reference: ReferencePolicy::None,
            expiry: ExpiryPolicy::new(),
            refresh: false,
            populate: true,
            attributes: Vec::new(),
        }
    }

    /// Method-style memoization keyed on dependent attributes of the bound
    /// entity and scoped to its durable id.
    pub fn method<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new()
            .reference(ReferencePolicy::Bound)
            .attributes(attributes)
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn reference(mut self, reference: ReferencePolicy) -> Self {
        self.reference = reference;
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    /// Replaces the now-provider used for expiry and liveness checks.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.expiry = self.expiry.clock(clock);
        self
    }

    pub fn weeks(mut self, weeks: i64) -> Self {
        self.expiry = self.expiry.weeks(weeks);
        self
    }

    pub fn days(mut self, days: i64) -> Self {
        self.expiry = self.expiry.days(days);
        self
    }

    pub fn hours(mut self, hours: i64) -> Self {
        self.expiry = self.expiry.hours(hours);
        self
    }

    pub fn minutes(mut self, minutes: i64) -> Self {
        self.expiry = self.expiry.minutes(minutes);
        self
    }

    pub fn seconds(mut self, seconds: i64) -> Self {
        self.expiry = self.expiry.seconds(seconds);
        self
    }

    /// See [`ExpiryPolicy::without_default_delta`].
    pub fn without_default_delta(mut self) -> Self {
        self.expiry = self.expiry.without_default_delta();
        self
    }

    /// Push the expiry of a record forward every time it is hit.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// When false, misses fail with [`CacheError::CacheMiss`] instead of computing.
    pub fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    pub fn expiry_policy(&self) -> &ExpiryPolicy {
        &self.expiry
    }

    pub fn dependent_attributes(&self) -> &[String] {
        &self.attributes
    }

    fn resolve_prefix<N>(&self, name: N) -> Result<String>
    where
        N: FnOnce() -> Result<CanonicalName>,
    {
        match &self.prefix {
            Some(prefix) => Ok(prefix.clone()),
            None => name().map(CanonicalName::into_string),
        }
    }

    fn resolve_reference<B: Entity + ?Sized>(&self, bound: Option<&B>) -> Option<Reference> {
        match &self.reference {
            ReferencePolicy::None => None,
            ReferencePolicy::Bound => bound.and_then(Entity::reference),
            ReferencePolicy::Explicit(reference) => Some(reference.clone()),
        }
    }

    fn effective_arguments<B: Serialize + ?Sized>(&self, bound: &B, rest: &Arguments) -> Result<Arguments> {
        if self.attributes.is_empty() {
            return Ok(rest.clone());
        }

        let root = serde_json::to_value(bound)?;
        let fetched = self
            .attributes
            .iter()
            .map(|path| fetch_value(&root, path, None))
            .collect::<Result<Vec<Value>>>()?;
        Ok(rest.prepended(fetched))
    }

    /// Key a function-style call would be stored under.
    pub fn key<N>(&self, name: N, args: &Arguments) -> Result<CacheKey>
    where
        N: FnOnce() -> Result<CanonicalName>,
    {
        let prefix = self.resolve_prefix(name)?;
        let reference = self.resolve_reference::<NoEntity>(None);
        Ok(CacheKey::new(Some(prefix), reference, args))
    }

    /// Key a call bound to `bound` would be stored under, ignoring vetoes.
    pub fn method_key<B, N>(&self, name: N, bound: &B, rest: &Arguments) -> Result<CacheKey>
    where
        B: Entity + Serialize,
        N: FnOnce() -> Result<CanonicalName>,
    {
        let prefix = self.resolve_prefix(name)?;
        let reference = self.resolve_reference(Some(bound));
        let args = self.effective_arguments(bound, rest)?;
        Ok(CacheKey::new(Some(prefix), reference, &args))
    }

    /// Runs a function-style call whose body may fail.
    ///
    /// Errors returned by `body` are passed through and never cached.
    pub fn execute<S, T, E, N, F>(&self, store: &S, name: N, args: &Arguments, body: F) -> Result<T, E>
    where
        S: CacheStore + ?Sized,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        N: FnOnce() -> Result<CanonicalName>,
        F: FnOnce() -> Result<T, E>,
    {
        let key = self.key(name, args)?;
        self.resolve(store, key, body)
    }

    /// Runs a function-style call with an infallible body.
    pub fn invoke<S, T, N, F>(&self, store: &S, name: N, args: &Arguments, body: F) -> Result<T>
    where
        S: CacheStore + ?Sized,
        T: Serialize + DeserializeOwned,
        N: FnOnce() -> Result<CanonicalName>,
        F: FnOnce() -> T,
    {
        self.execute(store, name, args, || Ok::<T, CacheError>(body()))
    }

    /// Runs a call bound to an entity whose body may fail.
    ///
    /// `rest` holds the arguments following the bound entity. While the
    /// entity is unsaved, or caching is vetoed for its type, `body` runs
    /// without any store interaction.
    pub fn execute_method<S, B, T, E, N, F>(
        &self,
        store: &S,
        name: N,
        bound: &B,
        rest: &Arguments,
        body: F,
    ) -> Result<T, E>
    where
        S: CacheStore + ?Sized,
        B: Entity + Serialize,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        N: FnOnce() -> Result<CanonicalName>,
        F: FnOnce() -> Result<T, E>,
    {
        let prefix = self.resolve_prefix(name)?;

        let unsaved = bound.is_unsaved();
        if unsaved || veto::veto_for::<B>() {
            debug!(%prefix, unsaved, "cache bypassed");
            record(&prefix, Event::Bypass);
            return body();
        }

        let reference = self.resolve_reference(Some(bound));
        let args = self.effective_arguments(bound, rest)?;
        let key = CacheKey::new(Some(prefix), reference, &args);
        self.resolve(store, key, body)
    }

    /// Runs a call bound to an entity with an infallible body.
    pub fn invoke_method<S, B, T, N, F>(
        &self,
        store: &S,
        name: N,
        bound: &B,
        rest: &Arguments,
        body: F,
    ) -> Result<T>
    where
        S: CacheStore + ?Sized,
        B: Entity + Serialize,
        T: Serialize + DeserializeOwned,
        N: FnOnce() -> Result<CanonicalName>,
        F: FnOnce() -> T,
    {
        self.execute_method(store, name, bound, rest, || Ok::<T, CacheError>(body()))
    }

    fn resolve<S, T, E, F>(&self, store: &S, key: CacheKey, body: F) -> Result<T, E>
    where
        S: CacheStore + ?Sized,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        let prefix = key.prefix.clone().unwrap_or_default();

        match self.lookup(store, &key) {
            Ok(value) => {
                trace!(%key, "cache hit");
                record(&prefix, Event::Hit);
                let value = serde_json::from_value(value)
                    .map_err(|e| E::from(CacheError::Serialization(e)))?;
                if self.refresh {
                    self.refresh_expiry(store, &key);
                }
                return Ok(value);
            }
            Err(CacheError::CacheMiss) => {
                record(&prefix, Event::Miss);
                if !self.populate {
                    debug!(%key, "cache miss with population disabled");
                    return Err(CacheError::CacheMiss.into());
                }
            }
            Err(err) => return Err(err.into()),
        }

        let value = body()?;
        let payload = serde_json::to_value(&value).map_err(|e| E::from(CacheError::from(e)))?;
        let record_expires = self.expiry.expires_at();
        let entry = CacheRecord::new(key, payload, record_expires);

        match store.insert(entry, Durability::Acknowledged) {
            Ok(()) => {
                trace!(%prefix, expires = %record_expires, "cache populated");
                record(&prefix, Event::Populate);
            }
            Err(StoreError::Duplicate(key)) => {
                // Another caller populated the key first.
                debug!(%key, "cache populate lost the race");
                record(&prefix, Event::LostRace);
            }
            Err(err) => return Err(CacheError::Store(err).into()),
        }

        Ok(value)
    }

    /// Fetches the live value stored under `key`, failing with
    /// [`CacheError::CacheMiss`] when there is none.
    fn lookup<S>(&self, store: &S, key: &CacheKey) -> Result<Value>
    where
        S: CacheStore + ?Sized,
    {
        let now = self.expiry.now();
        let record = store.get(key)?.ok_or(CacheError::CacheMiss)?;

        if record.is_expired(now) {
            if let Err(err) = store.delete(key) {
                warn!(%key, error = %err, "failed to delete stale cache record");
            }
            trace!(%key, expired = %record.expires, "cache record stale");
            return Err(CacheError::CacheMiss);
        }

        Ok(record.value)
    }

    fn refresh_expiry<S>(&self, store: &S, key: &CacheKey)
    where
        S: CacheStore + ?Sized,
    {
        let expires = self.expiry.expires_at();
        if let Err(err) = store.update_expiry(key, expires, Durability::Unacknowledged) {
            warn!(%key, error = %err, "failed to refresh cache record expiry");
        }
    }
}

/// Placeholder entity for calls that are not bound to one.
enum NoEntity {}

impl Entity for NoEntity {
    fn reference(&self) -> Option<Reference> {
        match *self {}
    }
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Hit,
    Miss,
    Bypass,
    Populate,
    LostRace,
}

#[cfg(feature = "stats")]
fn record(prefix: &str, event: Event) {
    let stats = crate::stats_registry::stats_for(prefix);
    match event {
        Event::Hit => stats.record_hit(),
        Event::Miss => stats.record_miss(),
        Event::Bypass => stats.record_bypass(),
        Event::Populate => stats.record_populate(),
        Event::LostRace => stats.record_lost_race(),
    }
}

#[cfg(not(feature = "stats"))]
fn record(_prefix: &str, _event: Event) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, Target};
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::cell::Cell;
    use std::sync::Arc;

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )))
        }

        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }

        fn advance(&self, delta: Duration) {
            *self.0.lock() += delta;
        }

        fn install(&self, memo: Memoize) -> Memoize {
            let clock = self.clone();
            memo.clock(move || clock.now())
        }
    }

    fn name() -> Result<CanonicalName> {
        CanonicalName::function("tests::memoize", "compute")
    }

    fn args(value: i64) -> Arguments {
        Arguments::new().with(&value).unwrap()
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counter {
        id: Option<u64>,
        created: bool,
        number: i64,
        label: String,
    }

    impl Entity for Counter {
        fn reference(&self) -> Option<Reference> {
            self.id.map(Reference::from)
        }

        fn is_new(&self) -> bool {
            self.created
        }
    }

    fn saved(number: i64) -> Counter {
        Counter {
            id: Some(1),
            created: false,
            number,
            label: "first".into(),
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let store = MemoryStore::new();
        let memo = Memoize::new();
        let calls = Cell::new(0);

        for _ in 0..2 {
            let value: i64 = memo
                .invoke(&store, name, &args(3), || {
                    calls.set(calls.get() + 1);
                    9
                })
                .unwrap();
            assert_eq!(value, 9);
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_zero_arguments_single_record() {
        let store = MemoryStore::new();
        let memo = Memoize::new();
        let calls = Cell::new(0);

        for _ in 0..2 {
            let _: String = memo
                .invoke(&store, name, &Arguments::new(), || {
                    calls.set(calls.get() + 1);
                    "done".to_string()
                })
                .unwrap();
        }

        assert_eq!(calls.get(), 1);
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.hash, crate::EMPTY_ARGUMENTS_DIGEST);
        assert_eq!(records[0].key.prefix.as_deref(), Some("tests::memoize:compute"));
    }

    #[test]
    fn test_round_trip_structured_value() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Report {
            title: String,
            totals: Vec<u32>,
        }

        let store = MemoryStore::new();
        let memo = Memoize::new();
        let produce = || Report {
            title: "q1".into(),
            totals: vec![1, 2, 3],
        };

        let first: Report = memo.invoke(&store, name, &args(1), produce).unwrap();
        let second: Report = memo
            .invoke(&store, name, &args(1), || -> Report { unreachable!() })
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_explicit_prefix_skips_name_resolution() {
        let store = MemoryStore::new();
        let memo = Memoize::new().prefix("custom");
        let unresolvable = || CanonicalName::from_type_name("{{closure}}");

        let value: i64 = memo.invoke(&store, unresolvable, &args(1), || 5).unwrap();
        assert_eq!(value, 5);
        assert_eq!(store.records()[0].key.prefix.as_deref(), Some("custom"));
    }

    #[test]
    fn test_unresolvable_name_fails_before_store() {
        let store = MemoryStore::new();
        let memo = Memoize::new();
        let unresolvable = || CanonicalName::from_type_name("<T as Trait>::f");

        let err = memo
            .invoke(&store, unresolvable, &args(1), || 5i64)
            .unwrap_err();
        assert!(matches!(err, CacheError::UnresolvableReference(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry_boundary() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().seconds(10));
        let calls = Cell::new(0);
        let run = || -> i64 {
            memo.invoke(&store, name, &args(1), || {
                calls.set(calls.get() + 1);
                calls.get()
            })
            .unwrap()
        };

        assert_eq!(run(), 1);
        clock.advance(Duration::seconds(9) + Duration::milliseconds(999));
        assert_eq!(run(), 1);
        clock.advance(Duration::milliseconds(1));
        // expires == now counts as expired
        assert_eq!(run(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_stale_record_deleted_then_replaced() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().minutes(1));

        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        let first_expiry = store.records()[0].expires;

        clock.advance(Duration::minutes(2));
        let value: i64 = memo.invoke(&store, name, &args(1), || 2).unwrap();

        assert_eq!(value, 2);
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, serde_json::json!(2));
        assert!(records[0].expires > first_expiry);
    }

    #[test]
    fn test_populate_disabled() {
        let store = MemoryStore::new();
        let memo = Memoize::new().populate(false);

        let err = memo
            .invoke(&store, name, &args(1), || -> i64 { panic!("must not run") })
            .unwrap_err();
        assert!(matches!(err, CacheError::CacheMiss));
        assert!(store.is_empty());
    }

    #[test]
    fn test_populate_disabled_still_hits() {
        let store = MemoryStore::new();
        let _: i64 = Memoize::new().invoke(&store, name, &args(1), || 7).unwrap();

        let value: i64 = Memoize::new()
            .populate(false)
            .invoke(&store, name, &args(1), || 0)
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_refresh_moves_expiry_forward() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().minutes(5).refresh(true));

        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        let before = store.records()[0].expires;

        clock.advance(Duration::seconds(30));
        let _: i64 = memo.invoke(&store, name, &args(1), || 2).unwrap();
        let after = store.records()[0].expires;

        assert!(after > before);
        assert_eq!(after, clock.now() + Duration::minutes(5));
    }

    #[test]
    fn test_no_refresh_keeps_expiry() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().minutes(5));

        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        let before = store.records()[0].expires;

        clock.advance(Duration::seconds(30));
        let _: i64 = memo.invoke(&store, name, &args(1), || 2).unwrap();
        assert_eq!(store.records()[0].expires, before);
    }

    #[test]
    fn test_undecodable_hit_is_not_refreshed() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().minutes(5).refresh(true));

        let _: String = memo.invoke(&store, name, &args(1), || "text".to_string()).unwrap();
        let before = store.records()[0].expires;

        clock.advance(Duration::seconds(30));
        let err = memo.invoke(&store, name, &args(1), || 0i64).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert_eq!(store.records()[0].expires, before);
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let store = MemoryStore::new();
        let memo = Memoize::new().weeks(i64::MAX / 2);

        let value: i64 = memo.invoke(&store, name, &args(1), || 7).unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.records()[0].expires, DateTime::<Utc>::MAX_UTC);

        let again: i64 = memo.invoke(&store, name, &args(1), || unreachable!()).unwrap();
        assert_eq!(again, 7);
    }

    #[test]
    fn test_five_minute_expiry_band() {
        let store = MemoryStore::new();
        let memo = Memoize::new().minutes(5);
        let now = Utc::now();

        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        let expires = store.records()[0].expires;

        assert!(expires >= now + Duration::minutes(5));
        assert!(expires <= now + Duration::minutes(5) + Duration::seconds(15));
    }

    #[test]
    fn test_nulled_default_never_hits() {
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let memo = clock.install(Memoize::new().without_default_delta());
        let calls = Cell::new(0);

        for _ in 0..3 {
            let _: i64 = memo
                .invoke(&store, name, &args(1), || {
                    calls.set(calls.get() + 1);
                    0
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_body_errors_are_not_cached() {
        #[derive(Debug)]
        enum AppError {
            Cache(CacheError),
            Invalid,
        }

        impl From<CacheError> for AppError {
            fn from(err: CacheError) -> Self {
                AppError::Cache(err)
            }
        }

        let store = MemoryStore::new();
        let memo = Memoize::new();

        let failed: std::result::Result<i64, AppError> =
            memo.execute(&store, name, &args(0), || Err(AppError::Invalid));
        assert!(matches!(failed, Err(AppError::Invalid)));
        assert!(store.is_empty());

        let ok: std::result::Result<i64, AppError> =
            memo.execute(&store, name, &args(0), || Ok(4));
        assert_eq!(ok.unwrap(), 4);
        assert_eq!(store.len(), 1);

        let miss: std::result::Result<i64, AppError> = Memoize::new()
            .populate(false)
            .execute(&store, name, &args(9), || Ok(0));
        assert!(matches!(miss, Err(AppError::Cache(CacheError::CacheMiss))));
    }

    #[test]
    fn test_lost_race_returns_local_value() {
        let store = MemoryStore::new();
        let memo = Memoize::new();
        let key = memo.key(name, &args(1)).unwrap();

        // Another writer lands between our lookup and our insert.
        let value: i64 = memo
            .invoke(&store, name, &args(1), || {
                store
                    .insert(
                        CacheRecord::new(key.clone(), serde_json::json!(100), Utc::now() + Duration::hours(1)),
                        Durability::Acknowledged,
                    )
                    .unwrap();
                42
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(store.get(&key).unwrap().unwrap().value, serde_json::json!(100));
    }

    #[test]
    fn test_store_failures_propagate() {
        struct Broken;

        impl CacheStore for Broken {
            fn get(&self, _: &CacheKey) -> std::result::Result<Option<CacheRecord>, StoreError> {
                Err(StoreError::Unavailable("down".into()))
            }
            fn insert(&self, _: CacheRecord, _: Durability) -> std::result::Result<(), StoreError> {
                unreachable!()
            }
            fn set(&self, _: CacheRecord, _: Durability) -> std::result::Result<(), StoreError> {
                unreachable!()
            }
            fn update_expiry(
                &self,
                _: &CacheKey,
                _: DateTime<Utc>,
                _: Durability,
            ) -> std::result::Result<bool, StoreError> {
                unreachable!()
            }
            fn delete(&self, _: &CacheKey) -> std::result::Result<bool, StoreError> {
                unreachable!()
            }
            fn delete_by_prefix(&self, _: &str) -> std::result::Result<usize, StoreError> {
                unreachable!()
            }
            fn delete_by_reference(&self, _: &Reference) -> std::result::Result<usize, StoreError> {
                unreachable!()
            }
            fn purge_expired(&self, _: DateTime<Utc>) -> std::result::Result<usize, StoreError> {
                unreachable!()
            }
            fn len(&self) -> usize {
                0
            }
        }

        let err = Memoize::new()
            .invoke(&Broken, name, &args(1), || 1i64)
            .unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_explicit_reference() {
        let store = MemoryStore::new();
        let memo = Memoize::new().reference(ReferencePolicy::Explicit(Reference::from("tenant-7")));
        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        assert_eq!(
            store.records()[0].key.reference,
            Some(Reference::from("tenant-7"))
        );
    }

    #[test]
    fn test_method_scoped_to_entity() {
        let store = MemoryStore::new();
        let memo = Memoize::method(["number"]);
        let counter = saved(4);

        let value: i64 = memo
            .invoke_method(&store, name, &counter, &Arguments::new(), || counter.number * 2)
            .unwrap();
        assert_eq!(value, 8);

        let key = &store.records()[0].key;
        assert_eq!(key.reference, Some(Reference::from(1u64)));
        assert_eq!(key.hash, Arguments::new().with(&4).unwrap().digest());
    }

    #[test]
    fn test_dependent_attribute_rekeys() {
        let store = MemoryStore::new();
        let memo = Memoize::method(["number"]);
        let calls = Cell::new(0);
        let mut counter = saved(4);

        let run = |c: &Counter| -> i64 {
            memo.invoke_method(&store, name, c, &Arguments::new(), || {
                calls.set(calls.get() + 1);
                c.number * 2
            })
            .unwrap()
        };

        assert_eq!(run(&counter), 8);
        counter.number = 8;
        assert_eq!(run(&counter), 16);
        assert_eq!(calls.get(), 2);

        // Unrelated fields do not participate in the key.
        counter.number = 4;
        counter.label = "changed".into();
        assert_eq!(run(&counter), 8);
        assert_eq!(calls.get(), 2);

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_method_remaining_arguments_follow_attributes() {
        let memo = Memoize::method(["number", "label"]);
        let counter = saved(3);
        let rest = Arguments::new().with(&"extra").unwrap();

        let key = memo.method_key(name, &counter, &rest).unwrap();
        let expected = Arguments::new()
            .with(&3)
            .and_then(|a| a.with("first"))
            .and_then(|a| a.with("extra"))
            .unwrap();
        assert_eq!(key.hash, expected.digest());
    }

    #[test]
    fn test_missing_attribute_aborts_before_store() {
        let store = MemoryStore::new();
        let memo = Memoize::method(["nonexistent.path"]);
        let err = memo
            .invoke_method(&store, name, &saved(1), &Arguments::new(), || -> i64 {
                panic!("must not run")
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::AttributeResolution { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unsaved_entity_bypasses_store() {
        let store = MemoryStore::new();
        let memo = Memoize::method(["number"]).populate(false);
        let unsaved = Counter {
            id: None,
            ..saved(1)
        };
        let created = Counter {
            created: true,
            ..saved(1)
        };

        for entity in [&unsaved, &created] {
            let value: i64 = memo
                .invoke_method(&store, name, entity, &Arguments::new(), || 11)
                .unwrap();
            assert_eq!(value, 11);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_bypass_resolves_reference_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static LOOKUPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Serialize)]
        struct Draft;

        impl Entity for Draft {
            fn reference(&self) -> Option<Reference> {
                LOOKUPS.fetch_add(1, Ordering::SeqCst);
                None
            }
        }

        let store = MemoryStore::new();
        let value: i64 = Memoize::method(Vec::<String>::new())
            .invoke_method(&store, name, &Draft, &Arguments::new(), || 3)
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(LOOKUPS.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_veto_bypasses_store() {
        let store = MemoryStore::new();
        let memo = Memoize::method(["number"]);
        let counter = saved(1);
        let calls = Cell::new(0);

        let run = || -> i64 {
            memo.invoke_method(&store, name, &counter, &Arguments::new(), || {
                calls.set(calls.get() + 1);
                1
            })
            .unwrap()
        };

        veto::with_disabled(Target::of::<Counter>(), || {
            run();
            run();
        });
        assert_eq!(calls.get(), 2);
        assert!(store.is_empty());

        veto::with_disabled(Target::Global, || {
            veto::with_enabled(Target::of::<Counter>(), || {
                run();
                run();
            })
        });
        assert_eq!(calls.get(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_method_without_reference_policy() {
        let store = MemoryStore::new();
        let memo = Memoize::new().attributes(["number"]);
        let _: i64 = memo
            .invoke_method(&store, name, &saved(2), &Arguments::new(), || 2)
            .unwrap();
        assert_eq!(store.records()[0].key.reference, None);
    }

    #[cfg(feature = "stats")]
    #[test]
    #[serial_test::serial]
    fn test_stats_recorded_per_prefix() {
        let store = MemoryStore::new();
        let memo = Memoize::new().prefix("tests::memoize:stats");
        crate::stats_registry::reset("tests::memoize:stats");

        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();
        let _: i64 = memo.invoke(&store, name, &args(1), || 1).unwrap();

        let snapshot = crate::stats_registry::get("tests::memoize:stats").unwrap();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.populated, 1);
    }
}
