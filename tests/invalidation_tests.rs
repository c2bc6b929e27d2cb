use cachemark::{
    default_store, install_default_store, memoize, method, CacheError, CacheStore, CanonicalName, Entity,
    MemoryStore, Reference,
};
use serde::Serialize;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static REPORT_CALLS: AtomicUsize = AtomicUsize::new(0);

#[memoize]
fn report(month: u32) -> Result<String, CacheError> {
    REPORT_CALLS.fetch_add(1, Ordering::SeqCst);
    Ok(format!("report for {month}"))
}

#[derive(Serialize)]
struct Account {
    id: u64,
    balance: i64,
}

impl Entity for Account {
    fn reference(&self) -> Option<Reference> {
        Some(Reference::from(self.id))
    }
}

impl Account {
    #[method(attributes = ["balance"])]
    fn rating(&self) -> Result<String, CacheError> {
        Ok(if self.balance > 0 { "good" } else { "poor" }.to_string())
    }
}

fn fresh_default_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    install_default_store(store.clone());
    store
}

#[test]
#[serial]
fn test_memoized_functions_use_default_store() {
    let store = fresh_default_store();
    REPORT_CALLS.store(0, Ordering::SeqCst);

    report(1).unwrap();
    report(1).unwrap();

    assert_eq!(REPORT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(default_store().len(), 1);
}

#[test]
#[serial]
fn test_invalidate_name_forces_recompute() {
    fresh_default_store();
    REPORT_CALLS.store(0, Ordering::SeqCst);

    report(1).unwrap();
    report(2).unwrap();

    let name = CanonicalName::function(module_path!(), "report").unwrap();
    assert_eq!(cachemark::invalidate_name(&name).unwrap(), 2);

    report(1).unwrap();
    assert_eq!(REPORT_CALLS.load(Ordering::SeqCst), 3);
}

#[test]
#[serial]
fn test_invalidate_prefix_and_key() {
    fresh_default_store();

    report(3).unwrap();
    report(4).unwrap();

    let key = cachemark::Memoize::new()
        .key(
            || CanonicalName::function(module_path!(), "report"),
            &cachemark::Arguments::new().with(&3u32).unwrap(),
        )
        .unwrap();
    assert!(cachemark::invalidate_key(&key).unwrap());
    assert!(!cachemark::invalidate_key(&key).unwrap());

    assert_eq!(cachemark::invalidate_prefix("invalidation_tests:report").unwrap(), 1);
    assert!(default_store().is_empty());
}

#[test]
#[serial]
fn test_invalidate_entity() {
    let store = fresh_default_store();

    let rich = Account { id: 1, balance: 10 };
    let poor = Account { id: 2, balance: -5 };
    assert_eq!(rich.rating().unwrap(), "good");
    assert_eq!(poor.rating().unwrap(), "poor");
    assert_eq!(store.len(), 2);

    assert_eq!(cachemark::invalidate_entity(&rich).unwrap(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].key.reference, Some(Reference::from(2u64)));
}

#[test]
#[serial]
fn test_sweeper_purges_expired_records() {
    use chrono::{Duration, Utc};

    let store = Arc::new(MemoryStore::new());
    let key = cachemark::CacheKey::new(Some("sweep".into()), None, &cachemark::Arguments::new());
    store
        .insert(
            cachemark::CacheRecord::new(key, serde_json::json!(1), Utc::now() - Duration::seconds(1)),
            cachemark::Durability::Acknowledged,
        )
        .unwrap();

    let sweeper = store.spawn_sweeper(std::time::Duration::from_millis(10));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !store.is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    sweeper.stop();

    assert!(store.is_empty());
}

#[test]
#[serial]
fn test_default_store_swept_without_reads() {
    use chrono::{Duration, Utc};

    let store = fresh_default_store();
    cachemark::set_default_sweep_interval(std::time::Duration::from_millis(10));

    let key = cachemark::CacheKey::new(Some("stale".into()), None, &cachemark::Arguments::new());
    default_store()
        .insert(
            cachemark::CacheRecord::new(key, serde_json::json!(1), Utc::now() - Duration::seconds(1)),
            cachemark::Durability::Acknowledged,
        )
        .unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !store.is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    cachemark::set_default_sweep_interval(cachemark::DEFAULT_SWEEP_INTERVAL);

    assert!(store.is_empty());
}
