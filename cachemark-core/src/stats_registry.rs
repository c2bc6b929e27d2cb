//! Process-wide registry of [`CacheStats`], keyed by cache key prefix.
//!
//! The memoization layer records into the registry on every call, so the
//! counters of any memoized operation can be read by its prefix (by default
//! its canonical name).
//!
//! ```
//! use cachemark_core::stats_registry;
//!
//! stats_registry::stats_for("app:report").record_hit();
//!
//! let snapshot = stats_registry::get("app:report").unwrap();
//! assert!(snapshot.hits >= 1);
//! assert!(stats_registry::list().contains(&"app:report".to_string()));
//! ```

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::stats::{CacheStats, StatsSnapshot};

static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Counters for `prefix`, created on first use.
pub fn stats_for(prefix: &str) -> Arc<CacheStats> {
    if let Some(stats) = STATS_REGISTRY.read().get(prefix) {
        return Arc::clone(stats);
    }

    let mut registry = STATS_REGISTRY.write();
    Arc::clone(registry.entry(prefix.to_string()).or_default())
}

/// Snapshot of the counters for `prefix`, if any call was recorded.
pub fn get(prefix: &str) -> Option<StatsSnapshot> {
    STATS_REGISTRY.read().get(prefix).map(|stats| stats.snapshot())
}

/// Every prefix with recorded counters.
pub fn list() -> Vec<String> {
    let mut names: Vec<String> = STATS_REGISTRY.read().keys().cloned().collect();
    names.sort();
    names
}

/// Zeroes the counters for `prefix`. Returns false for unknown prefixes.
pub fn reset(prefix: &str) -> bool {
    match STATS_REGISTRY.read().get(prefix) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}

/// Forgets every registered prefix.
pub fn clear() {
    STATS_REGISTRY.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_stats_for_is_shared() {
        let first = stats_for("registry:shared");
        let second = stats_for("registry:shared");
        first.record_hit();
        assert_eq!(second.hits(), first.hits());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[serial]
    fn test_get_unknown() {
        assert!(get("registry:unknown").is_none());
        assert!(!reset("registry:unknown"));
    }

    #[test]
    #[serial]
    fn test_reset() {
        let stats = stats_for("registry:reset");
        stats.record_miss();
        assert!(reset("registry:reset"));
        assert_eq!(get("registry:reset").unwrap().misses, 0);
    }

    #[test]
    #[serial]
    fn test_list_and_clear() {
        stats_for("registry:b");
        stats_for("registry:a");
        let names = list();
        let a = names.iter().position(|n| n == "registry:a").unwrap();
        let b = names.iter().position(|n| n == "registry:b").unwrap();
        assert!(a < b);

        clear();
        assert!(!list().contains(&"registry:a".to_string()));
        assert!(get("registry:b").is_none());
    }
}
