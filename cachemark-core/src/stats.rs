use std::sync::atomic::{AtomicU64, Ordering};

/// Per-prefix counters describing how memoized calls were resolved.
///
/// Counters are atomics updated with `Relaxed` ordering; they are
/// diagnostics, not synchronization.
///
/// # Examples
///
/// ```
/// use cachemark_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_miss();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_bypass();
///
/// assert_eq!(stats.lookups(), 3);
/// assert_eq!(stats.bypasses(), 1);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    populated: AtomicU64,
    lost_races: AtomicU64,
}

/// Point-in-time copy of a [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub populated: u64,
    pub lost_races: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A live record answered the call.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// No live record existed (absent or expired).
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// The call skipped the store entirely (veto or unsaved entity).
    #[inline]
    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// A computed value was written to the store.
    #[inline]
    pub fn record_populate(&self) {
        self.populated.fetch_add(1, Ordering::Relaxed);
    }

    /// A concurrent writer inserted the same key first.
    #[inline]
    pub fn record_lost_race(&self) {
        self.lost_races.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn populated(&self) -> u64 {
        self.populated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lost_races(&self) -> u64 {
        self.lost_races.load(Ordering::Relaxed)
    }

    /// Calls that consulted the store: hits plus misses.
    #[inline]
    pub fn lookups(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of lookups answered from the store, `0.0` without lookups.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits() as f64 / total as f64,
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            bypasses: self.bypasses(),
            populated: self.populated(),
            lost_races: self.lost_races(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.bypasses,
            &self.populated,
            &self.lost_races,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
