//! Cache statistics.
//!
//! Lock-free counters bumped on the hot path and a serializable snapshot for
//! reporting. One `CacheStats` is normally shared by every component of a
//! [`SceneCache`](crate::SceneCache).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Hit/miss pair for one lookup cache.
#[derive(Debug, Default)]
pub struct HitCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounter {
    #[inline]
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HitRate {
        HitRate {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRate {
    pub hits: u64,
    pub misses: u64,
}

impl HitRate {
    /// Fraction of lookups served from cache; 0.0 when nothing was looked up.
    pub fn ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Counters for every cache layer.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// `is_a` / `has_trait` per-node results
    pub types: HitCounter,
    /// property handle resolution
    pub handles: HitCounter,
    /// value cache entries
    pub values: HitCounter,
    loads: AtomicU64,
    load_failures: AtomicU64,
    syncs: AtomicU64,
    sync_failures: AtomicU64,
    suppressed_writes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_load(&self, ok: bool) {
        let counter = if ok { &self.loads } else { &self.load_failures };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self, ok: bool) {
        let counter = if ok { &self.syncs } else { &self.sync_failures };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed_write(&self) {
        self.suppressed_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            types: self.types.snapshot(),
            handles: self.handles.snapshot(),
            values: self.values.snapshot(),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            suppressed_writes: self.suppressed_writes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.types.reset();
        self.handles.reset();
        self.values.reset();
        for counter in [
            &self.loads,
            &self.load_failures,
            &self.syncs,
            &self.sync_failures,
            &self.suppressed_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub types: HitRate,
    pub handles: HitRate,
    pub values: HitRate,
    pub loads: u64,
    pub load_failures: u64,
    pub syncs: u64,
    pub sync_failures: u64,
    /// `set` calls that matched the cached value and were not marked dirty
    pub suppressed_writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        assert_eq!(HitRate::default().ratio(), 0.0);
        assert_eq!(HitRate { hits: 3, misses: 1 }.ratio(), 0.75);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let stats = CacheStats::new();
        stats.types.hit();
        stats.types.miss();
        stats.record_sync(false);
        stats.record_suppressed_write();
        let snap = stats.snapshot();
        assert_eq!(snap.types, HitRate { hits: 1, misses: 1 });
        assert_eq!(snap.sync_failures, 1);
        assert_eq!(snap.suppressed_writes, 1);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
