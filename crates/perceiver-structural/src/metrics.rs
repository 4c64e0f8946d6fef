//! Process-wide counters for snapshot capture and element listing.
//!
//! Plain atomics so the CLI can print them without a metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static SNAPSHOT_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_CACHE_HIT: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_CACHE_MISS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_NS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_TRUNCATED: AtomicU64 = AtomicU64::new(0);

static LISTING_TOTAL: AtomicU64 = AtomicU64::new(0);
static LISTING_ELEMENTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheMetric {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub snapshot: MetricCounter,
    pub snapshot_cache: CacheMetric,
    pub truncated: u64,
    pub listings: u64,
    pub listed_elements: u64,
}

pub fn record_snapshot(cache_hit: bool, duration: Duration) {
    SNAPSHOT_TOTAL.fetch_add(1, Ordering::Relaxed);
    if cache_hit {
        SNAPSHOT_CACHE_HIT.fetch_add(1, Ordering::Relaxed);
    } else {
        SNAPSHOT_CACHE_MISS.fetch_add(1, Ordering::Relaxed);
    }
    record_latency(&SNAPSHOT_LAT_NS, &SNAPSHOT_LAT_SAMPLES, duration);
}

pub fn record_truncation() {
    SNAPSHOT_TRUNCATED.fetch_add(1, Ordering::Relaxed);
}

/// Counts one paged listing returning `elements` entries.
pub fn record_listing(elements: usize) {
    LISTING_TOTAL.fetch_add(1, Ordering::Relaxed);
    LISTING_ELEMENTS.fetch_add(elements as u64, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        snapshot: make_counter(
            SNAPSHOT_TOTAL.load(Ordering::Relaxed),
            SNAPSHOT_LAT_NS.load(Ordering::Relaxed),
            SNAPSHOT_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        snapshot_cache: make_cache_metric(
            SNAPSHOT_CACHE_HIT.load(Ordering::Relaxed),
            SNAPSHOT_CACHE_MISS.load(Ordering::Relaxed),
        ),
        truncated: SNAPSHOT_TRUNCATED.load(Ordering::Relaxed),
        listings: LISTING_TOTAL.load(Ordering::Relaxed),
        listed_elements: LISTING_ELEMENTS.load(Ordering::Relaxed),
    }
}

fn make_counter(total: u64, nanos: u64, samples: u64) -> MetricCounter {
    let avg_ms = if samples == 0 {
        0.0
    } else {
        (nanos as f64 / samples as f64) / 1_000_000.0
    };
    MetricCounter { total, avg_ms }
}

fn make_cache_metric(hits: u64, misses: u64) -> CacheMetric {
    let total = hits + misses;
    let hit_rate = if total == 0 {
        0.0
    } else {
        hits as f64 * 100.0 / total as f64
    };
    CacheMetric {
        hits,
        misses,
        hit_rate,
    }
}

fn record_latency(total_ns: &AtomicU64, samples: &AtomicU64, duration: Duration) {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    total_ns.fetch_add(nanos, Ordering::Relaxed);
    samples.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_a_percentage() {
        let metric = make_cache_metric(3, 1);
        assert_eq!(metric.hit_rate, 75.0);
        assert_eq!(make_cache_metric(0, 0).hit_rate, 0.0);
        assert_eq!(make_counter(2, 4_000_000, 2).avg_ms, 2.0);
    }
}
