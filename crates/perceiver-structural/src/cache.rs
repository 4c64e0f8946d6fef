use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::model::Snapshot;

struct CachedSnapshot {
    frames: String,
    snapshot: Snapshot,
    stored: Instant,
}

/// Short-lived snapshot reuse: at most one entry per page, valid while its frame-tree state
/// is unchanged.
#[derive(Default)]
pub struct SnapshotCache {
    entries: DashMap<String, CachedSnapshot>,
    ttl_ms: AtomicU64,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms: AtomicU64::new(duration_to_millis(ttl)),
        }
    }

    /// Replaces whatever `page` had cached and sweeps expired entries of other pages.
    pub fn put(&self, page: &str, frames: String, snapshot: Snapshot) {
        let ttl = self.current_ttl();
        if ttl.is_zero() {
            self.entries.remove(page);
            return;
        }
        self.entries.retain(|_, entry| entry.stored.elapsed() <= ttl);
        self.entries.insert(
            page.to_string(),
            CachedSnapshot {
                frames,
                snapshot,
                stored: Instant::now(),
            },
        );
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms
            .store(duration_to_millis(ttl), Ordering::Relaxed);
    }

    pub fn get(&self, page: &str, frames: &str) -> Option<Snapshot> {
        let ttl = self.current_ttl();
        if let Some(entry) = self.entries.get(page) {
            if entry.frames == frames && entry.stored.elapsed() <= ttl {
                return Some(entry.snapshot.clone());
            }
        }
        self.entries.remove(page);
        None
    }

    pub fn invalidate(&self, page: &str) {
        self.entries.remove(page);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn current_ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    if millis > u128::from(u64::MAX) {
        u64::MAX
    } else {
        millis as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnapshotId;
    use cdp_adapter::PageId;
    use chrono::Utc;

    fn snapshot(page: &str) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(),
            captured_at: Utc::now(),
            page: PageId::from(page),
            url: "about:blank".into(),
            frames: Vec::new(),
            node_count: 0,
            truncated: false,
            truncation_reason: None,
            skipped_frames: Vec::new(),
        }
    }

    #[test]
    fn each_page_keeps_only_its_latest_frame_state() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        for generation in 0..50 {
            cache.put("P1", format!("P1@{generation}"), snapshot("P1"));
        }
        cache.put("P2", "P2@0".into(), snapshot("P2"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("P1", "P1@49").is_some());
        assert!(cache.get("P1", "P1@3").is_none());
        // a stale lookup drops the entry
        assert!(cache.get("P1", "P1@49").is_none());

        cache.invalidate("P2");
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_swept_on_insert() {
        let cache = SnapshotCache::new(Duration::from_millis(1));
        cache.put("P1", "P1@0".into(), snapshot("P1"));
        std::thread::sleep(Duration::from_millis(5));
        cache.put("P2", "P2@0".into(), snapshot("P2"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("P1", "P1@0").is_none());

        cache.set_ttl(Duration::ZERO);
        cache.put("P2", "P2@1".into(), snapshot("P2"));
        assert!(cache.is_empty());
    }
}
