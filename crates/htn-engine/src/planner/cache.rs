// Copyright 2026 Covenant Labs

//! Plan Cache: a bounded, fingerprint-keyed cache of
//! recent Plans. Entries are evicted least-recently-used; a TTL bounds
//! staleness independent of LRU pressure. Cache hits still go through
//! policy validation — this cache only saves re-decomposition, not the
//! downstream checks.

use crate::plan::Plan;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct Entry {
    plan: Plan,
    inserted_at: Instant,
}

/// Concurrent-read / guarded-write: lookups and inserts both
/// take the same lock, but it is held only for the duration of the LRU
/// operation itself, never across a planning call.
pub struct PlanCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl PlanCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Returns a clone of the cached plan if present and not expired.
    /// Expired entries are evicted on lookup.
    pub fn get(&self, fingerprint: &str) -> Option<Plan> {
        let mut guard = self.inner.lock();
        let fresh = guard.get(fingerprint).map(|e| e.inserted_at.elapsed() < self.ttl).unwrap_or(false);
        if !fresh {
            guard.pop(fingerprint);
            return None;
        }
        guard.get(fingerprint).map(|e| e.plan.clone())
    }

    pub fn insert(&self, plan: Plan) {
        let fingerprint = plan.fingerprint.clone();
        self.inner.lock().put(fingerprint, Entry { plan, inserted_at: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerStrategy;
    use crate::graph::TaskGraph;
    use crate::task::Task;
    use std::collections::BTreeSet;
    use std::thread::sleep;

    fn plan(query: &str) -> Plan {
        let mut graph = TaskGraph::new(query, "goal");
        graph.add(Task::new("t1", "n", "a")).unwrap();
        Plan::new(graph, PlannerStrategy::RuleBased, 0.8, "x", &BTreeSet::new())
    }

    #[test]
    fn hit_after_insert() {
        let cache = PlanCache::new(8, Duration::from_secs(60));
        let p = plan("q1");
        cache.insert(p.clone());
        assert!(cache.get(&p.fingerprint).is_some());
    }

    #[test]
    fn miss_when_absent() {
        let cache = PlanCache::new(8, Duration::from_secs(60));
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn expires_after_ttl() {
        let cache = PlanCache::new(8, Duration::from_millis(10));
        let p = plan("q2");
        cache.insert(p.clone());
        sleep(Duration::from_millis(30));
        assert!(cache.get(&p.fingerprint).is_none());
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let cache = PlanCache::new(1, Duration::from_secs(60));
        let a = plan("q-a");
        let b = plan("q-b");
        cache.insert(a.clone());
        cache.insert(b.clone());
        assert!(cache.get(&a.fingerprint).is_none());
        assert!(cache.get(&b.fingerprint).is_some());
    }
}
