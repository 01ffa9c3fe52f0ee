//! Freshness-bounded cache of replica snapshots.
//!
//! Entries are evicted by staleness only, never by size: the working
//! set is bounded by the number of deployed functions. Readers and
//! writers may interleave freely; the last completed write wins.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use faasgate_core::{FunctionStatus, FunctionTarget};

/// Shared cache of `{function → (status, fetched_at)}`.
///
/// `get` never blocks a concurrent `set`; the map is guarded by a
/// reader-biased lock because reads dominate by orders of magnitude.
pub struct ReplicaCache {
    entries: RwLock<HashMap<String, (FunctionStatus, Instant)>>,
    expiry: Duration,
}

impl ReplicaCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    /// Return the most recently seen status and whether it is still
    /// within the freshness window. A function never seen yields a zero
    /// status marked stale.
    pub fn get(&self, target: &FunctionTarget) -> (FunctionStatus, bool) {
        let entries = self.entries.read().expect("replica cache lock");
        match entries.get(&target.key()) {
            Some((status, fetched_at)) => {
                let fresh = fetched_at.elapsed() < self.expiry;
                (status.clone(), fresh)
            }
            None => (FunctionStatus::default(), false),
        }
    }

    /// Install a status snapshot with `fetched_at = now`.
    pub fn set(&self, target: &FunctionTarget, status: &FunctionStatus) {
        let mut entries = self.entries.write().expect("replica cache lock");
        entries.insert(target.key(), (status.clone(), Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str) -> FunctionTarget {
        FunctionTarget::parse(name, "fn").unwrap()
    }

    fn status(available: u64) -> FunctionStatus {
        FunctionStatus {
            replicas: available,
            available_replicas: available,
            min_replicas: 1,
            max_replicas: 5,
            scaling_factor: 20,
            ..Default::default()
        }
    }

    #[test]
    fn missing_entry_is_stale_zero() {
        let cache = ReplicaCache::new(Duration::from_millis(250));
        let (got, fresh) = cache.get(&target("echo"));
        assert!(!fresh);
        assert_eq!(got.replicas, 0);
        assert_eq!(got.available_replicas, 0);
    }

    #[test]
    fn hit_within_expiry_is_fresh() {
        let cache = ReplicaCache::new(Duration::from_millis(500));
        cache.set(&target("echo"), &status(1));

        let (got, fresh) = cache.get(&target("echo"));
        assert!(fresh);
        assert_eq!(got.available_replicas, 1);
    }

    #[tokio::test]
    async fn entry_goes_stale_after_expiry() {
        let cache = ReplicaCache::new(Duration::from_millis(1));
        cache.set(&target("echo"), &status(1));

        tokio::time::sleep(Duration::from_millis(5)).await;

        let (got, fresh) = cache.get(&target("echo"));
        assert!(!fresh, "stale entries must never be returned as fresh");
        // The last-seen value is still handed back for callers that can
        // tolerate staleness.
        assert_eq!(got.available_replicas, 1);
    }

    #[test]
    fn last_write_wins() {
        let cache = ReplicaCache::new(Duration::from_secs(10));
        cache.set(&target("echo"), &status(1));
        cache.set(&target("echo"), &status(3));

        let (got, _) = cache.get(&target("echo"));
        assert_eq!(got.available_replicas, 3);
    }

    #[test]
    fn entries_are_keyed_by_namespace_too() {
        let cache = ReplicaCache::new(Duration::from_secs(10));
        let prod = FunctionTarget::parse("echo.prod", "").unwrap();
        let dev = FunctionTarget::parse("echo.dev", "").unwrap();

        cache.set(&prod, &status(2));

        let (_, fresh) = cache.get(&dev);
        assert!(!fresh);
    }
}
