//! Registry mapping client identities to their token buckets.
//!
//! Buckets are created on first sight of an identity and shared via `Arc` with
//! every request for that identity. The map lock covers lookup and insert only;
//! callers consume from the returned bucket after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::bucket::TokenBucket;
use crate::clock::{Clock, MonotonicClock};
use crate::config::BucketConfig;
use tracing::{debug, info};

/// In-memory identity → bucket map backed by an RwLock.
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl Default for BucketRegistry {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::default()))
    }
}

impl BucketRegistry {
    /// Create an empty registry whose buckets measure refill with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { buckets: RwLock::new(HashMap::new()), clock }
    }

    /// Return the bucket for `identity`, creating a full one from `config` if
    /// none exists.
    ///
    /// `config` is ignored when the identity is already known; a bucket keeps
    /// the parameters it was created with. Concurrent first requests for the
    /// same identity all receive the same bucket.
    pub fn get_or_create(&self, identity: &str, config: &BucketConfig) -> Arc<TokenBucket> {
        if let Some(bucket) = self.read().get(identity) {
            return bucket.clone();
        }

        let mut map = self.write();
        map.entry(identity.to_owned())
            .or_insert_with(|| {
                debug!(
                    target: "bucketgate::registry",
                    identity,
                    max_tokens = config.max_tokens(),
                    refill_rate = config.refill_rate(),
                    "created bucket"
                );
                Arc::new(TokenBucket::new(*config, self.clock.clone()))
            })
            .clone()
    }

    /// Look up an existing bucket without creating one.
    pub fn get(&self, identity: &str) -> Option<Arc<TokenBucket>> {
        self.read().get(identity).cloned()
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of `(identity, balance)` pairs sorted by identity.
    pub fn snapshot(&self) -> Vec<(String, f64)> {
        let map = self.read();
        let mut entries: Vec<(String, f64)> =
            map.iter().map(|(k, v)| (k.clone(), v.tokens())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop buckets idle for at least `idle_after` that would be full if
    /// refilled now. Returns how many were removed.
    ///
    /// Buckets still referenced outside the registry are kept: an in-flight
    /// request may be about to debit them.
    pub fn evict_idle(&self, idle_after: Duration) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, bucket| {
            !(Arc::strong_count(bucket) == 1 && bucket.is_evictable(idle_after))
        });
        let evicted = before - map.len();
        if evicted > 0 {
            info!(
                target: "bucketgate::registry",
                evicted,
                remaining = map.len(),
                "evicted idle buckets"
            );
        }
        evicted
    }

    // Poisoning only happens if a panic escapes while the map is held; the
    // map itself is still consistent, so keep serving from it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}
