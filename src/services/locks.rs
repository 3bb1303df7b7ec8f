//! In-process mutual exclusion keyed by schedule id or owner.

use dashmap::{DashMap, DashSet};
use std::{hash::Hash, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key, created on first use.
///
/// Serialises packaging, retention, deletion and restore against the same
/// owner's backup directory.
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<AsyncMutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of keys with an execution in flight.
///
/// `try_claim` never waits: a second claim for a key that is already held
/// fails until the first [`Claim`] is dropped.
pub struct ClaimSet<K: Eq + Hash + Clone> {
    held: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> ClaimSet<K> {
    pub fn new() -> Self {
        Self {
            held: Arc::new(DashSet::new()),
        }
    }

    pub fn try_claim(&self, key: K) -> Option<Claim<K>> {
        self.held.insert(key.clone()).then(|| Claim {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_claimed(&self, key: &K) -> bool {
        self.held.contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for ClaimSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its key when dropped.
pub struct Claim<K: Eq + Hash + Clone> {
    key: K,
    held: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> Drop for Claim<K> {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let claims = ClaimSet::new();
        let first = claims.try_claim(1u32).unwrap();
        assert!(claims.try_claim(1).is_none());
        assert!(claims.try_claim(2).is_some());
        assert!(claims.is_claimed(&1));
        drop(first);
        assert!(!claims.is_claimed(&1));
        assert!(claims.try_claim(1).is_some());
    }

    #[tokio::test]
    async fn keyed_lock_serialises_same_key() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let guard = locks.lock(&"alice".to_string()).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.lock(&"alice".to_string()).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // A different owner is not blocked.
        let _bob = locks.lock(&"bob".to_string()).await;

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
