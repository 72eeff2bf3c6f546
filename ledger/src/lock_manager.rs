//! Ordered, exclusive, in-process locks keyed by account or idempotency key.
//!
//! Every caller locks its keys in ascending order, so two operations that
//! touch the same pair of accounts from opposite ends cannot deadlock.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use bakripay_common::{LedgerError, Result};

/// A set of held locks. Dropping it releases every lock in the set.
#[derive(Debug)]
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Manager for per-key exclusive locks.
pub struct LockManager<K> {
    /// One mutex per key seen so far.
    locks: DashMap<K, Arc<Mutex<()>>>,
    /// Deadline for acquiring a whole lock set.
    timeout: Duration,
}

impl<K> LockManager<K>
where
    K: Ord + Hash + Eq + Clone + Display,
{
    /// Create a new lock manager.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire exclusive locks on all `keys`.
    ///
    /// Keys are sorted and deduplicated before locking. If the whole set is
    /// not held within the timeout, locks taken so far are released and
    /// `Busy` is returned.
    pub async fn acquire<I>(&self, keys: I) -> Result<LockSet>
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut guards = Vec::with_capacity(keys.len());

        for key in &keys {
            let mutex = self.mutex_for(key);
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    warn!(key = %key, waited_ms, "Lock acquisition timed out");
                    return Err(LedgerError::Busy { waited_ms });
                }
            }
        }

        debug!(count = keys.len(), "Locks acquired");
        Ok(LockSet { _guards: guards })
    }

    /// Check whether a key is currently locked by someone.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .map(|mutex| {
                let locked = mutex.try_lock().is_err();
                locked
            })
            .unwrap_or(false)
    }

    /// Number of keys with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop lock entries that nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // An entry referenced only by the map has no holder and no waiter.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        let pruned = before.saturating_sub(self.locks.len());
        if pruned > 0 {
            debug!(pruned, "Pruned idle lock entries");
        }
        pruned
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bakripay_common::AccountId;

    fn create_test_lock_manager(timeout_ms: u64) -> LockManager<AccountId> {
        LockManager::new(Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_keys_are_sorted_and_deduplicated() {
        let manager = create_test_lock_manager(100);
        let b = AccountId::new("b");
        let a = AccountId::new("a");

        let set = manager
            .acquire(vec![b.clone(), a.clone(), b.clone()])
            .await
            .unwrap();

        // A duplicate key would wait on itself and time out.
        assert!(manager.is_locked(&a));
        assert!(manager.is_locked(&b));

        drop(set);
        assert!(!manager.is_locked(&a));
    }

    #[tokio::test]
    async fn test_timeout_returns_busy_and_releases_partial_set() {
        let manager = create_test_lock_manager(50);
        let a = AccountId::new("a");
        let b = AccountId::new("b");

        let held = manager.acquire(vec![b.clone()]).await.unwrap();

        let err = manager.acquire(vec![a.clone(), b.clone()]).await.unwrap_err();
        assert!(matches!(err, LedgerError::Busy { .. }));
        // "a" was taken first and must have been given back.
        assert!(!manager.is_locked(&a));

        drop(held);
        assert!(manager.acquire(vec![a, b]).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let manager = Arc::new(create_test_lock_manager(1_000));
        let a = AccountId::new("a");

        let held = manager.acquire(vec![a.clone()]).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            let a = a.clone();
            tokio::spawn(async move { manager.acquire(vec![a]).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_entries() {
        let manager = create_test_lock_manager(100);
        let held = manager.acquire(vec![AccountId::new("a")]).await.unwrap();
        drop(manager.acquire(vec![AccountId::new("b")]).await.unwrap());

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.prune_idle(), 1);
        assert_eq!(manager.len(), 1);

        drop(held);
        assert_eq!(manager.prune_idle(), 1);
        assert!(manager.is_empty());
    }
}
