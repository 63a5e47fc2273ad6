//! Sharded arena of per-key async mutexes.
//!
//! Serializes work for one key (a user pair, a conversation) without a
//! global lock. Handles are created lazily on first use and held only
//! through `Weak` references by the arena, so a key whose guards and waiters
//! are all gone is idle and gets pruned.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Shards above this size are swept for idle entries on insert.
const SWEEP_THRESHOLD: usize = 64;

type Shard<K> = Mutex<HashMap<K, Weak<AsyncMutex<()>>>>;

pub struct KeyedLocks<K> {
    shards: Vec<Shard<K>>,
}

/// Exclusive access to one key. Released on drop.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard_for(&self, key: &K) -> &Shard<K> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard {
        let handle = {
            let mut shard = self
                .shard_for(&key)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match shard.get(&key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    if shard.len() >= SWEEP_THRESHOLD {
                        shard.retain(|_, handle| handle.strong_count() > 0);
                    }
                    let fresh = Arc::new(AsyncMutex::new(()));
                    shard.insert(key, Arc::downgrade(&fresh));
                    fresh
                }
            }
        };

        KeyGuard {
            _guard: handle.lock_owned().await,
        }
    }

    /// Drop every idle entry. Returns the number of entries removed.
    pub fn purge_idle(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = shard.len();
            shard.retain(|_, handle| handle.strong_count() > 0);
            removed += before - shard.len();
        }
        if removed > 0 {
            debug!(removed, "Purged idle key locks");
        }
        removed
    }

    /// Number of tracked keys, idle ones included.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn idle_keys_are_purged() {
        let locks: KeyedLocks<u32> = KeyedLocks::new(4);
        {
            let _a = locks.lock(1).await;
            let _b = locks.lock(2).await;
            assert_eq!(locks.len(), 2);
            assert_eq!(locks.purge_idle(), 0);
        }
        assert_eq!(locks.purge_idle(), 2);
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<&'static str>::new(8));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("pair").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let locks: KeyedLocks<u32> = KeyedLocks::new(1);
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(b.is_ok());
    }
}
