//! Time-bounded result cache with single-flight fills.
//!
//! Each key owns an async slot. A caller that misses holds the slot's lock
//! while computing, so concurrent callers for the same key wait for that one
//! computation instead of starting their own. Failed computations are not
//! stored.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

type Slot<V> = Arc<tokio::sync::Mutex<Option<Entry<V>>>>;

pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    /// Fresh value for `key`, or the result of `init` stored under it.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = Arc::clone(self.lock_slots().entry(key).or_default());
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref().filter(|e| self.is_fresh(e)) {
            return Ok(cached.value.clone());
        }

        let value = init().await?;
        *entry = Some(Entry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    pub fn clear(&self) {
        self.lock_slots().clear();
    }

    /// Drop stale and empty slots that no caller is holding.
    pub fn evict_expired(&self) -> usize {
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            // A caller between lookup and lock still holds a clone.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            slot.try_lock()
                .map(|entry| entry.as_ref().is_some_and(|e| self.is_fresh(e)))
                .unwrap_or(true)
        });
        before - slots.len()
    }

    /// Number of fresh entries.
    #[allow(dead_code)] // Inspection helper
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| {
                slot.try_lock()
                    .map(|entry| entry.as_ref().is_some_and(|e| self.is_fresh(e)))
                    .unwrap_or(false)
            })
            .count()
    }

    #[allow(dead_code)] // Inspection helper
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_returns_cached_value_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fill = move || async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst)) };

        assert_eq!(assert_ok!(cache.get_or_try_insert_with("k", fill).await), 0);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(assert_ok!(cache.get_or_try_insert_with("k", fill).await), 0);
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(assert_ok!(cache.get_or_try_insert_with("k", fill).await), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));

        assert_err!(
            cache
                .get_or_try_insert_with("k", || async { Err::<u32, _>("boom") })
                .await
        );
        assert!(cache.is_empty());

        let value = cache
            .get_or_try_insert_with("k", || async { Ok::<_, &str>(7) })
            .await;
        assert_eq!(value, Ok(7));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fill_once() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_insert_with("k", move || async move {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(0));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(10));
        assert_ok!(cache.get_or_try_insert_with("a", || async { Ok::<_, ()>(1) }).await);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_ok!(cache.get_or_try_insert_with("b", || async { Ok::<_, ()>(2) }).await);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.evict_expired(), 0);
    }
}
