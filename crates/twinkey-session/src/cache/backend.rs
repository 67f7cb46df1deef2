//! Map backends behind a [`Cache`](super::Cache).
//!
//! Both operate on already-encoded keys and values. [`PlainMap`] is one
//! hash named after the cache, with no expiry. [`ExpiringMap`] keeps its
//! entries in the hash `{name}` and adds per-entry TTL, idle expiry and a
//! size bound using three sorted sets:
//!
//! | key                    | score                         |
//! |------------------------|-------------------------------|
//! | `cache:timeout:{name}` | absolute TTL deadline (ms)    |
//! | `cache:idle:{name}`    | absolute idle deadline (ms)   |
//! | `cache:order:{name}`   | access sequence (LRU order)   |
//!
//! All of them carry the `{name}` hash tag and so share a cluster slot.
//!
//! Expired entries are purged before every operation; entries over the
//! size bound are evicted after every write, least recently used first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::CachePolicy;
use crate::clock::{Clock, to_millis};
use crate::error::StoreResult;
use crate::store::SharedStore;

/// Map operations a cache needs from its storage.
#[async_trait]
pub trait MapBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write and return the previous value.
    async fn put(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    async fn fast_put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Write only when absent; returns the existing value otherwise.
    async fn put_if_absent(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    /// Write only when absent; true when written.
    async fn fast_put_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    async fn remove(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remove several keys; returns how many existed.
    async fn fast_remove(&self, keys: &[String]) -> StoreResult<u64>;

    async fn clear(&self) -> StoreResult<()>;

    async fn len(&self) -> StoreResult<u64>;

    async fn keys(&self) -> StoreResult<Vec<String>>;

    async fn values(&self) -> StoreResult<Vec<String>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PlainMap
// ─────────────────────────────────────────────────────────────────────────────

/// A single hash, entries never expire.
pub struct PlainMap {
    store: SharedStore,
    name: String,
}

impl PlainMap {
    pub fn new(store: SharedStore, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }
}

#[async_trait]
impl MapBackend for PlainMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.hget(&self.name, key).await
    }

    async fn put(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        let previous = self.store.hget(&self.name, key).await?;
        self.store.hset(&self.name, key, value).await?;
        Ok(previous)
    }

    async fn fast_put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.hset(&self.name, key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        if self.store.hset_nx(&self.name, key, value).await? {
            return Ok(None);
        }
        self.store.hget(&self.name, key).await
    }

    async fn fast_put_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.store.hset_nx(&self.name, key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<String>> {
        let previous = self.store.hget(&self.name, key).await?;
        if previous.is_some() {
            self.store.hdel(&self.name, &[key.to_string()]).await?;
        }
        Ok(previous)
    }

    async fn fast_remove(&self, keys: &[String]) -> StoreResult<u64> {
        self.store.hdel(&self.name, keys).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.store.del(&[self.name.clone()]).await?;
        Ok(())
    }

    async fn len(&self) -> StoreResult<u64> {
        self.store.hlen(&self.name).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.store.hkeys(&self.name).await
    }

    async fn values(&self) -> StoreResult<Vec<String>> {
        self.store.hvals(&self.name).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ExpiringMap
// ─────────────────────────────────────────────────────────────────────────────

/// A hash with TTL, idle expiry and an LRU size bound.
pub struct ExpiringMap {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    name: String,
    data: String,
    timeouts: String,
    idles: String,
    order: String,
    seq: String,
}

impl ExpiringMap {
    pub fn new(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        name: impl Into<String>,
        policy: CachePolicy,
    ) -> Self {
        let name = name.into();
        Self {
            data: format!("{{{name}}}"),
            timeouts: format!("cache:timeout:{{{name}}}"),
            idles: format!("cache:idle:{{{name}}}"),
            order: format!("cache:order:{{{name}}}"),
            seq: format!("cache:seq:{{{name}}}"),
            store,
            clock,
            policy,
            name,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn now(&self) -> i64 {
        to_millis(self.clock.now())
    }

    fn deadline(&self, now: i64, after_ms: u64) -> i64 {
        now.saturating_add(i64::try_from(after_ms).unwrap_or(i64::MAX))
    }

    /// Drop entries whose TTL or idle deadline has passed.
    async fn purge(&self) -> StoreResult<()> {
        let now = self.now();
        let mut expired = self.store.zrange_by_score(&self.timeouts, now).await?;
        for key in self.store.zrange_by_score(&self.idles, now).await? {
            if !expired.contains(&key) {
                expired.push(key);
            }
        }
        if expired.is_empty() {
            return Ok(());
        }
        trace!(cache = %self.name, count = expired.len(), "purging expired entries");
        self.forget(&expired).await?;
        Ok(())
    }

    /// Remove entries and their bookkeeping; returns how many entries existed.
    async fn forget(&self, keys: &[String]) -> StoreResult<u64> {
        let removed = self.store.hdel(&self.data, keys).await?;
        self.store.zrem(&self.timeouts, keys).await?;
        self.store.zrem(&self.idles, keys).await?;
        self.store.zrem(&self.order, keys).await?;
        Ok(removed)
    }

    /// Record a read: push the idle deadline out and mark most recently used.
    async fn accessed(&self, key: &str) -> StoreResult<()> {
        if self.policy.max_idle_ms > 0 {
            let deadline = self.deadline(self.now(), self.policy.max_idle_ms);
            self.store.zadd(&self.idles, key, deadline).await?;
        }
        if self.policy.max_size > 0 {
            let seq = self.store.incr(&self.seq).await?;
            self.store.zadd(&self.order, key, seq).await?;
        }
        Ok(())
    }

    async fn write(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.hset(&self.data, key, value).await?;
        if self.policy.ttl_ms > 0 {
            let deadline = self.deadline(self.now(), self.policy.ttl_ms);
            self.store.zadd(&self.timeouts, key, deadline).await?;
        }
        self.accessed(key).await?;
        self.evict().await
    }

    /// Trim down to `max_size`, least recently used first.
    async fn evict(&self) -> StoreResult<()> {
        if self.policy.max_size == 0 {
            return Ok(());
        }
        let len = self.store.hlen(&self.data).await?;
        if len <= self.policy.max_size {
            return Ok(());
        }
        let excess = usize::try_from(len - self.policy.max_size).unwrap_or(usize::MAX);
        let victims = self.store.zrange_lowest(&self.order, excess).await?;
        debug!(cache = %self.name, evicted = ?victims, "cache over size bound");
        self.forget(&victims).await?;
        Ok(())
    }
}

#[async_trait]
impl MapBackend for ExpiringMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.purge().await?;
        let value = self.store.hget(&self.data, key).await?;
        if value.is_some() {
            self.accessed(key).await?;
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        self.purge().await?;
        let previous = self.store.hget(&self.data, key).await?;
        self.write(key, value).await?;
        Ok(previous)
    }

    async fn fast_put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.purge().await?;
        self.write(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        self.purge().await?;
        let existing = self.store.hget(&self.data, key).await?;
        if existing.is_none() {
            self.write(key, value).await?;
        }
        Ok(existing)
    }

    async fn fast_put_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.purge().await?;
        if self.store.hexists(&self.data, key).await? {
            return Ok(false);
        }
        self.write(key, value).await?;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<String>> {
        self.purge().await?;
        let previous = self.store.hget(&self.data, key).await?;
        if previous.is_some() {
            self.forget(&[key.to_string()]).await?;
        }
        Ok(previous)
    }

    async fn fast_remove(&self, keys: &[String]) -> StoreResult<u64> {
        self.purge().await?;
        self.forget(keys).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.store
            .del(&[
                self.data.clone(),
                self.timeouts.clone(),
                self.idles.clone(),
                self.order.clone(),
                self.seq.clone(),
            ])
            .await?;
        Ok(())
    }

    async fn len(&self) -> StoreResult<u64> {
        self.purge().await?;
        self.store.hlen(&self.data).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.purge().await?;
        self.store.hkeys(&self.data).await
    }

    async fn values(&self) -> StoreResult<Vec<String>> {
        self.purge().await?;
        self.store.hvals(&self.data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, from_millis};
    use crate::store::{MemoryStore, RecordStore};

    fn expiring(policy: CachePolicy) -> (Arc<MemoryStore>, Arc<ManualClock>, ExpiringMap) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(from_millis(1_700_000_000_000).unwrap()));
        let map = ExpiringMap::new(store.clone(), clock.clone(), "m", policy);
        (store, clock, map)
    }

    fn ms(n: i64) -> chrono::Duration {
        chrono::Duration::milliseconds(n)
    }

    #[tokio::test]
    async fn test_plain_map_operations() {
        let store = Arc::new(MemoryStore::new());
        let map = PlainMap::new(store.clone(), "plain");

        assert_eq!(map.put("a", "1").await.unwrap(), None);
        assert_eq!(map.put("a", "2").await.unwrap(), Some("1".to_string()));
        assert_eq!(map.put_if_absent("a", "3").await.unwrap(), Some("2".to_string()));
        assert!(map.fast_put_if_absent("b", "4").await.unwrap());
        assert!(!map.fast_put_if_absent("b", "5").await.unwrap());
        assert_eq!(map.len().await.unwrap(), 2);

        assert_eq!(map.remove("a").await.unwrap(), Some("2".to_string()));
        assert_eq!(map.remove("a").await.unwrap(), None);
        assert_eq!(
            map.fast_remove(&["b".into(), "zz".into()]).await.unwrap(),
            1
        );

        map.fast_put("c", "6").await.unwrap();
        map.clear().await.unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_ttl_expires_entries() {
        let policy = CachePolicy {
            ttl_ms: 1_000,
            ..CachePolicy::default()
        };
        let (_store, clock, map) = expiring(policy);

        map.fast_put("a", "1").await.unwrap();
        clock.advance(ms(600));
        assert_eq!(map.get("a").await.unwrap().as_deref(), Some("1"));

        // Reads do not extend a TTL.
        clock.advance(ms(500));
        assert_eq!(map.get("a").await.unwrap(), None);
        assert_eq!(map.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_refreshed_by_reads() {
        let policy = CachePolicy {
            max_idle_ms: 500,
            ..CachePolicy::default()
        };
        let (_store, clock, map) = expiring(policy);

        map.fast_put("read", "1").await.unwrap();
        map.fast_put("unread", "2").await.unwrap();

        clock.advance(ms(200));
        assert!(map.get("read").await.unwrap().is_some());

        clock.advance(ms(400));
        assert_eq!(map.get("read").await.unwrap().as_deref(), Some("1"));
        assert_eq!(map.get("unread").await.unwrap(), None);
        assert_eq!(map.keys().await.unwrap(), vec!["read"]);
    }

    #[tokio::test]
    async fn test_max_size_evicts_least_recently_used() {
        let policy = CachePolicy {
            max_size: 5,
            ..CachePolicy::default()
        };
        let (_store, _clock, map) = expiring(policy);

        for i in 1..=5 {
            map.fast_put(&format!("key{i}"), "v").await.unwrap();
        }
        map.fast_put("key6", "v").await.unwrap();

        assert_eq!(map.len().await.unwrap(), 5);
        assert_eq!(map.get("key1").await.unwrap(), None);
        assert!(map.get("key6").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reads_protect_from_eviction() {
        let policy = CachePolicy {
            max_size: 2,
            ..CachePolicy::default()
        };
        let (_store, _clock, map) = expiring(policy);

        map.fast_put("a", "1").await.unwrap();
        map.fast_put("b", "2").await.unwrap();
        map.get("a").await.unwrap();
        map.fast_put("c", "3").await.unwrap();

        let mut keys = map.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_expiring_clear_removes_bookkeeping() {
        let policy = CachePolicy {
            ttl_ms: 10_000,
            max_idle_ms: 10_000,
            max_size: 10,
        };
        let (store, _clock, map) = expiring(policy);
        map.fast_put("a", "1").await.unwrap();
        assert!(store.key_count() > 1);

        map.clear().await.unwrap();
        assert_eq!(store.key_count(), 0);
        assert!(!store.exists("{m}").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiring_keys_share_hash_tag() {
        let policy = CachePolicy {
            ttl_ms: 10_000,
            max_idle_ms: 10_000,
            max_size: 10,
        };
        let (store, _clock, map) = expiring(policy);
        map.fast_put("a", "1").await.unwrap();

        assert_eq!(store.hget("{m}", "a").await.unwrap().as_deref(), Some("1"));
        for key in [
            "{m}",
            "cache:timeout:{m}",
            "cache:idle:{m}",
            "cache:order:{m}",
            "cache:seq:{m}",
        ] {
            assert!(store.exists(key).await.unwrap(), "{key}");
            assert_eq!(crate::keys::hash_tag(key), Some("m"));
        }
    }

    #[tokio::test]
    async fn test_expiring_remove() {
        let policy = CachePolicy {
            max_idle_ms: 10_000,
            ..CachePolicy::default()
        };
        let (store, _clock, map) = expiring(policy);
        map.fast_put("a", "1").await.unwrap();

        assert_eq!(map.remove("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.zcard("cache:idle:{m}").await.unwrap(), 0);
        assert_eq!(map.fast_remove(&["a".into()]).await.unwrap(), 0);
    }
}
