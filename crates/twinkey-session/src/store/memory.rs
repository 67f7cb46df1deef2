//! In-process [`RecordStore`] with Redis expiry semantics.
//!
//! Keys expire lazily on access. As in Redis, a hash or sorted set whose last
//! member is removed is deleted, taking its TTL with it; a later write
//! recreates it without expiry. Session scripts run natively while the
//! store lock is held, which makes them atomic with respect to every other
//! call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RecordStore, ScriptReply};
use crate::error::{StoreError, StoreResult};
use crate::script::{ScriptHost, SessionScript};

#[derive(Debug)]
enum Data {
    Hash(HashMap<String, String>),
    Sorted(HashMap<String, i64>),
    Counter(i64),
}

#[derive(Debug)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.data {
            Data::Hash(h) => h.is_empty(),
            Data::Sorted(z) => z.is_empty(),
            Data::Counter(_) => false,
        }
    }
}

fn invalid_expire_time() -> StoreError {
    StoreError::Backend("ERR invalid expire time in 'pexpire' command".to_string())
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// The live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(Entry::is_empty) {
            self.entries.remove(key);
        }
    }

    fn hash(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Hash(h),
                ..
            }) => Ok(Some(h)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_or_create(&mut self, key: &str) -> StoreResult<&mut HashMap<String, String>> {
        if self.live(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Data::Hash(HashMap::new())));
        }
        self.hash(key)?.ok_or_else(|| wrong_type(key))
    }

    fn sorted(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, i64>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Sorted(z),
                ..
            }) => Ok(Some(z)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hash_or_create(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hset_nx(&mut self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let hash = self.hash_or_create(key)?;
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        let removed = match self.hash(key)? {
            None => 0,
            Some(hash) => fields.iter().filter(|f| hash.remove(*f).is_some()).count() as u64,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn hkeys(&mut self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .hash(key)?
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn pttl(&mut self, key: &str) -> i64 {
        match self.live(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => at.saturating_duration_since(Instant::now()).as_millis() as i64,
        }
    }

    fn pexpire(&mut self, key: &str, millis: i64) -> StoreResult<bool> {
        // Redis refuses deadlines past the end of the millisecond clock.
        let deadline = if millis > 0 {
            if millis.checked_add(chrono::Utc::now().timestamp_millis()).is_none() {
                return Err(invalid_expire_time());
            }
            let after = Duration::from_millis(millis.unsigned_abs());
            Some(Instant::now().checked_add(after).ok_or_else(invalid_expire_time)?)
        } else {
            None
        };
        if self.live(key).is_none() {
            return Ok(false);
        }
        match deadline {
            None => {
                self.entries.remove(key);
            }
            Some(at) => {
                if let Some(entry) = self.entries.get_mut(key) {
                    entry.expires_at = Some(at);
                }
            }
        }
        Ok(true)
    }

    fn del(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }
}

impl ScriptHost for Inner {
    fn pttl(&mut self, key: &str) -> i64 {
        Inner::pttl(self, key)
    }

    fn hexists(&mut self, key: &str, field: &str) -> bool {
        matches!(self.hget(key, field), Ok(Some(_)))
    }

    fn hget(&mut self, key: &str, field: &str) -> Option<String> {
        Inner::hget(self, key, field).ok().flatten()
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) {
        let _ = Inner::hset(self, key, field, value);
    }

    fn hset_nx(&mut self, key: &str, field: &str, value: &str) -> bool {
        Inner::hset_nx(self, key, field, value).unwrap_or(false)
    }

    fn hdel(&mut self, key: &str, field: &str) -> bool {
        Inner::hdel(self, key, &[field.to_string()]).unwrap_or(0) > 0
    }

    fn hkeys(&mut self, key: &str) -> Vec<String> {
        Inner::hkeys(self, key).unwrap_or_default()
    }

    fn pexpire(&mut self, key: &str, millis: i64) -> StoreResult<bool> {
        Inner::pexpire(self, key, millis)
    }

    fn unlink(&mut self, key: &str) -> bool {
        self.del(key)
    }
}

/// In-memory store for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.entries.retain(|_, e| !e.is_expired(now));
        inner.entries.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.lock().hget(key, field)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let mut inner = self.inner.lock();
        let hash = inner.hash(key)?;
        Ok(fields
            .iter()
            .map(|f| hash.as_ref().and_then(|h| h.get(*f).cloned()))
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.inner.lock().hset(key, field, value)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let hash = inner.hash_or_create(key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.inner.lock().hset_nx(key, field, value)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        self.inner.lock().hdel(key, fields)
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().hget(key, field)?.is_some())
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.lock().hkeys(key)
    }

    async fn hvals(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .hash(key)?
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.inner.lock().hash(key)?.map_or(0, |h| h.len() as u64))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().live(key).is_some())
    }

    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        Ok(self.inner.lock().pttl(key))
    }

    async fn pexpire(&self, key: &str, millis: i64) -> StoreResult<bool> {
        self.inner.lock().pexpire(key, millis)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        Ok(keys.iter().filter(|k| inner.del(k)).count() as u64)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        match inner.live(key) {
            None => {
                inner
                    .entries
                    .insert(key.to_string(), Entry::new(Data::Counter(1)));
                Ok(1)
            }
            Some(Entry {
                data: Data::Counter(n),
                ..
            }) => {
                *n += 1;
                Ok(*n)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.live(key).is_none() {
            inner
                .entries
                .insert(key.to_string(), Entry::new(Data::Sorted(HashMap::new())));
        }
        let set = inner.sorted(key)?.ok_or_else(|| wrong_type(key))?;
        set.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let removed = match inner.sorted(key)? {
            None => 0,
            Some(set) => members.iter().filter(|m| set.remove(*m).is_some()).count() as u64,
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn zrange_by_score(&self, key: &str, max: i64) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sorted(key)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, &i64)> = set.iter().filter(|(_, s)| **s <= max).collect();
        members.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrange_lowest(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sorted(key)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, &i64)> = set.iter().collect();
        members.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members
            .into_iter()
            .take(count)
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.inner.lock().sorted(key)?.map_or(0, |z| z.len() as u64))
    }

    async fn eval(
        &self,
        script: SessionScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        let mut inner = self.inner.lock();
        script.execute(&mut *inner, keys, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test]
    async fn test_hash_round_trip() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store
            .hset_all("h", &[("b".into(), "2".into()), ("c".into(), "3".into())])
            .await
            .unwrap();

        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.hlen("h").await.unwrap(), 3);
        assert_eq!(
            store.hmget("h", &["a", "missing", "c"]).await.unwrap(),
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
        assert!(store.hexists("h", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_hset_nx_first_write_wins() {
        let store = MemoryStore::new();
        assert!(store.hset_nx("h", "f", "first").await.unwrap());
        assert!(!store.hset_nx("h", "f", "second").await.unwrap());
        assert_eq!(store.hget("h", "f").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_pttl_states() {
        let store = MemoryStore::new();
        assert_eq!(store.pttl("missing").await.unwrap(), -2);

        store.hset("h", "f", "v").await.unwrap();
        assert_eq!(store.pttl("h").await.unwrap(), -1);

        assert!(store.pexpire("h", 10_000).await.unwrap());
        let ttl = store.pttl("h").await.unwrap();
        assert!(ttl > 9_000 && ttl <= 10_000, "ttl was {ttl}");

        assert!(!store.pexpire("missing", 1_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_expire() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();
        store.pexpire("h", 20).await.unwrap();

        thread::sleep(Duration::from_millis(40));

        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.hget("h", "f").await.unwrap(), None);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_emptied_hash_loses_ttl() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();
        store.pexpire("h", 60_000).await.unwrap();

        store.hdel("h", &["f".to_string()]).await.unwrap();
        assert!(!store.exists("h").await.unwrap());

        // Recreated without expiry.
        store.hset("h", "g", "v").await.unwrap();
        assert_eq!(store.pttl("h").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_non_positive_pexpire_deletes() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();
        assert!(store.pexpire("h", 0).await.unwrap());
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_pexpire_rejects_overflowing_deadline() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();
        store.pexpire("h", 60_000).await.unwrap();

        let err = store.pexpire("h", i64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("invalid expire time")));
        // The previous expiry is left in place.
        let ttl = store.pttl("h").await.unwrap();
        assert!(ttl > 0 && ttl <= 60_000);
    }

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let store = MemoryStore::new();
        store.zadd("z", "c", 30).await.unwrap();
        store.zadd("z", "a", 10).await.unwrap();
        store.zadd("z", "b", 20).await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(store.zrange_by_score("z", 20).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.zrange_lowest("z", 1).await.unwrap(), vec!["a"]);

        store
            .zrem("z", &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert!(!store.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.incr("n").await.unwrap();
        assert!(matches!(
            store.hget("n", "f").await,
            Err(StoreError::Backend(_))
        ));
        assert_eq!(store.incr("n").await.unwrap(), 2);
    }
}
