//! Named, typed caches stored as remote maps.
//!
//! [`CacheManager::get_cache`] picks the backend once per name from the
//! cache's [`CachePolicy`]: a [`PlainMap`] when the policy sets no limits,
//! an [`ExpiringMap`] otherwise. Keys and values are JSON encoded; a `None`
//! value is either stored as [`NULL_SENTINEL`] or turned into a removal,
//! depending on `allow_null_values`.

mod backend;
mod policy;
mod value;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use self::backend::{ExpiringMap, MapBackend, PlainMap};
pub use self::policy::CachePolicy;
pub use self::value::{NULL_SENTINEL, StoredValue};

use self::value::decode_optional;
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::store::SharedStore;

/// Backend and counters shared by every handle onto one named cache.
struct CacheCore {
    backend: Box<dyn MapBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// A typed view of a named cache.
pub struct Cache<K, V> {
    core: Arc<CacheCore>,
    allow_null_values: bool,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            allow_null_values: self.allow_null_values,
            _types: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.core.backend.name())
            .field("allow_null_values", &self.allow_null_values)
            .finish_non_exhaustive()
    }
}

impl<K, V> Cache<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        self.core.backend.name()
    }

    pub fn allows_null_values(&self) -> bool {
        self.allow_null_values
    }

    /// Look up `key`. A stored null counts as a hit and reads as `None`.
    pub async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        let raw = self.core.backend.get(&encode_key(key)?).await?;
        let counter = if raw.is_some() {
            &self.core.hits
        } else {
            &self.core.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(decode_optional(raw)?)
    }

    /// Store `value`, returning the previous one.
    ///
    /// With null values disallowed, `None` removes the key instead.
    pub async fn put(&self, key: &K, value: Option<V>) -> CacheResult<Option<V>> {
        let key = encode_key(key)?;
        let previous = match self.encode_value(value)? {
            Some(raw) => self.core.backend.put(&key, &raw).await?,
            None => self.core.backend.remove(&key).await?,
        };
        Ok(decode_optional(previous)?)
    }

    /// [`put`](Self::put) without reading the previous value.
    pub async fn fast_put(&self, key: &K, value: Option<V>) -> CacheResult<()> {
        let key = encode_key(key)?;
        match self.encode_value(value)? {
            Some(raw) => self.core.backend.fast_put(&key, &raw).await?,
            None => {
                self.core.backend.fast_remove(&[key]).await?;
            }
        }
        Ok(())
    }

    /// Store `value` unless `key` is present; returns the existing value.
    ///
    /// With null values disallowed, `None` only reads the current value.
    pub async fn put_if_absent(&self, key: &K, value: Option<V>) -> CacheResult<Option<V>> {
        let key = encode_key(key)?;
        let existing = match self.encode_value(value)? {
            Some(raw) => self.core.backend.put_if_absent(&key, &raw).await?,
            None => self.core.backend.get(&key).await?,
        };
        Ok(decode_optional(existing)?)
    }

    /// Store `value` unless `key` is present; true when written.
    pub async fn fast_put_if_absent(&self, key: &K, value: Option<V>) -> CacheResult<bool> {
        let key = encode_key(key)?;
        match self.encode_value(value)? {
            Some(raw) => Ok(self.core.backend.fast_put_if_absent(&key, &raw).await?),
            None => Ok(false),
        }
    }

    /// Remove `key`, returning its value.
    pub async fn remove(&self, key: &K) -> CacheResult<Option<V>> {
        let raw = self.core.backend.remove(&encode_key(key)?).await?;
        Ok(decode_optional(raw)?)
    }

    /// Remove several keys; returns how many were present.
    pub async fn fast_remove(&self, keys: &[K]) -> CacheResult<u64> {
        let encoded = keys
            .iter()
            .map(encode_key)
            .collect::<serde_json::Result<Vec<_>>>()?;
        Ok(self.core.backend.fast_remove(&encoded).await?)
    }

    pub async fn clear(&self) -> CacheResult<()> {
        debug!(cache = %self.name(), "clearing cache");
        Ok(self.core.backend.clear().await?)
    }

    pub async fn size(&self) -> CacheResult<u64> {
        Ok(self.core.backend.len().await?)
    }

    pub async fn keys(&self) -> CacheResult<Vec<K>> {
        self.core
            .backend
            .keys()
            .await?
            .iter()
            .map(|raw| serde_json::from_str::<K>(raw).map_err(CacheError::from))
            .collect()
    }

    /// All values; stored nulls appear as `None`.
    pub async fn values(&self) -> CacheResult<Vec<Option<V>>> {
        let raw = self.core.backend.values().await?;
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            out.push(StoredValue::<V>::decode(&value)?.into_option());
        }
        Ok(out)
    }

    /// Number of [`get`](Self::get) calls that found the key.
    pub fn hits(&self) -> u64 {
        self.core.hits.load(Ordering::Relaxed)
    }

    /// Number of [`get`](Self::get) calls that did not.
    pub fn misses(&self) -> u64 {
        self.core.misses.load(Ordering::Relaxed)
    }

    /// `None` when the value must not be stored.
    fn encode_value(&self, value: Option<V>) -> serde_json::Result<Option<String>> {
        if value.is_none() && !self.allow_null_values {
            return Ok(None);
        }
        StoredValue::from_option(value).encode().map(Some)
    }
}

fn encode_key<K: Serialize>(key: &K) -> serde_json::Result<String> {
    serde_json::to_string(key)
}

/// Creates caches by name and hands out shared handles onto them.
pub struct CacheManager {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    allow_null_values: bool,
    policies: HashMap<String, CachePolicy>,
    instances: Mutex<HashMap<String, Arc<CacheCore>>>,
}

impl CacheManager {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            allow_null_values: true,
            policies: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_allow_null_values(mut self, allow: bool) -> Self {
        self.allow_null_values = allow;
        self
    }

    pub fn with_policies(mut self, policies: HashMap<String, CachePolicy>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_policy(mut self, name: impl Into<String>, policy: CachePolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn allow_null_values(&self) -> bool {
        self.allow_null_values
    }

    /// The policy a cache of this name is (or would be) created with.
    pub fn policy(&self, name: &str) -> CachePolicy {
        self.policies.get(name).copied().unwrap_or_default()
    }

    /// The cache called `name`, created on first use.
    ///
    /// Handles for one name share the backend and the hit/miss counters.
    pub fn get_cache<K, V>(&self, name: &str) -> Cache<K, V>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let core = {
            let mut instances = self.instances.lock();
            instances
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(self.create_core(name)))
                .clone()
        };
        Cache {
            core,
            allow_null_values: self.allow_null_values,
            _types: PhantomData,
        }
    }

    fn create_core(&self, name: &str) -> CacheCore {
        let policy = self.policy(name);
        let backend: Box<dyn MapBackend> = if policy.is_unbounded() {
            debug!(cache = %name, "creating plain cache");
            Box::new(PlainMap::new(self.store.clone(), name))
        } else {
            debug!(cache = %name, ?policy, "creating expiring cache");
            Box::new(ExpiringMap::new(
                self.store.clone(),
                self.clock.clone(),
                name,
                policy,
            ))
        };
        CacheCore {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("allow_null_values", &self.allow_null_values)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}
