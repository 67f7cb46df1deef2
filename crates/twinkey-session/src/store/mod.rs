//! Access to the remote key-value store.
//!
//! [`RecordStore`] is the seam between the session/cache logic and the
//! store. It exposes hash records with whole-record expiration, the small set
//! of sorted-set and counter commands the expiring cache map needs, and
//! evaluation of the named [`SessionScript`]s.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::error::StoreResult;
use crate::script::SessionScript;

/// A store handle shared by sessions and caches.
pub type SharedStore = Arc<dyn RecordStore>;

/// Reply of a [`SessionScript`] evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl ScriptReply {
    /// The reply as text, `None` for nil.
    pub fn into_text(self) -> Option<String> {
        match self {
            ScriptReply::Text(s) => Some(s),
            ScriptReply::Int(n) => Some(n.to_string()),
            ScriptReply::Nil | ScriptReply::List(_) => None,
        }
    }

    /// The reply as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptReply::Int(n) => Some(*n),
            ScriptReply::Text(s) => s.parse().ok(),
            ScriptReply::Nil | ScriptReply::List(_) => None,
        }
    }

    /// The reply as a list of strings (nil is an empty list).
    pub fn into_list(self) -> Vec<String> {
        match self {
            ScriptReply::List(items) => items,
            ScriptReply::Text(s) => vec![s],
            ScriptReply::Int(n) => vec![n.to_string()],
            ScriptReply::Nil => Vec::new(),
        }
    }
}

/// Commands issued against the remote store.
///
/// Every method is one round trip. Implementations must be safe to share
/// between tasks; no client-side locking spans two calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// `HGET`.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// `HMGET`; one entry per requested field.
    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// `HSET` of one field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// `HSET` of several fields.
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    /// `HSETNX`; true when the field was written.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// `HDEL`; returns the number of removed fields.
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64>;

    /// `HEXISTS`.
    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// `HKEYS`.
    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>>;

    /// `HVALS`.
    async fn hvals(&self, key: &str) -> StoreResult<Vec<String>>;

    /// `HLEN`.
    async fn hlen(&self, key: &str) -> StoreResult<u64>;

    /// `EXISTS`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// `PTTL`: remaining milliseconds, `-1` without expiry, `-2` if missing.
    async fn pttl(&self, key: &str) -> StoreResult<i64>;

    /// `PEXPIRE`; true when the key exists and the TTL was set.
    async fn pexpire(&self, key: &str, millis: i64) -> StoreResult<bool>;

    /// `DEL`; returns the number of removed keys.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// `INCR`.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// `ZADD` of one member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()>;

    /// `ZREM`; returns the number of removed members.
    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// Members with score `<= max`, lowest first.
    async fn zrange_by_score(&self, key: &str, max: i64) -> StoreResult<Vec<String>>;

    /// The `count` lowest-scored members.
    async fn zrange_lowest(&self, key: &str, count: usize) -> StoreResult<Vec<String>>;

    /// `ZCARD`.
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Evaluate a session script atomically.
    async fn eval(
        &self,
        script: SessionScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply>;
}
