//! Session handle built from independent store commands.
//!
//! Guards run client-side before each mutation, so another writer can stop
//! or expire the session in between. Two races are detected after the fact:
//!
//! - `stop` finds the info record without a TTL: the record expired before
//!   `HSETNX` recreated it. The stray record is deleted and the call fails
//!   with [`SessionError::Expired`].
//! - `set_attribute` finds both records without a TTL: the session expired
//!   mid-write. Both records are deleted and the call fails with
//!   [`SessionError::Invalid`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{
    Session, SessionTemplate, decode_attribute, encode_attribute, field, parse_host,
    parse_millis, parse_timestamp, validate_timeout,
};
use crate::clock::{Clock, to_millis};
use crate::error::{Result, SessionError};
use crate::keys::{SessionId, SessionKeys};
use crate::store::SharedStore;

/// Session whose operations are plain command sequences.
pub struct DirectSession {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    id: SessionId,
    keys: SessionKeys,
}

impl DirectSession {
    /// Persist `template` and return a handle onto it.
    pub async fn create(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        template: &SessionTemplate,
    ) -> Result<Self> {
        let id = template.require_id()?;
        let session = Self::handle(store, clock, id)?;

        let timeout = template.effective_timeout_ms();
        validate_timeout(timeout)?;
        let start = to_millis(
            template
                .start_timestamp
                .unwrap_or_else(|| session.clock.now()),
        )
        .to_string();
        let fields = [
            (field::ID.to_string(), session.id.to_string()),
            (field::TIMEOUT.to_string(), timeout.to_string()),
            (field::START.to_string(), start.clone()),
            (field::LAST_ACCESS.to_string(), start),
            (
                field::HOST.to_string(),
                template.host.clone().unwrap_or_default(),
            ),
        ];
        session.store.hset_all(&session.keys.info, &fields).await?;
        session.store.pexpire(&session.keys.info, timeout).await?;

        info!(session_id = %session.id, timeout_ms = timeout, "session created");
        Ok(session)
    }

    /// Open a handle onto an existing session.
    ///
    /// Fails with [`SessionError::Expired`] when the info record is gone and
    /// [`SessionError::Stopped`] when it carries a stop marker.
    pub async fn open(store: SharedStore, clock: Arc<dyn Clock>, id: SessionId) -> Result<Self> {
        let session = Self::handle(store, clock, id)?;
        if !session.store.exists(&session.keys.info).await? {
            return Err(SessionError::Expired);
        }
        if session
            .store
            .hexists(&session.keys.info, field::STOP)
            .await?
        {
            return Err(SessionError::Stopped);
        }
        Ok(session)
    }

    fn handle(store: SharedStore, clock: Arc<dyn Clock>, id: SessionId) -> Result<Self> {
        if id.is_empty() {
            return Err(SessionError::IllegalArgument(
                "session id must not be empty".to_string(),
            ));
        }
        let keys = SessionKeys::for_id(&id);
        Ok(Self {
            store,
            clock,
            id,
            keys,
        })
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Expiry then stop marker.
    async fn guard(&self) -> Result<()> {
        if self.store.pttl(&self.keys.info).await? <= 0 {
            return Err(SessionError::Expired);
        }
        if self.store.hexists(&self.keys.info, field::STOP).await? {
            return Err(SessionError::Stopped);
        }
        Ok(())
    }

    /// Read one info field; a miss is classified before reporting invalid.
    async fn read_field(&self, name: &str) -> Result<String> {
        let mut values = self
            .store
            .hmget(&self.keys.info, &[name, field::STOP])
            .await?
            .into_iter();
        let value = values.next().flatten();
        let stopped = values.next().flatten().is_some();

        if stopped {
            return Err(SessionError::Stopped);
        }
        if let Some(value) = value {
            return Ok(value);
        }
        if self.store.pttl(&self.keys.info).await? <= 0 {
            return Err(SessionError::Expired);
        }
        Err(SessionError::Invalid)
    }

    async fn rearm(&self, timeout_ms: i64) -> Result<()> {
        self.store.pexpire(&self.keys.info, timeout_ms).await?;
        self.store.pexpire(&self.keys.attr, timeout_ms).await?;
        Ok(())
    }

    async fn delete_records(&self) -> Result<()> {
        self.store.del(&self.keys.both()).await?;
        Ok(())
    }
}

impl fmt::Debug for DirectSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSession")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for DirectSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn start_timestamp(&self) -> Result<DateTime<Utc>> {
        let raw = self.read_field(field::START).await?;
        parse_timestamp(field::START, &raw)
    }

    async fn last_access_time(&self) -> Result<DateTime<Utc>> {
        let raw = self.read_field(field::LAST_ACCESS).await?;
        parse_timestamp(field::LAST_ACCESS, &raw)
    }

    async fn timeout(&self) -> Result<i64> {
        let raw = self.read_field(field::TIMEOUT).await?;
        parse_millis(field::TIMEOUT, &raw)
    }

    async fn set_timeout(&self, timeout_ms: i64) -> Result<()> {
        validate_timeout(timeout_ms)?;
        let current = self.read_field(field::TIMEOUT).await?;
        if parse_millis(field::TIMEOUT, &current)? == timeout_ms {
            return Ok(());
        }
        self.store
            .hset(&self.keys.info, field::TIMEOUT, &timeout_ms.to_string())
            .await?;
        self.rearm(timeout_ms).await
    }

    async fn host(&self) -> Result<Option<String>> {
        let raw = self.read_field(field::HOST).await?;
        Ok(parse_host(raw))
    }

    async fn touch(&self) -> Result<()> {
        let raw = self.read_field(field::TIMEOUT).await?;
        let timeout = parse_millis(field::TIMEOUT, &raw)?;
        let now = to_millis(self.clock.now()).to_string();
        self.store
            .hset(&self.keys.info, field::LAST_ACCESS, &now)
            .await?;
        self.rearm(timeout).await
    }

    async fn stop(&self) -> Result<()> {
        if self.store.pttl(&self.keys.info).await? <= 0 {
            return Err(SessionError::Expired);
        }
        let now = to_millis(self.clock.now()).to_string();
        let first = self
            .store
            .hset_nx(&self.keys.info, field::STOP, &now)
            .await?;

        if self.store.pttl(&self.keys.info).await? == -1 {
            warn!(session_id = %self.id, "session expired during stop, removing stray record");
            self.delete_records().await?;
            return Err(SessionError::Expired);
        }

        if first {
            info!(session_id = %self.id, "session stopped");
        }
        Ok(())
    }

    async fn attribute_keys(&self) -> Result<Vec<String>> {
        self.guard().await?;
        Ok(self.store.hkeys(&self.keys.attr).await?)
    }

    async fn attribute(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.guard().await?;
        let raw = self.store.hget(&self.keys.attr, key).await?;
        decode_attribute(raw)
    }

    async fn set_attribute(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let encoded = encode_attribute(&value)?;
        self.guard().await?;
        self.store.hset(&self.keys.attr, key, &encoded).await?;

        if self.store.pttl(&self.keys.attr).await? > 0 {
            return Ok(());
        }
        let info_ttl = self.store.pttl(&self.keys.info).await?;
        if info_ttl <= 0 {
            warn!(session_id = %self.id, "session expired during attribute write, removing records");
            self.delete_records().await?;
            return Err(SessionError::Invalid);
        }
        debug!(session_id = %self.id, ttl_ms = info_ttl, "re-arming attribute ttl");
        self.store.pexpire(&self.keys.attr, info_ttl).await?;
        Ok(())
    }

    async fn remove_attribute(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.guard().await?;
        let raw = self.store.hget(&self.keys.attr, key).await?;
        if raw.is_some() {
            self.store.hdel(&self.keys.attr, &[key.to_string()]).await?;
        }
        decode_attribute(raw)
    }

    async fn remaining_ttl(&self) -> Result<i64> {
        Ok(self.store.pttl(&self.keys.info).await?)
    }

    async fn delete(&self) -> Result<()> {
        self.delete_records().await?;
        debug!(session_id = %self.id, "session records deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, from_millis};
    use crate::error::StoreResult;
    use crate::keys::{SESSION_ATTR_KEY_PREFIX, SESSION_INFO_KEY_PREFIX};
    use crate::script::SessionScript;
    use crate::store::{MemoryStore, RecordStore, ScriptReply};
    use serde_json::json;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(from_millis(1_700_000_000_000).unwrap()))
    }

    async fn create(store: SharedStore, clock: Arc<ManualClock>, id: &str) -> DirectSession {
        DirectSession::create(store, clock, &SessionTemplate::new().with_id(id))
            .await
            .unwrap()
    }

    /// Which command lets a concurrent expiry slip in.
    #[derive(Clone, Copy, PartialEq)]
    enum Race {
        AttributeWrite,
        StopMarker,
    }

    /// Deletes the session's info record right before the racing command.
    struct RacingStore {
        inner: MemoryStore,
        race: Race,
    }

    impl RacingStore {
        async fn expire_info(&self, key: &str) {
            let info = key.replacen(SESSION_ATTR_KEY_PREFIX, SESSION_INFO_KEY_PREFIX, 1);
            self.inner.del(&[info]).await.unwrap();
        }
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
            self.inner.hget(key, field).await
        }
        async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
            self.inner.hmget(key, fields).await
        }
        async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
            if self.race == Race::AttributeWrite && key.starts_with(SESSION_ATTR_KEY_PREFIX) {
                self.expire_info(key).await;
            }
            self.inner.hset(key, field, value).await
        }
        async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
            self.inner.hset_all(key, fields).await
        }
        async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
            if self.race == Race::StopMarker {
                self.inner.del(&[key.to_string()]).await.unwrap();
            }
            self.inner.hset_nx(key, field, value).await
        }
        async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
            self.inner.hdel(key, fields).await
        }
        async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
            self.inner.hexists(key, field).await
        }
        async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.hkeys(key).await
        }
        async fn hvals(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.hvals(key).await
        }
        async fn hlen(&self, key: &str) -> StoreResult<u64> {
            self.inner.hlen(key).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key).await
        }
        async fn pttl(&self, key: &str) -> StoreResult<i64> {
            self.inner.pttl(key).await
        }
        async fn pexpire(&self, key: &str, millis: i64) -> StoreResult<bool> {
            self.inner.pexpire(key, millis).await
        }
        async fn del(&self, keys: &[String]) -> StoreResult<u64> {
            self.inner.del(keys).await
        }
        async fn incr(&self, key: &str) -> StoreResult<i64> {
            self.inner.incr(key).await
        }
        async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
            self.inner.zadd(key, member, score).await
        }
        async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
            self.inner.zrem(key, members).await
        }
        async fn zrange_by_score(&self, key: &str, max: i64) -> StoreResult<Vec<String>> {
            self.inner.zrange_by_score(key, max).await
        }
        async fn zrange_lowest(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
            self.inner.zrange_lowest(key, count).await
        }
        async fn zcard(&self, key: &str) -> StoreResult<u64> {
            self.inner.zcard(key).await
        }
        async fn eval(
            &self,
            script: SessionScript,
            keys: &[String],
            args: &[String],
        ) -> StoreResult<ScriptReply> {
            self.inner.eval(script, keys, args).await
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_and_read_fields() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let template = SessionTemplate::new()
            .with_id("d1")
            .with_timeout_ms(45_000)
            .with_host("web-3");
        let session = DirectSession::create(store.clone(), clock.clone(), &template)
            .await
            .unwrap();

        assert_eq!(session.timeout().await.unwrap(), 45_000);
        assert_eq!(session.host().await.unwrap().as_deref(), Some("web-3"));
        assert_eq!(session.start_timestamp().await.unwrap(), clock.now());

        let ttl = store.pttl(&session.keys().info).await.unwrap();
        assert!(ttl > 44_000 && ttl <= 45_000, "ttl was {ttl}");
    }

    #[tokio::test]
    async fn test_open_classifies_state() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();

        let err = DirectSession::open(store.clone(), clock.clone(), "nope".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Expired));

        let session = create(store.clone(), clock.clone(), "d1").await;
        DirectSession::open(store.clone(), clock.clone(), "d1".into())
            .await
            .unwrap();

        session.stop().await.unwrap();
        let err = DirectSession::open(store.clone(), clock.clone(), "d1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Stopped));

        let err = DirectSession::open(store, clock, "".into()).await.unwrap_err();
        assert!(matches!(err, SessionError::IllegalArgument(_)));
    }

    // ─────────────────────────────────────────────────────────────────────
    // State machine
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let session = create(store.clone(), clock.clone(), "d1").await;

        session.stop().await.unwrap();
        let marker = store.hget(&session.keys().info, field::STOP).await.unwrap();
        clock.advance(chrono::Duration::seconds(3));
        session.stop().await.unwrap();

        assert_eq!(
            store.hget(&session.keys().info, field::STOP).await.unwrap(),
            marker
        );
        assert!(matches!(session.touch().await, Err(SessionError::Stopped)));
        assert!(matches!(session.host().await, Err(SessionError::Stopped)));
        assert!(matches!(
            session.attribute_keys().await,
            Err(SessionError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_expired_reads() {
        let store = Arc::new(MemoryStore::new());
        let session = DirectSession::create(
            store.clone(),
            clock(),
            &SessionTemplate::new().with_id("d1").with_timeout_ms(30),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(session.timeout().await, Err(SessionError::Expired)));
        assert!(matches!(session.stop().await, Err(SessionError::Expired)));
        assert!(matches!(
            session.attribute("k").await,
            Err(SessionError::Expired)
        ));
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;
        store
            .hdel(&session.keys().info, &[field::TIMEOUT.to_string()])
            .await
            .unwrap();

        assert!(matches!(session.timeout().await, Err(SessionError::Invalid)));
        assert!(matches!(session.touch().await, Err(SessionError::Invalid)));
    }

    // ─────────────────────────────────────────────────────────────────────
    // TTL synchronisation
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_set_timeout_rearms_both_records() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;
        session.set_attribute("k", json!([1, 2])).await.unwrap();

        session.set_timeout(90_000).await.unwrap();

        assert_eq!(session.timeout().await.unwrap(), 90_000);
        for key in session.keys().both() {
            let ttl = store.pttl(&key).await.unwrap();
            assert!(ttl > 89_000 && ttl <= 90_000, "{key} ttl was {ttl}");
        }
    }

    #[tokio::test]
    async fn test_oversized_timeout_leaves_session_untouched() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;
        let before = session.timeout().await.unwrap();

        assert!(matches!(
            session.set_timeout(i64::MAX).await,
            Err(SessionError::IllegalArgument(_))
        ));
        assert_eq!(session.timeout().await.unwrap(), before);
        let ttl = store.pttl(&session.keys().info).await.unwrap();
        assert!(ttl > 0 && ttl <= before);

        let err = DirectSession::create(
            store.clone(),
            clock(),
            &SessionTemplate::new().with_id("d2").with_timeout_ms(i64::MAX),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::IllegalArgument(_)));
        assert!(!store.exists("session:info:{d2}").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_timeout_unchanged_keeps_ttl() {
        let store = Arc::new(MemoryStore::new());
        let session = DirectSession::create(
            store.clone(),
            clock(),
            &SessionTemplate::new().with_id("d1").with_timeout_ms(10_000),
        )
        .await
        .unwrap();
        store.pexpire(&session.keys().info, 5_000).await.unwrap();

        session.set_timeout(10_000).await.unwrap();

        assert!(store.pttl(&session.keys().info).await.unwrap() <= 5_000);
    }

    #[tokio::test]
    async fn test_touch_rearms_ttl() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let session = create(store.clone(), clock.clone(), "d1").await;
        store.pexpire(&session.keys().info, 1_000).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        session.touch().await.unwrap();

        let ttl = store.pttl(&session.keys().info).await.unwrap();
        assert!(ttl > 1_000_000, "ttl was {ttl}");
        assert_eq!(session.last_access_time().await.unwrap(), clock.now());
    }

    #[tokio::test]
    async fn test_attribute_ttl_follows_info() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;

        session.set_attribute("a", json!("x")).await.unwrap();
        session.remove_attribute("a").await.unwrap();
        session.set_attribute("b", json!("y")).await.unwrap();

        let info_ttl = store.pttl(&session.keys().info).await.unwrap();
        let attr_ttl = store.pttl(&session.keys().attr).await.unwrap();
        assert!(attr_ttl > 0);
        assert!((info_ttl - attr_ttl).abs() < 100, "{info_ttl} vs {attr_ttl}");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Races
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_attribute_write_racing_expiry_cleans_up() {
        let racing = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            race: Race::AttributeWrite,
        });
        let session = create(racing.clone(), clock(), "d1").await;

        let err = session.set_attribute("k", json!(1)).await.unwrap_err();

        assert!(matches!(err, SessionError::Invalid));
        assert_eq!(racing.inner.key_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_racing_expiry_removes_stray_record() {
        let racing = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            race: Race::StopMarker,
        });
        let session = create(racing.clone(), clock(), "d1").await;

        let err = session.stop().await.unwrap_err();

        assert!(matches!(err, SessionError::Expired));
        assert_eq!(racing.inner.key_count(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_attribute_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;

        session.set_attribute("cart", json!({"items": 3})).await.unwrap();
        assert_eq!(
            session.attribute("cart").await.unwrap(),
            Some(json!({"items": 3}))
        );
        assert_eq!(session.attribute_keys().await.unwrap(), vec!["cart"]);

        assert_eq!(
            session.remove_attribute("cart").await.unwrap(),
            Some(json!({"items": 3}))
        );
        assert_eq!(session.attribute("cart").await.unwrap(), None);
        assert!(session.attribute_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_unconditional() {
        let store = Arc::new(MemoryStore::new());
        let session = create(store.clone(), clock(), "d1").await;
        session.set_attribute("k", json!(null)).await.unwrap();
        session.stop().await.unwrap();

        session.delete().await.unwrap();
        session.delete().await.unwrap();

        assert_eq!(store.key_count(), 0);
        assert_eq!(session.remaining_ttl().await.unwrap(), -2);
    }
}
