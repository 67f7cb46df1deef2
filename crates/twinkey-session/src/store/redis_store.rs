//! [`RecordStore`] over a Redis connection.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script, Value};
use tracing::trace;

use super::{RecordStore, ScriptReply};
use crate::error::{StoreError, StoreResult};
use crate::script::SessionScript;
use crate::state::GuardCode;

/// Redis-backed store with automatic reconnection.
///
/// The connection manager is cloned per command; clones share one
/// multiplexed connection, so the store can be used from many tasks.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    scripts: HashMap<SessionScript, Script>,
}

impl RedisStore {
    /// Connect to a Redis server (`redis://` or `rediss://`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        let scripts = SessionScript::ALL
            .iter()
            .map(|s| (*s, Script::new(&s.lua())))
            .collect();
        Self { conn, scripts }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Map a script's guard error reply to [`StoreError::Rejected`].
fn convert(err: RedisError) -> StoreError {
    match GuardCode::from_error(err.code(), err.detail()) {
        Some(code) => StoreError::Rejected(code),
        None => StoreError::Redis(err),
    }
}

fn reply_from_value(value: Value) -> StoreResult<ScriptReply> {
    match value {
        Value::Nil => Ok(ScriptReply::Nil),
        Value::Int(n) => Ok(ScriptReply::Int(n)),
        Value::Okay => Ok(ScriptReply::Int(1)),
        Value::SimpleString(s) => Ok(ScriptReply::Text(s)),
        Value::BulkString(bytes) => Ok(ScriptReply::Text(decode_utf8(bytes)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::BulkString(bytes) => out.push(decode_utf8(bytes)?),
                    Value::SimpleString(s) => out.push(s),
                    Value::Int(n) => out.push(n.to_string()),
                    other => {
                        return Err(StoreError::Backend(format!(
                            "unexpected script list item: {other:?}"
                        )));
                    }
                }
            }
            Ok(ScriptReply::List(out))
        }
        other => Err(StoreError::Backend(format!(
            "unexpected script reply: {other:?}"
        ))),
    }
}

fn decode_utf8(bytes: Vec<u8>) -> StoreResult<String> {
    String::from_utf8(bytes).map_err(|e| StoreError::Backend(format!("non-utf8 reply: {e}")))
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: () = self.conn().hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        Ok(self.conn().hset_nx(key, field, value).await?)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().hdel(key, fields).await?)
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.conn().hexists(key, field).await?)
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().hkeys(key).await?)
    }

    async fn hvals(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().hvals(key).await?)
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.conn().hlen(key).await?)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        Ok(self.conn().pttl(key).await?)
    }

    async fn pexpire(&self, key: &str, millis: i64) -> StoreResult<bool> {
        Ok(self.conn().pexpire(key, millis).await?)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().del(keys).await?)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        Ok(self.conn().incr(key, 1i64).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        let _: () = self.conn().zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().zrem(key, members).await?)
    }

    async fn zrange_by_score(&self, key: &str, max: i64) -> StoreResult<Vec<String>> {
        Ok(self.conn().zrangebyscore(key, "-inf", max).await?)
    }

    async fn zrange_lowest(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        Ok(self.conn().zrange(key, 0, stop).await?)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.conn().zcard(key).await?)
    }

    async fn eval(
        &self,
        script: SessionScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        let body = self
            .scripts
            .get(&script)
            .ok_or_else(|| StoreError::Backend(format!("script {} not loaded", script.id())))?;

        trace!(script = %script.id(), write = script.is_write(), keys = ?keys, "evaluating session script");

        let mut invocation = body.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.conn();
        let value: Value = invocation.invoke_async(&mut conn).await.map_err(convert)?;
        reply_from_value(value)
    }
}
