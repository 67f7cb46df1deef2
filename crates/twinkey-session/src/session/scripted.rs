//! Session handle backed by the atomic session scripts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{
    Session, SessionTemplate, decode_attribute, encode_attribute, field, parse_host,
    parse_millis, parse_timestamp, validate_timeout,
};
use crate::clock::{Clock, to_millis};
use crate::error::{Result, SessionError};
use crate::keys::{SessionId, SessionKeys};
use crate::script::SessionScript;
use crate::store::{ScriptReply, SharedStore};

/// Session whose every operation is one server-side script.
pub struct ScriptedSession {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    id: SessionId,
    keys: SessionKeys,
}

impl ScriptedSession {
    /// Persist `template` and return a handle onto it.
    pub async fn create(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        template: &SessionTemplate,
    ) -> Result<Self> {
        let id = template.require_id()?;
        let session = Self::attach(store, clock, id)?;

        let timeout = template.effective_timeout_ms();
        validate_timeout(timeout)?;
        let start = template
            .start_timestamp
            .unwrap_or_else(|| session.clock.now());
        let args = [
            session.id.to_string(),
            timeout.to_string(),
            to_millis(start).to_string(),
            template.host.clone().unwrap_or_default(),
        ];
        session.run(SessionScript::Init, &args).await?;

        info!(session_id = %session.id, timeout_ms = timeout, "session created");
        Ok(session)
    }

    /// A handle onto an existing session. No store call is made; the first
    /// operation reports the session's state.
    pub fn attach(store: SharedStore, clock: Arc<dyn Clock>, id: SessionId) -> Result<Self> {
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

    async fn run(&self, script: SessionScript, args: &[String]) -> Result<ScriptReply> {
        debug!(session_id = %self.id, script = script.name(), "session script");
        Ok(self.store.eval(script, &self.keys.both(), args).await?)
    }

    async fn read_field(&self, script: SessionScript) -> Result<String> {
        self.run(script, &[])
            .await?
            .into_text()
            .ok_or(SessionError::Invalid)
    }

    fn now_millis(&self) -> String {
        to_millis(self.clock.now()).to_string()
    }
}

impl fmt::Debug for ScriptedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedSession")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn start_timestamp(&self) -> Result<DateTime<Utc>> {
        let raw = self.read_field(SessionScript::GetStart).await?;
        parse_timestamp(field::START, &raw)
    }

    async fn last_access_time(&self) -> Result<DateTime<Utc>> {
        let raw = self.read_field(SessionScript::GetLast).await?;
        parse_timestamp(field::LAST_ACCESS, &raw)
    }

    async fn timeout(&self) -> Result<i64> {
        let raw = self.read_field(SessionScript::GetTimeout).await?;
        parse_millis(field::TIMEOUT, &raw)
    }

    async fn set_timeout(&self, timeout_ms: i64) -> Result<()> {
        validate_timeout(timeout_ms)?;
        self.run(SessionScript::SetTimeout, &[timeout_ms.to_string()])
            .await?;
        Ok(())
    }

    async fn host(&self) -> Result<Option<String>> {
        let raw = self.read_field(SessionScript::GetHost).await?;
        Ok(parse_host(raw))
    }

    async fn touch(&self) -> Result<()> {
        self.run(SessionScript::Touch, &[self.now_millis()]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.run(SessionScript::Stop, &[self.now_millis()]).await?;
        info!(session_id = %self.id, "session stopped");
        Ok(())
    }

    async fn attribute_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .run(SessionScript::GetAttributeKeys, &[])
            .await?
            .into_list())
    }

    async fn attribute(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let reply = self
            .run(SessionScript::GetAttribute, &[key.to_string()])
            .await?;
        decode_attribute(reply.into_text())
    }

    async fn set_attribute(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let encoded = encode_attribute(&value)?;
        self.run(SessionScript::SetAttribute, &[key.to_string(), encoded])
            .await?;
        Ok(())
    }

    async fn remove_attribute(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let reply = self
            .run(SessionScript::RemoveAttribute, &[key.to_string()])
            .await?;
        decode_attribute(reply.into_text())
    }

    async fn remaining_ttl(&self) -> Result<i64> {
        let reply = self.run(SessionScript::RemainingTtl, &[]).await?;
        reply
            .as_int()
            .ok_or_else(|| SessionError::Codec("remaining ttl is not an integer".to_string()))
    }

    async fn delete(&self) -> Result<()> {
        self.run(SessionScript::Delete, &[]).await?;
        debug!(session_id = %self.id, "session records deleted");
        Ok(())
    }
}
