//! Session handles over the info and attribute records.
//!
//! Two implementations share the [`Session`] trait:
//!
//! - [`ScriptedSession`] runs every operation as one [`SessionScript`]
//!   (guard and mutation are a single atomic step at the store).
//! - [`DirectSession`] issues a short sequence of plain commands. A
//!   concurrent writer may interleave between the guard and the mutation;
//!   detected races are compensated (records deleted, typed failure
//!   returned) rather than prevented. Pick the scripted protocol when that
//!   matters.
//!
//! [`SessionScript`]: crate::script::SessionScript

mod direct;
mod scripted;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::direct::DirectSession;
pub use self::scripted::ScriptedSession;

use crate::clock::from_millis;
use crate::error::{Result, SessionError};
use crate::keys::SessionId;

/// Field names of the info record.
pub mod field {
    pub const ID: &str = "id";
    pub const TIMEOUT: &str = "timeout";
    pub const START: &str = "startTimestamp";
    pub const LAST_ACCESS: &str = "lastAccessTime";
    pub const HOST: &str = "host";
    pub const STOP: &str = "stopTimestamp";
}

/// Timeout applied when a template carries none (30 minutes).
pub const DEFAULT_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Largest accepted timeout (100 years). Redis rejects expiry deadlines past
/// the end of its millisecond clock, and scripts carry the value as a Lua
/// number, so it must stay well inside both.
pub const MAX_TIMEOUT_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Which consistency regime session handles use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Server-side scripts; every operation is atomic.
    #[default]
    Scripted,
    /// Independent commands with compensating cleanup.
    Direct,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Scripted => f.write_str("scripted"),
            Protocol::Direct => f.write_str("direct"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scripted" | "atomic" => Ok(Protocol::Scripted),
            "direct" => Ok(Protocol::Direct),
            other => Err(format!("unknown session protocol: {other}")),
        }
    }
}

/// In-memory description of a session before it is persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTemplate {
    pub id: Option<SessionId>,
    pub start_timestamp: Option<DateTime<Utc>>,
    /// Timeout in milliseconds; `<= 0` means "use the default".
    pub timeout_ms: i64,
    pub host: Option<String>,
}

impl SessionTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<SessionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start_timestamp = Some(start);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// The timeout the record is created with.
    pub fn effective_timeout_ms(&self) -> i64 {
        if self.timeout_ms > 0 {
            self.timeout_ms
        } else {
            DEFAULT_TIMEOUT_MS
        }
    }

    /// The id, or `IllegalArgument` when it is missing or empty.
    pub(crate) fn require_id(&self) -> Result<SessionId> {
        match &self.id {
            Some(id) if !id.is_empty() => Ok(id.clone()),
            _ => Err(SessionError::IllegalArgument(
                "session id must not be empty".to_string(),
            )),
        }
    }
}

/// A live handle onto a stored session.
///
/// Every call goes to the store; handles hold no session state besides the
/// id, so any number of handles (on any host) may address one session.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    fn id(&self) -> &SessionId;

    async fn start_timestamp(&self) -> Result<DateTime<Utc>>;

    async fn last_access_time(&self) -> Result<DateTime<Utc>>;

    /// Idle timeout in milliseconds.
    async fn timeout(&self) -> Result<i64>;

    /// Change the idle timeout and re-arm both records' TTL.
    async fn set_timeout(&self, timeout_ms: i64) -> Result<()>;

    /// Originating host, `None` when the session was created without one.
    async fn host(&self) -> Result<Option<String>>;

    /// Record an access and re-arm both records' TTL.
    async fn touch(&self) -> Result<()>;

    /// Mark the session stopped. Stopping twice is a no-op.
    async fn stop(&self) -> Result<()>;

    async fn attribute_keys(&self) -> Result<Vec<String>>;

    async fn attribute(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set_attribute(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove an attribute, returning its previous value.
    async fn remove_attribute(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Remaining TTL of the info record in milliseconds (`-2` when gone).
    async fn remaining_ttl(&self) -> Result<i64>;

    /// Remove both records regardless of state.
    async fn delete(&self) -> Result<()>;
}

pub(crate) fn validate_timeout(timeout_ms: i64) -> Result<()> {
    if timeout_ms <= 0 {
        return Err(SessionError::IllegalArgument(format!(
            "timeout must be positive, got {timeout_ms}"
        )));
    }
    if timeout_ms > MAX_TIMEOUT_MS {
        return Err(SessionError::IllegalArgument(format!(
            "timeout must not exceed {MAX_TIMEOUT_MS} ms, got {timeout_ms}"
        )));
    }
    Ok(())
}

pub(crate) fn parse_millis(name: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| SessionError::Codec(format!("field {name} is not a number: {raw:?}")))
}

pub(crate) fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    let ms = parse_millis(name, raw)?;
    from_millis(ms)
        .ok_or_else(|| SessionError::Codec(format!("field {name} is out of range: {ms}")))
}

pub(crate) fn parse_host(raw: String) -> Option<String> {
    if raw.is_empty() { None } else { Some(raw) }
}

pub(crate) fn encode_attribute(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode_attribute(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).map_err(SessionError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_defaults_timeout() {
        let template = SessionTemplate::new().with_id("abc");
        assert_eq!(template.effective_timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(
            template.with_timeout_ms(5_000).effective_timeout_ms(),
            5_000
        );
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(validate_timeout(1).is_ok());
        assert!(validate_timeout(MAX_TIMEOUT_MS).is_ok());
        assert!(matches!(
            validate_timeout(0),
            Err(SessionError::IllegalArgument(_))
        ));
        assert!(matches!(
            validate_timeout(MAX_TIMEOUT_MS + 1),
            Err(SessionError::IllegalArgument(_))
        ));
        assert!(matches!(
            validate_timeout(i64::MAX),
            Err(SessionError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_template_requires_id() {
        assert!(matches!(
            SessionTemplate::new().require_id(),
            Err(SessionError::IllegalArgument(_))
        ));
        assert!(matches!(
            SessionTemplate::new().with_id("").require_id(),
            Err(SessionError::IllegalArgument(_))
        ));
        assert_eq!(
            SessionTemplate::new().with_id("x").require_id().unwrap(),
            SessionId::from("x")
        );
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("direct".parse::<Protocol>().unwrap(), Protocol::Direct);
        assert_eq!("Scripted".parse::<Protocol>().unwrap(), Protocol::Scripted);
        assert!("lua".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!(parse_millis(field::TIMEOUT, "1800000").unwrap(), 1_800_000);
        assert!(matches!(
            parse_millis(field::TIMEOUT, "soon"),
            Err(SessionError::Codec(_))
        ));
        assert_eq!(parse_host(String::new()), None);
        assert_eq!(parse_host("10.0.0.1".into()).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_attribute_codec() {
        let value = serde_json::json!({"user": "alice", "roles": ["admin"]});
        let raw = encode_attribute(&value).unwrap();
        assert_eq!(decode_attribute(Some(raw)).unwrap(), Some(value));
        assert_eq!(decode_attribute(None).unwrap(), None);
        assert!(decode_attribute(Some("{broken".into())).is_err());
    }
}
