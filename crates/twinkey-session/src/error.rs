//! Error types for session and cache operations.

use crate::state::GuardCode;

/// Error raised by a [`RecordStore`](crate::store::RecordStore) call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A session script rejected the call with one of the guard codes.
    #[error("script rejected with code {}", .0.as_reply())]
    Rejected(GuardCode),

    /// Transport or server failure reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failure reported by a non-Redis backend.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session record's TTL lapsed; the session no longer exists.
    #[error("session has expired")]
    Expired,

    /// The session was explicitly stopped.
    #[error("session has been stopped")]
    Stopped,

    /// The session record is alive but lacks a field the operation needs.
    #[error("session is in an invalid state")]
    Invalid,

    /// A session could not be built from the supplied arguments.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// No readable session exists for the requested id.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A stored value could not be encoded or decoded.
    #[error("session codec error: {0}")]
    Codec(String),

    /// Store failure not covered by the guard codes, passed through unchanged.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(code) => code.into(),
            other => SessionError::Store(other),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Codec(err.to_string())
    }
}

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Store-level failure.
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    /// A key or value could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
