//! Session lifecycle states and the guard codes that report them.
//!
//! ```text
//!   ACTIVE ──(stop)──→ STOPPED      (second stop is a no-op)
//!     │
//!     └──(TTL lapse)──→ EXPIRED     (store-driven)
//! ```
//!
//! INVALID is not a stored state: it is the outcome of an operation that
//! found a live, unstopped record missing the field it needed.

use std::fmt;

use crate::error::SessionError;

/// Wire code carried by a rejected script call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCode {
    /// `-1`: the info record is gone or has no remaining TTL.
    Expired,
    /// `-2`: the info record carries a stop marker.
    Stopped,
    /// `-3`: the info record lacks a required field.
    Invalid,
}

impl GuardCode {
    /// Error code word that prefixes every guard rejection on the wire.
    pub const ERROR_CODE: &'static str = "TWINKEY";

    /// The guard code as carried in the error detail.
    pub fn as_reply(self) -> &'static str {
        match self {
            GuardCode::Expired => "-1",
            GuardCode::Stopped => "-2",
            GuardCode::Invalid => "-3",
        }
    }

    /// Parse an error reply back into a guard code.
    pub fn from_reply(reply: &str) -> Option<Self> {
        match reply.trim() {
            "-1" => Some(GuardCode::Expired),
            "-2" => Some(GuardCode::Stopped),
            "-3" => Some(GuardCode::Invalid),
            _ => None,
        }
    }

    /// Full error reply text, e.g. `TWINKEY -1`.
    pub fn error_text(self) -> String {
        format!("{} {}", Self::ERROR_CODE, self.as_reply())
    }

    /// Recognise a rejection from a server error's code word and detail.
    pub fn from_error(code: Option<&str>, detail: Option<&str>) -> Option<Self> {
        if code? != Self::ERROR_CODE {
            return None;
        }
        Self::from_reply(detail?)
    }
}

impl From<GuardCode> for SessionError {
    fn from(code: GuardCode) -> Self {
        match code {
            GuardCode::Expired => SessionError::Expired,
            GuardCode::Stopped => SessionError::Stopped,
            GuardCode::Invalid => SessionError::Invalid,
        }
    }
}

/// Observed state of a session with respect to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Stopped,
    Invalid,
}

impl SessionState {
    /// Apply the guard sequence to what was read from the info record.
    ///
    /// `pttl` is the remaining TTL in milliseconds as reported by the store
    /// (`-2` missing, `-1` no expiry). Anything `<= 0` counts as expired.
    pub fn classify(pttl: i64, stopped: bool, field_present: bool) -> Self {
        if pttl <= 0 {
            SessionState::Expired
        } else if stopped {
            SessionState::Stopped
        } else if !field_present {
            SessionState::Invalid
        } else {
            SessionState::Active
        }
    }

    /// The guard code for a non-active state.
    pub fn guard_code(self) -> Option<GuardCode> {
        match self {
            SessionState::Active => None,
            SessionState::Expired => Some(GuardCode::Expired),
            SessionState::Stopped => Some(GuardCode::Stopped),
            SessionState::Invalid => Some(GuardCode::Invalid),
        }
    }

    /// `Ok(())` for an active session, the matching typed failure otherwise.
    pub fn check(self) -> Result<(), SessionError> {
        match self.guard_code() {
            None => Ok(()),
            Some(code) => Err(code.into()),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Active => "active",
            SessionState::Expired => "expired",
            SessionState::Stopped => "stopped",
            SessionState::Invalid => "invalid",
        };
        f.write_str(s)
    }
}
