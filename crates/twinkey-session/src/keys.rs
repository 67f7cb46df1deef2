//! Key naming for the two records that make up a session.
//!
//! Both keys wrap the session id in `{}` so that Redis Cluster hashes only the
//! id, placing the info and attribute records in the same slot. The atomic
//! scripts touch both keys in one call and rely on that.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of the key holding a session's info record.
pub const SESSION_INFO_KEY_PREFIX: &str = "session:info:";

/// Prefix of the key holding a session's attribute record.
pub const SESSION_ATTR_KEY_PREFIX: &str = "session:attr:";

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid for a stored session).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The pair of colocated keys backing one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Key of the info hash.
    pub info: String,
    /// Key of the attributes hash.
    pub attr: String,
}

impl SessionKeys {
    /// Derive both keys for a session id.
    pub fn for_id(id: &SessionId) -> Self {
        Self {
            info: format!("{SESSION_INFO_KEY_PREFIX}{{{}}}", id.as_str()),
            attr: format!("{SESSION_ATTR_KEY_PREFIX}{{{}}}", id.as_str()),
        }
    }

    /// Both keys in script order (`KEYS[1]`, `KEYS[2]`).
    pub fn both(&self) -> [String; 2] {
        [self.info.clone(), self.attr.clone()]
    }

    /// The cluster hash tag shared by both keys.
    pub fn hash_tag(&self) -> Option<&str> {
        hash_tag(&self.info)
    }
}

/// Extract the cluster hash tag of a key: the text between the first `{` and
/// the next `}`, if non-empty.
pub fn hash_tag(key: &str) -> Option<&str> {
    let open = key.find('{')?;
    let rest = &key[open + 1..];
    let close = rest.find('}')?;
    if close == 0 { None } else { Some(&rest[..close]) }
}
