//! Encoding of cache values at the store boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Stored in place of an application-level null. Never valid JSON, so it
/// cannot collide with an encoded value.
pub const NULL_SENTINEL: &str = "#twinkey:null";

/// A cache value as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue<V> {
    Present(V),
    Null,
}

impl<V> StoredValue<V> {
    pub fn from_option(value: Option<V>) -> Self {
        match value {
            Some(v) => StoredValue::Present(v),
            None => StoredValue::Null,
        }
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            StoredValue::Present(v) => Some(v),
            StoredValue::Null => None,
        }
    }
}

impl<V: Serialize + DeserializeOwned> StoredValue<V> {
    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            StoredValue::Present(v) => serde_json::to_string(v),
            StoredValue::Null => Ok(NULL_SENTINEL.to_string()),
        }
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        if raw == NULL_SENTINEL {
            return Ok(StoredValue::Null);
        }
        serde_json::from_str(raw).map(StoredValue::Present)
    }
}

/// Decode an optional raw value; both absence and the sentinel become `None`.
pub(crate) fn decode_optional<V: Serialize + DeserializeOwned>(
    raw: Option<String>,
) -> serde_json::Result<Option<V>> {
    match raw {
        None => Ok(None),
        Some(raw) => Ok(StoredValue::<V>::decode(&raw)?.into_option()),
    }
}
