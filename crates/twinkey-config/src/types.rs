//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [store]                  # where sessions and caches live
//! [session]                # protocol and default timeout
//! [cache]                  # null policy, external policy file
//! [cache.authorization]    # per-cache ttl / idle / size policy
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use twinkey_session::{CachePolicy, Protocol};

/// Store URL used when none is configured.
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379/";

/// Session timeout used when none is configured (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = twinkey_session::session::DEFAULT_TIMEOUT_MS;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinkeyConfig {
    /// Store connection (`[store]`).
    pub store: Option<StoreConfig>,

    /// Session defaults (`[session]`).
    pub session: Option<SessionConfig>,

    /// Cache defaults (the bare `[cache]` section).
    pub cache: Option<CacheConfig>,

    /// Named cache policies (`[cache.<name>]`).
    pub cache_policies: HashMap<String, CachePolicy>,
}

impl TwinkeyConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let raw: RawConfig = toml::from_str(toml_str)?;
        Ok(raw.into())
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        let raw: RawConfig = self.clone().into();
        Ok(toml::to_string_pretty(&raw)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: TwinkeyConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        if other.cache.is_some() {
            self.cache = other.cache;
        }

        for (name, policy) in other.cache_policies {
            self.cache_policies.insert(name, policy);
        }
    }

    /// The configured store URL, or [`DEFAULT_STORE_URL`].
    pub fn store_url(&self) -> &str {
        self.store
            .as_ref()
            .and_then(|s| s.url.as_deref())
            .unwrap_or(DEFAULT_STORE_URL)
    }

    /// The configured session protocol.
    pub fn protocol(&self) -> Protocol {
        self.session
            .as_ref()
            .and_then(|s| s.protocol)
            .unwrap_or_default()
    }

    /// The configured default session timeout.
    pub fn default_timeout_ms(&self) -> i64 {
        self.session
            .as_ref()
            .and_then(|s| s.default_timeout_ms)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_MS)
    }

    /// Whether caches store `None` values (default `true`).
    pub fn allow_null_values(&self) -> bool {
        self.cache
            .as_ref()
            .and_then(|c| c.allow_null_values)
            .unwrap_or(true)
    }

    /// The external cache policy file, if configured.
    pub fn policy_file(&self) -> Option<&PathBuf> {
        self.cache.as_ref().and_then(|c| c.policy_file.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL, e.g. `redis://cache.internal:6379/0`.
    pub url: Option<String>,
}

impl StoreConfig {
    /// Whether the URL embeds a password.
    pub fn has_plaintext_password(&self) -> bool {
        let Some(url) = self.url.as_deref() else {
            return false;
        };
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let Some((userinfo, _)) = rest.split_once('@') else {
            return false;
        };
        userinfo
            .split_once(':')
            .is_some_and(|(_, password)| !password.is_empty())
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `"scripted"` (default) or `"direct"`.
    pub protocol: Option<Protocol>,

    /// Timeout for sessions started without one, in milliseconds.
    pub default_timeout_ms: Option<i64>,
}

/// Bare `[cache]` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store `None` values as a sentinel instead of removing the key.
    pub allow_null_values: Option<bool>,

    /// JSON or YAML file mapping cache names to policies.
    pub policy_file: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw TOML shape
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk shape: `[cache]` mixes plain settings with named sub-tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawConfig {
    store: Option<StoreConfig>,
    session: Option<SessionConfig>,
    cache: Option<RawCacheSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawCacheSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_null_values: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_file: Option<PathBuf>,

    /// Named policies are captured via flatten.
    #[serde(flatten)]
    policies: HashMap<String, CachePolicy>,
}

impl From<RawConfig> for TwinkeyConfig {
    fn from(raw: RawConfig) -> Self {
        let (cache, cache_policies) = match raw.cache {
            Some(section) => {
                let settings =
                    if section.allow_null_values.is_some() || section.policy_file.is_some() {
                        Some(CacheConfig {
                            allow_null_values: section.allow_null_values,
                            policy_file: section.policy_file,
                        })
                    } else {
                        None
                    };
                (settings, section.policies)
            }
            None => (None, HashMap::new()),
        };

        TwinkeyConfig {
            store: raw.store,
            session: raw.session,
            cache,
            cache_policies,
        }
    }
}

impl From<TwinkeyConfig> for RawConfig {
    fn from(config: TwinkeyConfig) -> Self {
        let cache = if config.cache.is_some() || !config.cache_policies.is_empty() {
            let settings = config.cache.unwrap_or_default();
            Some(RawCacheSection {
                allow_null_values: settings.allow_null_values,
                policy_file: settings.policy_file,
                policies: config.cache_policies,
            })
        } else {
            None
        };

        RawConfig {
            store: config.store,
            session: config.session,
            cache,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
