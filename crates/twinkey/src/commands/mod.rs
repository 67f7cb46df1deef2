//! CLI command handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use console::Style;

use twinkey_config::{LoadedConfig, TwinkeyConfig};
use twinkey_session::{
    CacheManager, Protocol, RedisStore, SessionDao, SessionManager, SharedStore,
    SimpleSessionFactory,
};

pub mod attr;
pub mod cache;
pub mod config;
pub mod session;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Store URL from `--url` / `TWINKEY_URL`; falls back to the config file.
    pub url: Option<String>,
    /// Protocol from `--protocol`; falls back to the config file.
    pub protocol: Option<Protocol>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Discover and merge config files, logging any warnings.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = twinkey_config::load_config(None)?;
        for warning in &loaded.warnings {
            tracing::warn!("{warning}");
        }
        Ok(loaded)
    }

    fn store_url(&self, config: &TwinkeyConfig) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| config.store_url().to_string())
    }

    async fn connect(&self, config: &TwinkeyConfig) -> Result<SharedStore> {
        let url = self.store_url(config);
        tracing::debug!(%url, "Connecting to store");
        let store = RedisStore::connect(&url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        Ok(Arc::new(store))
    }

    /// A session manager over the configured store and protocol.
    pub async fn session_manager(&self) -> Result<SessionManager> {
        let config = self.load_config()?.config;
        let store = self.connect(&config).await?;
        let protocol = self.protocol.unwrap_or_else(|| config.protocol());
        let dao = SessionDao::new(store, protocol);
        Ok(SessionManager::new(dao).with_factory(Arc::new(SimpleSessionFactory::new(
            config.default_timeout_ms(),
        ))))
    }

    /// A cache manager over the configured store and cache policies.
    pub async fn cache_manager(&self) -> Result<CacheManager> {
        let config = self.load_config()?.config;
        let policies = twinkey_config::resolve_cache_policies(&config)?;
        let store = self.connect(&config).await?;
        Ok(CacheManager::new(store)
            .with_allow_null_values(config.allow_null_values())
            .with_policies(policies))
    }
}

/// Print a success line, or nothing in JSON mode.
pub fn print_ok(ctx: &Context, message: impl std::fmt::Display) {
    if !ctx.json_output {
        println!("{} {}", Style::new().green().apply_to("✓"), message);
    }
}

/// Parse a CLI value as JSON, treating anything unparseable as a string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
