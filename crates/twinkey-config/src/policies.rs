//! Cache policy files.
//!
//! A policy file maps cache names to policies, in JSON or YAML:
//!
//! ```json
//! { "authorization": { "ttl": 1440000, "maxIdleTime": 720000 } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use twinkey_session::CachePolicy;

use crate::{ConfigError, Result, TwinkeyConfig};

/// Load named cache policies from a JSON file, falling back to YAML.
pub fn load_cache_policies(path: &Path) -> Result<HashMap<String, CachePolicy>> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_cache_policies(&contents).map_err(|message| ConfigError::ParsePolicies {
        path: path.display().to_string(),
        message,
    })
}

fn parse_cache_policies(contents: &str) -> std::result::Result<HashMap<String, CachePolicy>, String> {
    match serde_json::from_str(contents) {
        Ok(policies) => Ok(policies),
        Err(json_err) => serde_yaml::from_str(contents)
            .map_err(|yaml_err| format!("not JSON ({json_err}) and not YAML ({yaml_err})")),
    }
}

/// All cache policies for a config: the policy file first, then inline
/// `[cache.<name>]` tables on top.
pub fn resolve_cache_policies(config: &TwinkeyConfig) -> Result<HashMap<String, CachePolicy>> {
    let mut policies = match config.policy_file() {
        Some(path) => load_cache_policies(path)?,
        None => HashMap::new(),
    };
    for (name, policy) in &config.cache_policies {
        policies.insert(name.clone(), *policy);
    }
    Ok(policies)
}
