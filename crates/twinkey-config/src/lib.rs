//! Configuration system for twinkey.
//!
//! Provides TOML-based configuration with:
//! - Store connection (`[store]`)
//! - Session protocol and default timeout (`[session]`)
//! - Named cache policies (`[cache.<name>]`), optionally from a JSON/YAML file
//! - A user config file overridden by a project-local `twinkey.toml`

pub mod discovery;
pub mod error;
pub mod policies;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use policies::{load_cache_policies, resolve_cache_policies};
pub use types::*;
