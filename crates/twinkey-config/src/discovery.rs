//! Finding and loading twinkey config files.
//!
//! Two files are read, and values in the second replace those in the first:
//! the user file `config.toml` in [`user_config_dir`], then `twinkey.toml` in
//! the working (or given project) directory. Command-line flags are applied
//! on top by the binary. A file that is missing is skipped; a file that does
//! not parse is skipped with a warning.

use std::path::{Path, PathBuf};

use twinkey_session::session::MAX_TIMEOUT_MS;

use crate::{ConfigError, Result, TwinkeyConfig};

const PROJECT_CONFIG_FILE: &str = "twinkey.toml";
const USER_CONFIG_FILE: &str = "config.toml";

/// Overrides the user config directory when set and non-empty.
const CONFIG_DIR_ENV: &str = "TWINKEY_CONFIG_DIR";

/// One candidate config file and whether it contributed to the result.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// The merged configuration plus what went into it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TwinkeyConfig,
    /// Every candidate file, user file first.
    pub sources: Vec<ConfigSource>,
    /// Problems worth telling the operator about; loading still succeeded.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that were read.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load the user file and the project file from `project_dir` (default: the
/// working directory).
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], reading the user file from `config_dir` instead of
/// [`user_config_dir`].
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_file = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    let project_file = match project_dir {
        Some(dir) => dir.join(PROJECT_CONFIG_FILE),
        None => PathBuf::from(PROJECT_CONFIG_FILE),
    };

    let mut loaded = LoadedConfig {
        config: TwinkeyConfig::new(),
        sources: Vec::new(),
        warnings: Vec::new(),
    };
    for path in user_file.into_iter().chain(std::iter::once(project_file)) {
        let read = merge_file(&mut loaded, &path);
        loaded.sources.push(ConfigSource { path, loaded: read });
    }

    warn_plaintext_password(&mut loaded);
    warn_timeout_out_of_range(&mut loaded);
    Ok(loaded)
}

/// Parse one config file.
pub fn load_config_file(path: &Path) -> Result<TwinkeyConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    TwinkeyConfig::from_toml(&contents)
}

/// Write `config` as TOML, creating the parent directory if needed.
pub fn save_config(config: &TwinkeyConfig, path: &Path) -> Result<()> {
    let write_err = |at: &Path, e| ConfigError::WriteFile {
        path: at.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// `config.toml` inside [`user_config_dir`].
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `$TWINKEY_CONFIG_DIR`, else `twinkey/` under the platform config directory.
/// Logs are written below it too.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("twinkey")),
    }
}

/// Merge `path` into `loaded.config`; true when it was read.
fn merge_file(loaded: &mut LoadedConfig, path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match load_config_file(path) {
        Ok(layer) => {
            tracing::debug!(path = %path.display(), "merged config file");
            loaded.config.merge(layer);
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping config file");
            loaded
                .warnings
                .push(format!("Failed to load {}: {}", path.display(), e));
            false
        }
    }
}

fn warn_plaintext_password(loaded: &mut LoadedConfig) {
    if loaded
        .config
        .store
        .as_ref()
        .is_some_and(|store| store.has_plaintext_password())
    {
        loaded.warnings.push(
            "[store] url contains a plaintext password. \
             Consider passing it through TWINKEY_URL instead."
                .to_string(),
        );
    }
}

fn warn_timeout_out_of_range(loaded: &mut LoadedConfig) {
    let Some(timeout) = loaded
        .config
        .session
        .as_ref()
        .and_then(|s| s.default_timeout_ms)
    else {
        return;
    };
    if timeout <= 0 {
        loaded.warnings.push(format!(
            "[session] default_timeout_ms must be positive (got {timeout})"
        ));
    } else if timeout > MAX_TIMEOUT_MS {
        loaded.warnings.push(format!(
            "[session] default_timeout_ms must not exceed {MAX_TIMEOUT_MS} (got {timeout})"
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
