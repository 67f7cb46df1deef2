//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./twinkey.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx).await,
        ConfigCommand::Which => cmd_which(ctx).await,
        ConfigCommand::Init { local } => cmd_init(local).await,
        ConfigCommand::Path => cmd_path().await,
    }
}

async fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;

    if ctx.json_output {
        let policies = twinkey_config::resolve_cache_policies(config)?;
        let out = serde_json::json!({
            "store": { "url": ctx.url.as_deref().unwrap_or(config.store_url()) },
            "session": {
                "protocol": ctx.protocol.unwrap_or_else(|| config.protocol()).to_string(),
                "default_timeout_ms": config.default_timeout_ms(),
            },
            "cache": {
                "allow_null_values": config.allow_null_values(),
                "policies": policies,
            },
            "warnings": loaded.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("# twinkey Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    println!("Store:");
    println!("  url: {}", ctx.url.as_deref().unwrap_or(config.store_url()));
    println!();

    println!("Session:");
    println!(
        "  protocol: {}",
        ctx.protocol.unwrap_or_else(|| config.protocol())
    );
    println!("  default timeout: {} ms", config.default_timeout_ms());
    println!();

    println!("Cache:");
    println!("  allow null values: {}", config.allow_null_values());
    if let Some(path) = config.policy_file() {
        println!("  policy file: {}", path.display());
    }
    match twinkey_config::resolve_cache_policies(config) {
        Ok(policies) if policies.is_empty() => println!("  no cache policies"),
        Ok(policies) => {
            let mut names: Vec<_> = policies.keys().collect();
            names.sort();
            for name in names {
                let p = &policies[name];
                println!(
                    "  {:<16} ttl={}ms idle={}ms max_size={}",
                    name, p.ttl_ms, p.max_idle_ms, p.max_size
                );
            }
        }
        Err(e) => println!("  ⚠ {}", e),
    }
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

async fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;

    println!("Config file search order (later overrides earlier):\n");

    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'twinkey config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# twinkey Configuration

[store]
url = "redis://127.0.0.1:6379/"

[session]
# "scripted" runs each operation as one server-side script;
# "direct" issues plain commands and compensates on expiry races.
protocol = "scripted"
default_timeout_ms = 1800000

[cache]
allow_null_values = true
# policy_file = "caches.json"

# Per-cache expiry and size limits (uncomment to use)
# [cache.authorization]
# ttl_ms = 1440000
# max_idle_ms = 720000
# max_size = 10000
"#;

async fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("twinkey.toml")
    } else {
        let dir = twinkey_config::user_config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        std::fs::create_dir_all(&dir)?;
        dir.join("config.toml")
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    std::fs::write(&path, CONFIG_TEMPLATE)?;
    println!("✓ Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  twinkey config show             # verify configuration");
    println!("  twinkey session create          # start a session");

    Ok(())
}

async fn cmd_path() -> Result<()> {
    if let Some(path) = twinkey_config::user_config_path() {
        println!("{}", path.display());
    } else {
        eprintln!("Could not determine config directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        let config = twinkey_config::TwinkeyConfig::from_toml(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.default_timeout_ms(), 1_800_000);
        assert!(config.allow_null_values());
        assert!(config.cache_policies.is_empty());
    }
}
