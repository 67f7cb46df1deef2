//! Cache command - inspect and edit named caches.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::Value;

use twinkey_session::Cache;

use super::{Context, parse_value, print_ok};

/// Arguments for the cache command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache name
    pub name: String,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the value stored under a key
    Get {
        /// Entry key
        key: String,
    },

    /// Store a value (JSON, or a plain string)
    Put {
        /// Entry key
        key: String,

        /// Entry value; omit to store null
        value: Option<String>,

        /// Only store if the key is absent
        #[arg(long)]
        if_absent: bool,
    },

    /// Remove one or more keys
    Rm {
        /// Entry keys
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List keys
    Keys,

    /// Print the number of entries
    Size,

    /// Remove every entry
    Clear,
}

/// Run the cache command.
pub async fn run(args: CacheArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.cache_manager().await?;
    let cache: Cache<String, Value> = manager.get_cache(&args.name);
    let dim = Style::new().dim();

    match args.command {
        CacheCommand::Get { key } => match cache.get(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None if ctx.json_output => println!("null"),
            None => println!("{}", dim.apply_to(format!("No entry '{key}'"))),
        },
        CacheCommand::Put {
            key,
            value,
            if_absent,
        } => {
            let value = value.as_deref().map(parse_value);
            if if_absent {
                if cache.fast_put_if_absent(&key, value).await? {
                    print_ok(ctx, format!("Stored '{key}'"));
                } else {
                    println!("{}", dim.apply_to(format!("'{key}' already present")));
                }
            } else {
                cache.fast_put(&key, value).await?;
                print_ok(ctx, format!("Stored '{key}'"));
            }
        }
        CacheCommand::Rm { keys } => {
            let removed = cache.fast_remove(&keys).await?;
            if ctx.json_output {
                println!("{removed}");
            } else {
                print_ok(ctx, format!("Removed {removed} entr{}", plural(removed)));
            }
        }
        CacheCommand::Keys => {
            let keys = cache.keys().await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                println!("{}", style(format!("Cache '{}'", args.name)).bold());
                println!("{}", dim.apply_to("─".repeat(50)));
                if keys.is_empty() {
                    println!("{}", dim.apply_to("empty"));
                }
                for key in keys {
                    println!("{key}");
                }
            }
        }
        CacheCommand::Size => println!("{}", cache.size().await?),
        CacheCommand::Clear => {
            cache.clear().await?;
            print_ok(ctx, format!("Cleared '{}'", args.name));
        }
    }

    Ok(())
}

fn plural(n: u64) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}
