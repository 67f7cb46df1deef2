//! twinkey - inspect and manage Redis-backed sessions and caches.
//!
//! Main entry point for the twinkey CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use twinkey_session::Protocol;

mod commands;

use commands::{attr, cache, config, session};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// twinkey - inspect and manage Redis-backed sessions and caches
#[derive(Parser)]
#[command(name = "twinkey")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Store URL (default: from config, then redis://127.0.0.1:6379/)
    #[arg(long, global = true, env = "TWINKEY_URL")]
    pub url: Option<String>,

    /// Session protocol: scripted or direct (default: from config)
    #[arg(long, global = true)]
    pub protocol: Option<Protocol>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Session operations
    Session(session::SessionArgs),

    /// Session attribute operations
    Attr(attr::AttrArgs),

    /// Cache operations
    Cache(cache::CacheArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "twinkey=debug,twinkey_session=debug,twinkey_config=debug,info"
    } else {
        "twinkey=info,twinkey_session=info,twinkey_config=info,warn"
    };

    let log_dir = twinkey_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "twinkey.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "twinkey=trace,twinkey_session=trace,twinkey_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        url: cli.url,
        protocol: cli.protocol,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Session(args) => session::run(args, &ctx).await,
        Commands::Attr(args) => attr::run(args, &ctx).await,
        Commands::Cache(args) => cache::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
