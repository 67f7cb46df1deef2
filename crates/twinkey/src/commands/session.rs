//! Session command - start, inspect and end sessions.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::json;

use twinkey_session::{Session, SessionContext, SessionId};

use super::{Context, print_ok};

/// Arguments for the session command.
#[derive(Args, Debug)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Start a new session and print its id
    Create {
        /// Timeout in milliseconds (default from config)
        #[arg(short, long)]
        timeout: Option<i64>,

        /// Originating host recorded on the session
        #[arg(long)]
        host: Option<String>,
    },

    /// Show a session's fields and attribute keys
    Show {
        /// Session ID
        id: String,
    },

    /// Refresh a session's last access time and expiry
    Touch {
        /// Session ID
        id: String,
    },

    /// Change a session's timeout
    SetTimeout {
        /// Session ID
        id: String,

        /// New timeout in milliseconds
        timeout: i64,
    },

    /// Stop a session and delete its records
    Stop {
        /// Session ID
        id: String,
    },

    /// Delete a session's records without stopping it first
    Delete {
        /// Session ID
        id: String,
    },
}

/// Run the session command.
pub async fn run(args: SessionArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.session_manager().await?;

    match args.command {
        SessionCommand::Create { timeout, host } => {
            let mut context = SessionContext::new();
            if let Some(timeout) = timeout {
                context = context.with_timeout_ms(timeout);
            }
            if let Some(host) = host {
                context = context.with_host(host);
            }
            let session = manager.start(&context).await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&describe(&*session).await?)?);
            } else {
                print_ok(ctx, format!("Session started: {}", session.id()));
            }
        }
        SessionCommand::Show { id } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            let info = describe(&*session).await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_session(&info);
            }
        }
        SessionCommand::Touch { id } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            session.touch().await?;
            print_ok(ctx, format!("Session touched: {}", session.id()));
        }
        SessionCommand::SetTimeout { id, timeout } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            session.set_timeout(timeout).await?;
            print_ok(ctx, format!("Timeout set to {timeout} ms"));
        }
        SessionCommand::Stop { id } => {
            let id = SessionId::new(id);
            manager.stop(&id).await?;
            print_ok(ctx, format!("Session stopped: {id}"));
        }
        SessionCommand::Delete { id } => {
            let id = SessionId::new(id);
            manager.dao().delete(&id).await?;
            print_ok(ctx, format!("Session deleted: {id}"));
        }
    }

    Ok(())
}

async fn describe(session: &dyn Session) -> Result<serde_json::Value> {
    Ok(json!({
        "id": session.id(),
        "startTimestamp": session.start_timestamp().await?.to_rfc3339(),
        "lastAccessTime": session.last_access_time().await?.to_rfc3339(),
        "timeout": session.timeout().await?,
        "host": session.host().await?,
        "remainingTtl": session.remaining_ttl().await?,
        "attributes": session.attribute_keys().await?,
    }))
}

fn print_session(info: &serde_json::Value) {
    let dim = Style::new().dim();
    let field = |name: &str| match &info[name] {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    };

    println!("{}", style("Session").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  id:          {}", field("id"));
    println!("  started:     {}", field("startTimestamp"));
    println!("  last access: {}", field("lastAccessTime"));
    println!("  timeout:     {} ms", field("timeout"));
    println!("  remaining:   {} ms", field("remainingTtl"));
    println!("  host:        {}", field("host"));

    let keys = info["attributes"].as_array().cloned().unwrap_or_default();
    if keys.is_empty() {
        println!("  attributes:  {}", dim.apply_to("none"));
    } else {
        println!("  attributes:");
        for key in keys {
            println!("    {}", key.as_str().unwrap_or_default());
        }
    }
}
