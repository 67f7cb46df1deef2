//! Attr command - read and write session attributes.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;

use twinkey_session::SessionId;

use super::{Context, parse_value, print_ok};

/// Arguments for the attr command.
#[derive(Args, Debug)]
pub struct AttrArgs {
    #[command(subcommand)]
    pub command: AttrCommand,
}

#[derive(Subcommand, Debug)]
pub enum AttrCommand {
    /// List attribute keys of a session
    List {
        /// Session ID
        id: String,
    },

    /// Print one attribute value as JSON
    Get {
        /// Session ID
        id: String,

        /// Attribute key
        key: String,
    },

    /// Set an attribute (JSON, or a plain string)
    Set {
        /// Session ID
        id: String,

        /// Attribute key
        key: String,

        /// Attribute value
        value: String,
    },

    /// Remove an attribute
    Rm {
        /// Session ID
        id: String,

        /// Attribute key
        key: String,
    },
}

/// Run the attr command.
pub async fn run(args: AttrArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.session_manager().await?;
    let dim = Style::new().dim();

    match args.command {
        AttrCommand::List { id } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            let keys = session.attribute_keys().await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else if keys.is_empty() {
                println!("{}", dim.apply_to("No attributes"));
            } else {
                for key in keys {
                    println!("{key}");
                }
            }
        }
        AttrCommand::Get { id, key } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            match session.attribute(&key).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None if ctx.json_output => println!("null"),
                None => println!("{}", dim.apply_to(format!("No attribute '{key}'"))),
            }
        }
        AttrCommand::Set { id, key, value } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            session.set_attribute(&key, parse_value(&value)).await?;
            print_ok(ctx, format!("Attribute '{key}' set"));
        }
        AttrCommand::Rm { id, key } => {
            let session = manager.get_session(&SessionId::new(id)).await?;
            let previous = session.remove_attribute(&key).await?;
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&previous.unwrap_or_default())?
                );
            } else if previous.is_some() {
                print_ok(ctx, format!("Attribute '{key}' removed"));
            } else {
                println!("{}", dim.apply_to(format!("No attribute '{key}'")));
            }
        }
    }

    Ok(())
}
