//! Memoh CLI — entry point.
//!
//! # Commands
//!
//! - `memoh serve` (default) — run the gateway: every configured channel
//!   bound to one bot, blocking until shutdown
//! - `memoh chat` — interactive local REPL against the same bot
//! - `memoh onboard` — initialize config + workspace
//! - `memoh status` — show configuration and provider status
//! - `memoh channels status` — show chat channel configuration
//! - `memoh migrate up|down|version|force N` — schema migrations
//! - `memoh version` — print the CLI version

mod channels_cmd;
mod gateway;
mod helpers;
mod migrate;
mod onboard;
mod repl;
mod status;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use memoh_channels::{LocalChannel, LocalEvent};
use memoh_core::config::load_config;
use memoh_core::model::{Capabilities as BindingCapabilities, ChannelBinding, ChannelType};

const CHAT_IDENTITY: &str = "cli";

#[derive(Parser)]
#[command(name = "memoh", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: every configured channel bound to one bot
    Serve,

    /// Interactive local REPL against the bot
    Chat {
        /// Disable Markdown rendering in output
        #[arg(long, default_value_t = false)]
        no_markdown: bool,
    },

    /// Initialize configuration and workspace
    Onboard,

    /// Show configuration and provider status
    Status,

    /// Manage chat channels
    Channels {
        #[command(subcommand)]
        action: channels_cmd::ChannelsCommands,
    },

    /// Schema migrations for the persistent store
    Migrate {
        #[command(subcommand)]
        action: migrate::MigrateCommands,
    },

    /// Print the CLI version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_logging(false);
            let config = load_config();
            gateway::run(config).await
        }
        Commands::Chat { no_markdown } => {
            init_logging(false);
            run_chat(!no_markdown).await
        }
        Commands::Onboard => onboard::run(),
        Commands::Status => status::run(),
        Commands::Channels { action } => channels_cmd::dispatch(action),
        Commands::Migrate { action } => migrate::dispatch(action),
        Commands::Version => {
            println!("memoh {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Wire up a Local-CLI channel against the shared bot runtime and run the
/// interactive REPL over it.
async fn run_chat(render_markdown: bool) -> Result<()> {
    let config = load_config();
    let runtime = gateway::build_runtime(&config).await?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<LocalEvent>(64);
    let channel = Arc::new(LocalChannel::new(
        runtime.bot.id,
        ChannelType::LocalCli,
        runtime.processor.clone(),
        outbound_tx,
    ));

    runtime
        .store
        .bindings
        .upsert(ChannelBinding {
            id: uuid::Uuid::new_v4(),
            bot_id: runtime.bot.id,
            channel_type: ChannelType::LocalCli,
            channel_identity: CHAT_IDENTITY.to_string(),
            capabilities: BindingCapabilities { read: true, write: true, delete: false },
            credentials: std::collections::HashMap::new(),
            created_at: chrono::Utc::now(),
        })
        .await?;

    repl::run(channel, outbound_rx, CHAT_IDENTITY, render_markdown).await
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("memoh=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
