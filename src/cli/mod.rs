use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod chat;
pub mod clear;
pub mod history;
pub mod info;
pub mod send;

use crate::backend::ChatApi;
use crate::chat::{ChatSession, ChatSessionBuilder};
use crate::core::{AppConfig, ClientContext};

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat {},
    /// Send a single message and print the streamed reply
    Send {
        #[arg(long, short)]
        message: String,
    },
    /// Print the persisted transcript
    History {},
    /// Delete the persisted transcript
    Clear {},
    /// Show the model the service runs and its usage summary
    Info {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the chat service
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory where the transcript and preferences are stored
    #[arg(long, global = true)]
    storage_path: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let mut config = AppConfig::default();
    if let Some(url) = &args.api_url {
        config = config.with_api_url(url);
    }
    if let Some(path) = &args.storage_path {
        config = config.with_storage_path(path);
    }
    tracing::debug!("Using {} with storage at {}", config.api_url, config.db_path);

    let mut ctx = ClientContext::open(config).await?;

    // Handle each sub command
    match args.command {
        Some(Command::Chat {}) | None => {
            chat::run(&mut ctx).await?;
        }
        Some(Command::Send { message }) => {
            send::run(&ctx, &message).await?;
        }
        Some(Command::History {}) => {
            history::run(&ctx).await?;
        }
        Some(Command::Clear {}) => {
            clear::run(&ctx).await?;
        }
        Some(Command::Info {}) => {
            info::run(&ctx).await?;
        }
    }

    Ok(())
}

// Logs go to stderr so streamed replies on stdout stay clean
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Builds a session for the configured service and restores the
/// persisted transcript.
pub(crate) async fn open_session(ctx: &ClientContext) -> Result<ChatSession> {
    let api = ChatApi::from_config(&ctx.config)?;
    let mut session = ChatSessionBuilder::new(api, &ctx.db)
        .session_key(&ctx.config.session_key)
        .build();
    let restored = session.load().await;
    tracing::debug!("Restored {} messages", restored);
    Ok(session)
}
