//! CLI commands for SectorDesk using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::bot::KeywordResponder;
use crate::channel::{ConsoleMessenger, Messenger, WhatsAppMessenger};
use crate::config::load_settings;
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatSupervisor;
use crate::store::ConversationStore;
use crate::web::{run_server, AppState, WebServerConfig};

#[derive(Parser)]
#[command(name = "sectordesk")]
#[command(version = "0.1.0")]
#[command(about = "SectorDesk - sector-routed customer support desk", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the dispatcher server
    Serve {
        /// Bind host (overrides settings)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides settings)
        #[arg(long)]
        port: Option<u16>,

        /// SQLite database path (overrides settings)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print conversation and queue statistics
    Stats {
        /// SQLite database path (overrides settings)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Serve { host, port, db } => {
                cmd_serve(host.clone(), *port, db.clone()).await
            }
            Command::Stats { db } => cmd_stats(db.clone()),
        }
    }
}

async fn cmd_serve(host: Option<String>, port: Option<u16>, db: Option<PathBuf>) -> Result<()> {
    let settings = load_settings()?;

    let db_path = match db {
        Some(path) => path,
        None => settings.database.resolve_path()?,
    };
    let store = Arc::new(ConversationStore::open(&db_path)?);
    tracing::info!("Conversation store at {}", db_path.display());

    let messenger: Arc<dyn Messenger> = if settings.whatsapp.enabled {
        Arc::new(WhatsAppMessenger::new(
            settings.whatsapp.api_url.clone(),
            &settings.whatsapp.phone_number_id,
            settings.whatsapp.access_token.clone(),
        ))
    } else {
        tracing::warn!("Outbound channel disabled; replies are logged only");
        Arc::new(ConsoleMessenger)
    };

    let heartbeat = settings.heartbeat.to_config();
    let state = AppState::build(
        store,
        Arc::new(KeywordResponder::new()),
        messenger,
        settings.bot.business_hours()?,
        heartbeat.clone(),
    )?;

    // Liveness sweeper runs for the lifetime of the server.
    let supervisor = Arc::new(HeartbeatSupervisor::new(state.registry.clone(), heartbeat));
    tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            supervisor.start().await;
        }
    });

    let config = WebServerConfig {
        host: host.unwrap_or(settings.server.host),
        port: port.unwrap_or(settings.server.port),
    };

    run_server(state, config)
        .await
        .map_err(|e| Error::Other(format!("server error: {}", e)))
}

fn cmd_stats(db: Option<PathBuf>) -> Result<()> {
    let settings = load_settings()?;
    let db_path = match db {
        Some(path) => path,
        None => settings.database.resolve_path()?,
    };
    let store = ConversationStore::open(&db_path)?;

    println!("Conversations by status:");
    for (status, count) in store.counts_by_status()? {
        println!("  {:<16} {}", status, count);
    }

    println!("Conversations by sector:");
    for (sector, count) in store.counts_by_sector()? {
        println!("  {:<20} {}", sector, count);
    }

    let waiting = store.list_waiting()?;
    println!("Waiting in queues: {}", waiting.len());

    Ok(())
}
