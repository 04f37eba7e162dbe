//! SectorDesk library root.

pub mod bot;
pub mod channel;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod model;
pub mod store;
pub mod web;

pub use bot::{BotEngine, BotReply, KeywordResponder, Responder};
pub use channel::{InboundEvent, Messenger};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Dispatcher, Notifier, OutboundEvent, SectorQueues, SessionRegistry};
pub use error::{Error, Result};
pub use heartbeat::{DisconnectReason, HeartbeatConfig, HeartbeatSupervisor, ReconnectPolicy};
pub use model::{Conversation, ConversationStatus, Lead, Message, Sector, SenderType};
pub use store::ConversationStore;
pub use web::{run_server, AppState, WebServerConfig};
