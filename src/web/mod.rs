//! Web surface: REST request API plus live WebSocket connections.

pub mod api;
pub mod router;
pub mod server;
pub mod ws;

pub use server::{run_server, WebServerConfig};

use std::sync::Arc;

use crate::bot::{BotEngine, BusinessHours, Responder};
use crate::channel::Messenger;
use crate::core::{Dispatcher, Notifier, SectorQueues, SessionRegistry};
use crate::error::Result;
use crate::heartbeat::HeartbeatConfig;
use crate::store::ConversationStore;

/// Shared state handed to every handler and live connection.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub queues: Arc<SectorQueues>,
    pub registry: Arc<SessionRegistry>,
    pub notifier: Notifier,
    pub dispatcher: Arc<Dispatcher>,
    pub bot: Arc<BotEngine>,
    pub heartbeat: HeartbeatConfig,
}

impl AppState {
    /// Wire the dispatcher core around a store and rebuild the waiting
    /// queues so in-memory membership matches stored status.
    pub fn build(
        store: Arc<ConversationStore>,
        responder: Arc<dyn Responder>,
        messenger: Arc<dyn Messenger>,
        hours: BusinessHours,
        heartbeat: HeartbeatConfig,
    ) -> Result<Self> {
        let queues = Arc::new(SectorQueues::new());
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Notifier::new(registry.clone(), queues.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queues.clone(),
            notifier.clone(),
        ));
        dispatcher.restore_queues()?;
        let bot = Arc::new(BotEngine::new(
            store.clone(),
            dispatcher.clone(),
            notifier.clone(),
            responder,
            messenger,
            hours,
        ));

        Ok(Self {
            store,
            queues,
            registry,
            notifier,
            dispatcher,
            bot,
            heartbeat,
        })
    }
}
