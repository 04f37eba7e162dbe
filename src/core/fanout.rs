//! Notification fan-out to live agent sessions.
//!
//! Delivery is best-effort and never on the write path: events go through
//! per-session unbounded channels, so publishing cannot block on a slow
//! connection, and a dead session only loses its own events.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::queue::SectorQueues;
use crate::core::sessions::{ConnectionId, SessionRegistry};
use crate::model::{Conversation, ConversationStatus, Message, Sector};

/// Events pushed to agent clients over a live connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    NewMessage {
        conversation_id: i64,
        message: Message,
    },
    NewConversation {
        conversation: Conversation,
    },
    QueueUpdate {
        queue_sizes: BTreeMap<Sector, usize>,
    },
    Pong,
}

/// Determines the audience for a domain event and delivers it.
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<SessionRegistry>,
    queues: Arc<SectorQueues>,
}

impl Notifier {
    pub fn new(registry: Arc<SessionRegistry>, queues: Arc<SectorQueues>) -> Self {
        Self { registry, queues }
    }

    /// A message was appended to a conversation.
    ///
    /// Audience: every live session of the assigned agent. While the
    /// conversation waits in a queue there is no targeted delivery — the
    /// sector gets a queue-count refresh instead.
    pub fn notify_new_message(&self, conversation: &Conversation, message: &Message) {
        if conversation.status == ConversationStatus::WaitingQueue {
            if let Some(sector) = conversation.sector {
                self.notify_queue_update(sector);
            }
            return;
        }
        if let Some(agent_id) = conversation.assigned_agent {
            let event = OutboundEvent::NewMessage {
                conversation_id: conversation.id,
                message: message.clone(),
            };
            deliver(self.registry.senders_for_agent(agent_id), &event);
        }
    }

    /// A conversation entered a sector's waiting queue.
    pub fn notify_new_conversation(&self, conversation: &Conversation) {
        if let Some(sector) = conversation.sector {
            let event = OutboundEvent::NewConversation {
                conversation: conversation.clone(),
            };
            deliver(self.sector_audience(sector), &event);
        }
    }

    /// Queue counts changed for a sector.
    ///
    /// Audience: every live session in that sector; the escalation sector
    /// broadcasts to every live session regardless of sector.
    pub fn notify_queue_update(&self, sector: Sector) {
        let event = OutboundEvent::QueueUpdate {
            queue_sizes: self.queues.sizes(),
        };
        deliver(self.sector_audience(sector), &event);
    }

    fn sector_audience(
        &self,
        sector: Sector,
    ) -> Vec<(ConnectionId, mpsc::UnboundedSender<OutboundEvent>)> {
        if sector.is_escalation() {
            self.registry.all_senders()
        } else {
            self.registry.senders_for_sector(sector)
        }
    }
}

/// Send an event to each connection; a failed send skips only that one.
fn deliver(
    targets: Vec<(ConnectionId, mpsc::UnboundedSender<OutboundEvent>)>,
    event: &OutboundEvent,
) {
    for (conn_id, sender) in targets {
        if sender.send(event.clone()).is_err() {
            tracing::debug!("Dropped event for closed connection {}", conn_id);
        }
    }
}
