//! Automated handling of `bot_handling` conversations.

pub mod responder;

pub use responder::{intent_to_sector, BotReply, KeywordResponder, Responder};

use std::sync::Arc;

use chrono::{Local, NaiveTime};

use crate::channel::{InboundEvent, Messenger};
use crate::core::{Dispatcher, Notifier};
use crate::error::{Error, Result};
use crate::model::{Conversation, ConversationStatus, Lead, Message, Sector, SenderType};
use crate::store::ConversationStore;

/// Business-hours window used to pick the bot's off-hours wording.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    pub opens: NaiveTime,
    pub closes: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            opens: NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
            closes: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
        }
    }
}

impl BusinessHours {
    pub fn is_open(&self, time: NaiveTime) -> bool {
        time >= self.opens && time < self.closes
    }
}

/// Drives a conversation through the automated responder and hands off to
/// the dispatcher on escalation.
pub struct BotEngine {
    store: Arc<ConversationStore>,
    dispatcher: Arc<Dispatcher>,
    notifier: Notifier,
    responder: Arc<dyn Responder>,
    messenger: Arc<dyn Messenger>,
    hours: BusinessHours,
}

impl BotEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        dispatcher: Arc<Dispatcher>,
        notifier: Notifier,
        responder: Arc<dyn Responder>,
        messenger: Arc<dyn Messenger>,
        hours: BusinessHours,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
            responder,
            messenger,
            hours,
        }
    }

    /// Handle one normalized inbound event from the chat channel.
    ///
    /// Appends the customer message, then either hands it to the assigned
    /// agent's sessions, refreshes the queue view, or runs the responder,
    /// depending on the conversation's state.
    pub async fn process_inbound(&self, event: InboundEvent) -> Result<()> {
        let lead = self
            .store
            .get_or_create_lead(&event.lead_reference, event.sender_name.as_deref())?;
        let conversation = self.active_conversation_for(&lead)?;

        let customer_message = self.store.insert_message(
            conversation.id,
            SenderType::Customer,
            Some(&lead.phone),
            &event.content,
        )?;
        self.notifier
            .notify_new_message(&conversation, &customer_message);

        match conversation.status {
            ConversationStatus::BotHandling => {
                self.run_responder(&lead, &conversation, &customer_message)
                    .await
            }
            // A human owns (or will own) the conversation; the bot stays out.
            ConversationStatus::InProgress | ConversationStatus::WaitingQueue => Ok(()),
            current => Err(Error::InvalidStateTransition { current }),
        }
    }

    /// Latest open conversation for the lead; a recently resolved one is
    /// reactivated back to the bot, otherwise a fresh conversation starts.
    fn active_conversation_for(&self, lead: &Lead) -> Result<Conversation> {
        if let Some(conversation) = self.store.find_active_conversation(lead.id)? {
            return Ok(conversation);
        }
        if let Some(resolved) = self.store.find_recently_resolved(lead.id)? {
            if self.store.reactivate_conversation(resolved.id)? {
                tracing::info!("Conversation {} reactivated for lead {}", resolved.id, lead.id);
                return self.store.get_conversation(resolved.id);
            }
        }
        let conversation = self.store.create_conversation(lead.id)?;
        tracing::info!("New conversation {} for lead {}", conversation.id, lead.id);
        Ok(conversation)
    }

    async fn run_responder(
        &self,
        lead: &Lead,
        conversation: &Conversation,
        customer_message: &Message,
    ) -> Result<()> {
        let context = self.store.list_messages(conversation.id)?;
        let business_hours = self.hours.is_open(Local::now().time());
        let reply = self
            .responder
            .respond(&customer_message.content, &context, business_hours)
            .await?;

        let bot_message = self.store.insert_message(
            conversation.id,
            SenderType::Bot,
            Some("bot"),
            &reply.response,
        )?;
        // Outbound delivery is best-effort: the reply is already recorded.
        if let Err(e) = self.messenger.send_text(&lead.phone, &reply.response).await {
            tracing::error!("Failed to deliver bot reply to {}: {}", lead.phone, e);
        }
        self.notifier.notify_new_message(conversation, &bot_message);

        if let Some(intent) = reply.intent.as_deref() {
            self.store.set_intent(conversation.id, intent)?;
        }

        if reply.needs_human {
            let sector = reply
                .intent
                .as_deref()
                .and_then(intent_to_sector)
                .unwrap_or(Sector::Geral);
            self.dispatcher.escalate(conversation.id, sector).await?;
        }
        Ok(())
    }

    /// Send a message authored by a human agent and deliver it outbound.
    ///
    /// Fails without recording anything if outbound delivery fails, and
    /// rejects writes against resolved or closed conversations.
    pub async fn send_agent_message(
        &self,
        conversation_id: i64,
        agent_id: i64,
        content: &str,
    ) -> Result<Message> {
        let conversation = self.store.get_conversation(conversation_id)?;
        if matches!(
            conversation.status,
            ConversationStatus::Resolved | ConversationStatus::Closed
        ) {
            return Err(Error::InvalidStateTransition {
                current: conversation.status,
            });
        }

        let lead = self.store.get_lead(conversation.lead_id)?;
        self.messenger.send_text(&lead.phone, content).await?;

        let message = self.store.insert_message(
            conversation_id,
            SenderType::Agent,
            Some(&agent_id.to_string()),
            content,
        )?;
        self.notifier.notify_new_message(&conversation, &message);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConsoleMessenger;
    use crate::core::{SectorQueues, SessionRegistry};
    use chrono::Utc;

    fn engine() -> (Arc<ConversationStore>, Arc<SectorQueues>, BotEngine) {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let queues = Arc::new(SectorQueues::new());
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Notifier::new(registry, queues.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queues.clone(),
            notifier.clone(),
        ));
        let engine = BotEngine::new(
            store.clone(),
            dispatcher,
            notifier,
            Arc::new(KeywordResponder::new()),
            Arc::new(ConsoleMessenger),
            BusinessHours::default(),
        );
        (store, queues, engine)
    }

    fn inbound(content: &str) -> InboundEvent {
        InboundEvent {
            lead_reference: "+5511988887777".to_string(),
            sender_name: Some("Ana".to_string()),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inbound_creates_conversation_and_bot_reply() {
        let (store, queues, engine) = engine();

        engine.process_inbound(inbound("bom dia")).await.unwrap();

        let conversations = store.list_conversations(None, None, 10).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].status, ConversationStatus::BotHandling);

        let messages = store.list_messages(conversations[0].id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender_type, SenderType::Customer);
        assert_eq!(messages[1].sender_type, SenderType::Bot);
        assert!(queues.is_empty());
    }

    #[tokio::test]
    async fn test_human_request_escalates_to_queue() {
        let (store, queues, engine) = engine();

        engine
            .process_inbound(inbound("quero falar com um atendente"))
            .await
            .unwrap();

        let conversations = store.list_conversations(None, None, 10).unwrap();
        let conv = &conversations[0];
        assert_eq!(conv.status, ConversationStatus::WaitingQueue);
        assert_eq!(conv.sector, Some(Sector::AtendimentoHumano));
        assert_eq!(queues.len(Sector::AtendimentoHumano), 1);
    }

    #[tokio::test]
    async fn test_bot_stays_out_of_queued_conversation() {
        let (store, _queues, engine) = engine();

        engine
            .process_inbound(inbound("quero falar com um atendente"))
            .await
            .unwrap();
        engine.process_inbound(inbound("tem alguém aí?")).await.unwrap();

        let conversations = store.list_conversations(None, None, 10).unwrap();
        assert_eq!(conversations.len(), 1);
        let messages = store.list_messages(conversations[0].id).unwrap();
        // First exchange (customer + bot) plus the follow-up customer
        // message; no second bot reply while waiting.
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].sender_type, SenderType::Customer);
    }

    #[tokio::test]
    async fn test_agent_message_rejected_on_resolved() {
        let (store, _queues, engine) = engine();
        let lead = store.get_or_create_lead("+551195", None).unwrap();
        let conv = store.create_conversation(lead.id).unwrap();
        store
            .mark_assigned(conv.id, 1, ConversationStatus::BotHandling)
            .unwrap();
        store.mark_resolved(conv.id).unwrap();

        let err = engine
            .send_agent_message(conv.id, 1, "ainda está aí?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                current: ConversationStatus::Resolved
            }
        ));
    }

    #[test]
    fn test_business_hours_window() {
        let hours = BusinessHours::default();
        assert!(hours.is_open(NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
        assert!(!hours.is_open(NaiveTime::from_hms_opt(19, 0, 0).unwrap()));
        assert!(!hours.is_open(NaiveTime::from_hms_opt(7, 59, 0).unwrap()));
    }
}
