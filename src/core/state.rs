//! Conversation state machine: legal transitions and their side effects.
//!
//! Every transition on a single conversation runs inside that conversation's
//! exclusive section, so no two transitions interleave; different
//! conversations proceed fully in parallel. Store writes are guarded by the
//! expected current status and side effects (queue membership, fan-out)
//! apply only after the store acknowledges the write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::core::fanout::Notifier;
use crate::core::queue::SectorQueues;
use crate::error::{Error, Result};
use crate::model::{Conversation, ConversationStatus, Sector};
use crate::store::ConversationStore;

/// Bounded wait for a conversation's exclusive section during a claim. A
/// claim that cannot enter within this window lost the race for practical
/// purposes; blocking longer would only degrade interactive latency.
pub const CLAIM_WAIT: Duration = Duration::from_millis(500);

/// Owns conversation lifecycle transitions and queue/fan-out side effects.
pub struct Dispatcher {
    store: Arc<ConversationStore>,
    queues: Arc<SectorQueues>,
    notifier: Notifier,
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl Dispatcher {
    pub fn new(store: Arc<ConversationStore>, queues: Arc<SectorQueues>, notifier: Notifier) -> Self {
        Self {
            store,
            queues,
            notifier,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory queues from stored waiting conversations, so
    /// queue membership stays consistent with status across a restart.
    pub fn restore_queues(&self) -> Result<usize> {
        let waiting = self.store.list_waiting()?;
        let mut restored = 0;
        for (sector, id) in waiting {
            if self.queues.enqueue(sector, id) {
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!("Restored {} waiting conversations into sector queues", restored);
        }
        Ok(restored)
    }

    fn lock_for(&self, conversation_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(conversation_id).or_default().clone()
    }

    async fn exclusive(&self, conversation_id: i64) -> OwnedMutexGuard<()> {
        self.lock_for(conversation_id).lock_owned().await
    }

    /// Exclusive section with a bounded wait; a timeout means another claim
    /// holds the section and the caller should treat the race as lost.
    async fn exclusive_bounded(&self, conversation_id: i64) -> Result<OwnedMutexGuard<()>> {
        timeout(CLAIM_WAIT, self.lock_for(conversation_id).lock_owned())
            .await
            .map_err(|_| Error::AlreadyClaimed)
    }

    /// `bot_handling -> waiting_queue`, or a sector move while already
    /// waiting. Appends to the sector queue tail and notifies the sector.
    pub async fn escalate(&self, conversation_id: i64, sector: Sector) -> Result<Conversation> {
        let _guard = self.exclusive(conversation_id).await;
        let conv = self.store.get_conversation(conversation_id)?;

        match conv.status {
            ConversationStatus::BotHandling => {
                self.guarded(
                    self.store
                        .mark_waiting(conversation_id, sector, ConversationStatus::BotHandling)?,
                    conversation_id,
                )?;
                self.queues.enqueue(sector, conversation_id);
                let updated = self.store.get_conversation(conversation_id)?;
                self.notifier.notify_new_conversation(&updated);
                self.notifier.notify_queue_update(sector);
                tracing::info!(
                    "Conversation {} escalated to {} queue",
                    conversation_id,
                    sector
                );
                Ok(updated)
            }
            ConversationStatus::WaitingQueue if conv.sector == Some(sector) => {
                // Re-escalation into the same sector: idempotent.
                self.queues.enqueue(sector, conversation_id);
                Ok(conv)
            }
            ConversationStatus::WaitingQueue => {
                let previous = conv.sector;
                self.guarded(
                    self.store
                        .mark_waiting(conversation_id, sector, ConversationStatus::WaitingQueue)?,
                    conversation_id,
                )?;
                self.queues.enqueue(sector, conversation_id);
                let updated = self.store.get_conversation(conversation_id)?;
                if let Some(previous) = previous {
                    self.notifier.notify_queue_update(previous);
                }
                self.notifier.notify_queue_update(sector);
                tracing::info!(
                    "Conversation {} moved from {:?} to {} queue",
                    conversation_id,
                    previous,
                    sector
                );
                Ok(updated)
            }
            current => Err(Error::InvalidStateTransition { current }),
        }
    }

    /// An agent takes the conversation: `waiting_queue -> in_progress` via
    /// the claim protocol, or `bot_handling -> in_progress` as a manual
    /// takeover that bypasses the queue.
    ///
    /// At most one agent wins a claim on a waiting conversation; losers get
    /// [`Error::AlreadyClaimed`]. Claiming another sector's queue is denied
    /// unless the queue belongs to the escalation sector.
    pub async fn accept(
        &self,
        conversation_id: i64,
        agent_id: i64,
        agent_sector: Sector,
    ) -> Result<Conversation> {
        let _guard = self.exclusive_bounded(conversation_id).await?;
        let conv = self.store.get_conversation(conversation_id)?;

        match conv.status {
            ConversationStatus::WaitingQueue => {
                let sector = conv.sector.unwrap_or(Sector::Geral);
                if sector != agent_sector && !sector.is_escalation() {
                    return Err(Error::PermissionDenied(format!(
                        "agent in sector {} cannot claim from the {} queue",
                        agent_sector, sector
                    )));
                }
                self.guarded_claim(
                    self.store.mark_assigned(
                        conversation_id,
                        agent_id,
                        ConversationStatus::WaitingQueue,
                    )?,
                    conversation_id,
                )?;
                // Store confirmed the assignment; the queue entry must go.
                if self
                    .queues
                    .dequeue_for_claim(sector, conversation_id)
                    .is_err()
                {
                    self.queues.remove(conversation_id);
                }
                let updated = self.store.get_conversation(conversation_id)?;
                self.notifier.notify_queue_update(sector);
                tracing::info!(
                    "Agent {} claimed conversation {} from {} queue",
                    agent_id,
                    conversation_id,
                    sector
                );
                Ok(updated)
            }
            ConversationStatus::BotHandling => {
                self.guarded_claim(
                    self.store.mark_assigned(
                        conversation_id,
                        agent_id,
                        ConversationStatus::BotHandling,
                    )?,
                    conversation_id,
                )?;
                let updated = self.store.get_conversation(conversation_id)?;
                if let Some(sector) = updated.sector {
                    self.notifier.notify_queue_update(sector);
                }
                tracing::info!(
                    "Agent {} took over conversation {} from the bot",
                    agent_id,
                    conversation_id
                );
                Ok(updated)
            }
            ConversationStatus::InProgress => Err(Error::AlreadyClaimed),
            current => Err(Error::InvalidStateTransition { current }),
        }
    }

    /// `in_progress -> resolved`. Only the assigned agent may resolve.
    pub async fn resolve(&self, conversation_id: i64, agent_id: i64) -> Result<Conversation> {
        let _guard = self.exclusive(conversation_id).await;
        let conv = self.store.get_conversation(conversation_id)?;

        match conv.status {
            ConversationStatus::InProgress => {
                if conv.assigned_agent != Some(agent_id) {
                    return Err(Error::PermissionDenied(format!(
                        "conversation {} is assigned to another agent",
                        conversation_id
                    )));
                }
                self.guarded(self.store.mark_resolved(conversation_id)?, conversation_id)?;
                let updated = self.store.get_conversation(conversation_id)?;
                if let Some(sector) = updated.sector {
                    self.notifier.notify_queue_update(sector);
                }
                tracing::info!("Agent {} resolved conversation {}", agent_id, conversation_id);
                Ok(updated)
            }
            current => Err(Error::InvalidStateTransition { current }),
        }
    }

    /// Terminal archival: `resolved -> closed`, plus the administrative
    /// cancellation path from any other non-terminal state. Removes any
    /// waiting-queue entry so none goes stale.
    pub async fn close(&self, conversation_id: i64) -> Result<Conversation> {
        let _guard = self.exclusive(conversation_id).await;
        let conv = self.store.get_conversation(conversation_id)?;

        if conv.status == ConversationStatus::Closed {
            return Err(Error::InvalidStateTransition {
                current: ConversationStatus::Closed,
            });
        }
        self.guarded(self.store.mark_closed(conversation_id)?, conversation_id)?;
        let removed_from = self.queues.remove(conversation_id);
        let updated = self.store.get_conversation(conversation_id)?;
        if let Some(sector) = removed_from.or(updated.sector) {
            self.notifier.notify_queue_update(sector);
        }
        tracing::info!("Conversation {} closed", conversation_id);
        Ok(updated)
    }

    /// Turn a failed guarded store write into the taxonomy error carrying
    /// the conversation's actual current state.
    fn guarded(&self, changed: bool, conversation_id: i64) -> Result<()> {
        if changed {
            return Ok(());
        }
        let current = self.store.get_conversation(conversation_id)?.status;
        Err(Error::InvalidStateTransition { current })
    }

    /// Like [`Self::guarded`], but a conversation that raced into
    /// `in_progress` means a lost claim rather than an illegal request.
    fn guarded_claim(&self, changed: bool, conversation_id: i64) -> Result<()> {
        if changed {
            return Ok(());
        }
        let current = self.store.get_conversation(conversation_id)?.status;
        if current == ConversationStatus::InProgress {
            return Err(Error::AlreadyClaimed);
        }
        Err(Error::InvalidStateTransition { current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fanout::OutboundEvent;
    use crate::core::sessions::SessionRegistry;
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<ConversationStore>,
        queues: Arc<SectorQueues>,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<Dispatcher>,
    }

    fn harness() -> Harness {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let queues = Arc::new(SectorQueues::new());
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Notifier::new(registry.clone(), queues.clone());
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), queues.clone(), notifier));
        Harness {
            store,
            queues,
            registry,
            dispatcher,
        }
    }

    impl Harness {
        fn new_conversation(&self) -> i64 {
            let lead = self.store.get_or_create_lead("+5511999990000", None).unwrap();
            self.store.create_conversation(lead.id).unwrap().id
        }

        /// Assignment and queue-membership invariants from the data model.
        fn assert_invariants(&self, id: i64) {
            let conv = self.store.get_conversation(id).unwrap();
            assert!(conv.assignment_consistent(), "assignment invariant broken");
            let queued = self.queues.position(id);
            if conv.status == ConversationStatus::WaitingQueue {
                assert_eq!(queued, conv.sector, "waiting conversation not in its sector queue");
            } else {
                assert_eq!(queued, None, "non-waiting conversation left in a queue");
            }
        }
    }

    #[tokio::test]
    async fn test_escalation_scenario() {
        let h = harness();
        let id = h.new_conversation();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.registry.register(1, Sector::Comercial, tx);

        let conv = h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::WaitingQueue);
        assert_eq!(conv.sector, Some(Sector::Comercial));
        assert_eq!(h.queues.len(Sector::Comercial), 1);
        h.assert_invariants(id);

        // The live comercial session saw the conversation and the new count.
        let mut saw_queue_update = false;
        while let Ok(event) = rx.try_recv() {
            if let OutboundEvent::QueueUpdate { queue_sizes } = event {
                assert_eq!(queue_sizes[&Sector::Comercial], 1);
                saw_queue_update = true;
            }
        }
        assert!(saw_queue_update);
    }

    #[tokio::test]
    async fn test_escalate_is_idempotent_per_sector() {
        let h = harness();
        let id = h.new_conversation();

        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();
        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();

        assert_eq!(h.queues.entries(Sector::Comercial), vec![id]);
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_sector_move_while_waiting() {
        let h = harness();
        let id = h.new_conversation();

        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();
        let conv = h.dispatcher.escalate(id, Sector::Rh).await.unwrap();

        assert_eq!(conv.sector, Some(Sector::Rh));
        assert_eq!(h.queues.len(Sector::Comercial), 0);
        assert_eq!(h.queues.entries(Sector::Rh), vec![id]);
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_claim_race_single_winner() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();

        let mut handles = Vec::new();
        for agent_id in 1..=8 {
            let dispatcher = h.dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.accept(id, agent_id, Sector::Comercial).await
            }));
        }

        let mut winners = Vec::new();
        let mut already_claimed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(conv) => winners.push(conv),
                Err(Error::AlreadyClaimed) => already_claimed += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(already_claimed, 7);

        let conv = h.store.get_conversation(id).unwrap();
        assert_eq!(conv.status, ConversationStatus::InProgress);
        assert_eq!(conv.assigned_agent, winners[0].assigned_agent);
        assert!(conv.assigned_agent.is_some());
        assert_eq!(h.queues.len(Sector::Comercial), 0);
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_cross_sector_claim_denied() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();

        let err = h.dispatcher.accept(id, 9, Sector::Rh).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(h.queues.len(Sector::Comercial), 1);
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_escalation_queue_claimable_cross_sector() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher
            .escalate(id, Sector::AtendimentoHumano)
            .await
            .unwrap();

        let conv = h.dispatcher.accept(id, 9, Sector::Rh).await.unwrap();
        assert_eq!(conv.assigned_agent, Some(9));
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_takeover_bypasses_queue() {
        let h = harness();
        let id = h.new_conversation();

        let conv = h.dispatcher.accept(id, 3, Sector::Comercial).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::InProgress);
        assert_eq!(conv.assigned_agent, Some(3));
        assert!(h.queues.is_empty());
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_resolve_permission() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher.escalate(id, Sector::Comercial).await.unwrap();
        h.dispatcher.accept(id, 1, Sector::Comercial).await.unwrap();

        // Agent 2 is not assigned: denied, state untouched.
        let err = h.dispatcher.resolve(id, 2).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        let conv = h.store.get_conversation(id).unwrap();
        assert_eq!(conv.status, ConversationStatus::InProgress);
        assert_eq!(conv.assigned_agent, Some(1));

        let conv = h.dispatcher.resolve(id, 1).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::Resolved);
        assert_eq!(conv.assigned_agent, None);
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_invalid_transitions_report_current_state() {
        let h = harness();
        let id = h.new_conversation();

        let err = h.dispatcher.resolve(id, 1).await.unwrap_err();
        match err {
            Error::InvalidStateTransition { current } => {
                assert_eq!(current, ConversationStatus::BotHandling)
            }
            other => panic!("unexpected error: {}", other),
        }

        h.dispatcher.close(id).await.unwrap();
        let err = h.dispatcher.escalate(id, Sector::Geral).await.unwrap_err();
        match err {
            Error::InvalidStateTransition { current } => {
                assert_eq!(current, ConversationStatus::Closed)
            }
            other => panic!("unexpected error: {}", other),
        }

        // Terminal: close again also fails.
        assert!(h.dispatcher.close(id).await.is_err());
    }

    #[tokio::test]
    async fn test_close_clears_queue_entry() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher.escalate(id, Sector::Compras).await.unwrap();

        h.dispatcher.close(id).await.unwrap();
        assert!(h.queues.is_empty());
        h.assert_invariants(id);
    }

    #[tokio::test]
    async fn test_resolved_then_closed() {
        let h = harness();
        let id = h.new_conversation();
        h.dispatcher.accept(id, 1, Sector::Geral).await.unwrap();
        h.dispatcher.resolve(id, 1).await.unwrap();

        let conv = h.dispatcher.close(id).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::Closed);
        assert!(conv.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_restore_queues_from_store() {
        let h = harness();
        let first = h.new_conversation();
        let second = h.new_conversation();
        h.dispatcher.escalate(first, Sector::Rh).await.unwrap();
        h.dispatcher.escalate(second, Sector::Rh).await.unwrap();

        // Simulate a restart: fresh queues, same store.
        let queues = Arc::new(SectorQueues::new());
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Notifier::new(registry, queues.clone());
        let dispatcher = Dispatcher::new(h.store.clone(), queues.clone(), notifier);

        let restored = dispatcher.restore_queues().unwrap();
        assert_eq!(restored, 2);
        assert_eq!(queues.entries(Sector::Rh), vec![first, second]);
    }
}
