//! Registry of live agent connections.
//!
//! Process-wide, purely in-memory: rebuilt empty on restart, no recovery of
//! prior sessions. An agent may hold several concurrent connections
//! (multiple tabs); every one of them receives events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::fanout::OutboundEvent;
use crate::model::Sector;

/// Opaque handle for one live connection.
pub type ConnectionId = String;

struct SessionEntry {
    agent_id: i64,
    sector: Sector,
    sender: mpsc::UnboundedSender<OutboundEvent>,
    last_seen: Instant,
}

/// Maps live connections to agents and sectors.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Add a session for an agent's connection. Returns the connection id
    /// used for `touch` and `unregister`.
    pub fn register(
        &self,
        agent_id: i64,
        sector: Sector,
        sender: mpsc::UnboundedSender<OutboundEvent>,
    ) -> ConnectionId {
        let conn_id = ulid::Ulid::new().to_string();
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            conn_id.clone(),
            SessionEntry {
                agent_id,
                sector,
                sender,
                last_seen: Instant::now(),
            },
        );
        tracing::info!(
            "Agent {} connected ({}, sector {}), {} live sessions",
            agent_id,
            conn_id,
            sector,
            sessions.len()
        );
        conn_id
    }

    /// Remove exactly one session. Returns the agent id and whether this was
    /// the agent's last live connection (agent now offline for presence).
    pub fn unregister(&self, conn_id: &str) -> Option<(i64, bool)> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.remove(conn_id)?;
        let still_online = sessions
            .values()
            .any(|other| other.agent_id == entry.agent_id);
        tracing::info!(
            "Agent {} disconnected ({}), online: {}",
            entry.agent_id,
            conn_id,
            still_online
        );
        Some((entry.agent_id, !still_online))
    }

    /// Record traffic on a connection, deferring its liveness deadline.
    pub fn touch(&self, conn_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(conn_id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Agents with at least one live connection in the sector.
    pub fn active_agents(&self, sector: Sector) -> Vec<i64> {
        let sessions = self.sessions.lock().unwrap();
        let mut agents: Vec<i64> = sessions
            .values()
            .filter(|entry| entry.sector == sector)
            .map(|entry| entry.agent_id)
            .collect();
        agents.sort_unstable();
        agents.dedup();
        agents
    }

    pub fn is_online(&self, agent_id: i64) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions.values().any(|entry| entry.agent_id == agent_id)
    }

    /// Event senders for every live connection of one agent.
    pub fn senders_for_agent(
        &self,
        agent_id: i64,
    ) -> Vec<(ConnectionId, mpsc::UnboundedSender<OutboundEvent>)> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .iter()
            .filter(|(_, entry)| entry.agent_id == agent_id)
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }

    /// Event senders for every live connection in a sector.
    pub fn senders_for_sector(
        &self,
        sector: Sector,
    ) -> Vec<(ConnectionId, mpsc::UnboundedSender<OutboundEvent>)> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .iter()
            .filter(|(_, entry)| entry.sector == sector)
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }

    /// Event senders for all live connections.
    pub fn all_senders(&self) -> Vec<(ConnectionId, mpsc::UnboundedSender<OutboundEvent>)> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .iter()
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }

    /// Connections with no traffic within the grace window.
    pub fn stale_connections(&self, grace: Duration) -> Vec<ConnectionId> {
        let sessions = self.sessions.lock().unwrap();
        let now = Instant::now();
        sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > grace)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<OutboundEvent>,
        mpsc::UnboundedReceiver<OutboundEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_register_unregister() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let conn = registry.register(1, Sector::Comercial, tx);

        assert!(registry.is_online(1));
        assert_eq!(registry.active_agents(Sector::Comercial), vec![1]);

        let (agent, went_offline) = registry.unregister(&conn).unwrap();
        assert_eq!(agent, 1);
        assert!(went_offline);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_multiple_connections_per_agent() {
        let registry = SessionRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let conn_a = registry.register(1, Sector::Comercial, tx_a);
        let _conn_b = registry.register(1, Sector::Comercial, tx_b);

        assert_eq!(registry.senders_for_agent(1).len(), 2);
        assert_eq!(registry.active_agents(Sector::Comercial), vec![1]);

        // Dropping one tab keeps the agent online.
        let (_, went_offline) = registry.unregister(&conn_a).unwrap();
        assert!(!went_offline);
        assert!(registry.is_online(1));
    }

    #[test]
    fn test_stale_detection() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let conn = registry.register(1, Sector::Rh, tx);

        assert!(registry.stale_connections(Duration::from_secs(60)).is_empty());

        let stale = registry.stale_connections(Duration::ZERO);
        assert_eq!(stale, vec![conn]);
    }
}
