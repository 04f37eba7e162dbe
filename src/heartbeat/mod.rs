//! Connection liveness supervision and reconnection policy.
//!
//! Clients probe with `{"type":"ping"}` on a fixed interval; any traffic on
//! a connection defers its deadline. A sweeper task unregisters connections
//! with no traffic inside the grace window, which drops their event senders
//! and closes the socket. Reconnection is the client's job: an abnormal drop
//! retries after a fixed backoff and then re-requests a full snapshot, a
//! graceful close never retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::core::SessionRegistry;

/// Liveness timing knobs.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Cadence clients are expected to ping at.
    pub interval: Duration,
    /// No traffic for this long means the connection is dead.
    pub grace: Duration,
    /// How often the sweeper looks for dead connections.
    pub sweep_every: Duration,
    /// Client-side delay before re-attempting an abnormally dropped connection.
    pub reconnect_backoff: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace: Duration::from_secs(90),
            sweep_every: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit logout or component teardown. No reconnect.
    Graceful,
    /// Network drop, missed heartbeats, server restart. Reconnect after backoff.
    Abnormal,
}

/// Client-side reconnection rule: retry abnormal drops after a fixed
/// backoff, never retry an intentional close. After reconnecting, the
/// client must refetch snapshots; missed events are not replayed.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    pub fn retry_after(&self, reason: DisconnectReason) -> Option<Duration> {
        match reason {
            DisconnectReason::Graceful => None,
            DisconnectReason::Abnormal => Some(self.backoff),
        }
    }
}

/// Server-side sweeper that unregisters connections past the grace window.
pub struct HeartbeatSupervisor {
    registry: Arc<SessionRegistry>,
    config: HeartbeatConfig,
    running: Arc<RwLock<bool>>,
}

impl HeartbeatSupervisor {
    pub fn new(registry: Arc<SessionRegistry>, config: HeartbeatConfig) -> Self {
        Self {
            registry,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the sweep loop until [`Self::stop`] is called.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }
        tracing::info!(
            "Heartbeat supervisor started (grace {:?}, sweep every {:?})",
            self.config.grace,
            self.config.sweep_every
        );

        loop {
            {
                let running = self.running.read().await;
                if !*running {
                    tracing::info!("Heartbeat supervisor stopping");
                    break;
                }
            }

            self.sweep();
            sleep(self.config.sweep_every).await;
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One pass: unregister every connection past the grace window.
    pub fn sweep(&self) -> usize {
        let stale = self.registry.stale_connections(self.config.grace);
        let count = stale.len();
        for conn_id in stale {
            tracing::warn!("Connection {} missed its heartbeat window, dropping", conn_id);
            self.registry.unregister(&conn_id);
        }
        count
    }
}
