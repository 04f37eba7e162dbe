//! Dispatcher core: conversation state machine, sector queues, session
//! registry, and notification fan-out.

pub mod fanout;
pub mod queue;
pub mod sessions;
pub mod state;

pub use fanout::{Notifier, OutboundEvent};
pub use queue::SectorQueues;
pub use sessions::{ConnectionId, SessionRegistry};
pub use state::Dispatcher;
