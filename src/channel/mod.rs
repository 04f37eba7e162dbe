//! Chat-channel boundary: normalized inbound events and outbound delivery.

pub mod messenger;

pub use messenger::{ConsoleMessenger, Messenger, WhatsAppMessenger};

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Normalized inbound event from the external chat channel.
///
/// The webhook collaborator has already unwrapped the provider payload;
/// the core only sees the lead reference (phone), the text, and when it
/// was sent.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub lead_reference: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
