//! Messages within a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Bot,
    Agent,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Bot => "bot",
            SenderType::Agent => "agent",
        }
    }
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SenderType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(SenderType::Customer),
            "bot" => Ok(SenderType::Bot),
            "agent" => Ok(SenderType::Agent),
            _ => Err(crate::error::Error::NotFound(format!(
                "unknown sender type: {}",
                s
            ))),
        }
    }
}

/// One message in a conversation.
///
/// Append-only: once created, only the `is_read` flag may change.
/// Replay order is non-decreasing `created_at`, tie-broken by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: SenderType,
    /// Phone for customers, agent id for agents, "bot" for the responder.
    pub sender_id: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
