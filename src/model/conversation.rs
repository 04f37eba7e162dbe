//! Conversations and the leads that own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sector::Sector;

/// Lifecycle status of a conversation.
///
/// `BotHandling` is the initial state; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    BotHandling,
    WaitingQueue,
    InProgress,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::BotHandling => "bot_handling",
            ConversationStatus::WaitingQueue => "waiting_queue",
            ConversationStatus::InProgress => "in_progress",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Closed => "closed",
        }
    }

    /// Terminal statuses reject every mutation except `Resolved -> Closed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationStatus::Closed)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot_handling" => Ok(ConversationStatus::BotHandling),
            "waiting_queue" => Ok(ConversationStatus::WaitingQueue),
            "in_progress" => Ok(ConversationStatus::InProgress),
            "resolved" => Ok(ConversationStatus::Resolved),
            "closed" => Ok(ConversationStatus::Closed),
            _ => Err(crate::error::Error::NotFound(format!(
                "unknown conversation status: {}",
                s
            ))),
        }
    }
}

/// A customer conversation.
///
/// Invariant: `assigned_agent` is set if and only if `status` is
/// `InProgress`. Mutated only through `Dispatcher` transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub lead_id: i64,
    pub status: ConversationStatus,
    pub sector: Option<Sector>,
    pub assigned_agent: Option<i64>,
    pub intent: Option<String>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Check the assignment invariant.
    pub fn assignment_consistent(&self) -> bool {
        self.assigned_agent.is_some() == (self.status == ConversationStatus::InProgress)
    }
}

/// External party on the customer side of a conversation, keyed by phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub phone: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConversationStatus::BotHandling,
            ConversationStatus::WaitingQueue,
            ConversationStatus::InProgress,
            ConversationStatus::Resolved,
            ConversationStatus::Closed,
        ] {
            let parsed: ConversationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_assignment_invariant() {
        let mut conv = Conversation {
            id: 1,
            lead_id: 1,
            status: ConversationStatus::BotHandling,
            sector: None,
            assigned_agent: None,
            intent: None,
            started_at: Utc::now(),
            resolved_at: None,
        };
        assert!(conv.assignment_consistent());

        conv.status = ConversationStatus::InProgress;
        assert!(!conv.assignment_consistent());

        conv.assigned_agent = Some(7);
        assert!(conv.assignment_consistent());
    }
}
