//! Error types for SectorDesk.

use thiserror::Error;

use crate::model::ConversationStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error: {0}")]
    Channel(String),

    /// Attempted transition not permitted from the conversation's current
    /// state. Carries the actual state so the caller can resync its view.
    #[error("Invalid state transition: conversation is currently {current}")]
    InvalidStateTransition { current: ConversationStatus },

    /// Lost a queue-claim race: another agent removed the conversation
    /// from the waiting queue first.
    #[error("Conversation already claimed by another agent")]
    AlreadyClaimed,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
