//! Domain model: sectors, conversations, messages, leads.

pub mod conversation;
pub mod message;
pub mod sector;

pub use conversation::{Conversation, ConversationStatus, Lead};
pub use message::{Message, SenderType};
pub use sector::Sector;
