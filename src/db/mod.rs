//! Database module for the parley server
//!
//! Conversation, message, category and user persistence on SQLite.

pub mod models;
pub mod operations;
pub mod store;

pub use models::{Category, Conversation, Message, NewConversation, Role, Tier, User, PLACEHOLDER_TITLE};
pub use operations::{DbOperations, DbPoolStatus};
pub use store::{ConversationStore, UserStore};
