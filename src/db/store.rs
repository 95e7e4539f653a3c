use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Category, Conversation, Message, NewConversation, Role, Tier, User};
use crate::error::AppError;

/// Durable record of conversations and their messages.
///
/// Every operation that takes a `user_id` is scoped to that owner: a live
/// conversation owned by someone else yields `PermissionDenied`, a missing or
/// recycled one yields `NotFound`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load an owned, live conversation or create a fresh one when `conversation_id` is `None`.
    async fn ensure_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Option<i64>,
        default_model: &str,
    ) -> Result<Conversation, AppError>;

    /// Create an empty conversation, optionally filed under one of the user's categories.
    async fn create_conversation(
        &self,
        user_id: Uuid,
        model: &str,
        options: NewConversation,
    ) -> Result<Conversation, AppError>;

    async fn get_conversation(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError>;

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError>;

    async fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message, AppError>;

    /// Most recent `limit` messages (all when `None`) in the order they were appended.
    async fn load_history(&self, conversation_id: i64, limit: Option<u32>) -> Result<Vec<Message>, AppError>;

    async fn update_title(&self, conversation_id: i64, title: &str) -> Result<(), AppError>;

    async fn update_usage_counters(
        &self,
        conversation_id: i64,
        delta_messages: i64,
        delta_tokens: i64,
    ) -> Result<(), AppError>;

    async fn rename_conversation(&self, user_id: Uuid, conversation_id: i64, title: &str) -> Result<Conversation, AppError>;

    async fn reset_title(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError>;

    /// Store a generated title unless the user has renamed the conversation. Returns whether it was applied.
    async fn set_generated_title(&self, conversation_id: i64, title: &str) -> Result<bool, AppError>;

    async fn set_category(
        &self,
        user_id: Uuid,
        conversation_id: i64,
        category_id: Option<i64>,
    ) -> Result<Conversation, AppError>;

    async fn soft_delete(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError>;

    async fn restore(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError>;

    async fn list_deleted(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError>;

    async fn permanent_delete(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError>;

    /// Purge recycled conversations deleted before `cutoff`. Returns how many were removed.
    async fn permanent_delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;

    async fn create_category(&self, user_id: Uuid, name: &str, parent_id: Option<i64>) -> Result<Category, AppError>;

    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>, AppError>;

    /// Rename and re-parent. A category cannot move under itself or one of its descendants.
    async fn update_category(
        &self,
        user_id: Uuid,
        category_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Category, AppError>;

    /// Delete the category and its whole subtree; conversations filed there become uncategorized.
    async fn delete_category(&self, user_id: Uuid, category_id: i64) -> Result<(), AppError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch the user, creating a free-tier record on first sight.
    async fn ensure_user(&self, user_id: Uuid, email: &str) -> Result<User, AppError>;

    async fn get_user(&self, user_id: Uuid) -> Result<User, AppError>;

    async fn set_tier(&self, user_id: Uuid, tier: Tier) -> Result<(), AppError>;

    async fn add_user_usage(&self, user_id: Uuid, delta_tokens: i64) -> Result<(), AppError>;

    async fn update_memory(&self, user_id: Uuid, memory_info: &str) -> Result<User, AppError>;
}
