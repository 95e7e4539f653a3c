use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Title every conversation starts with until one is generated or set.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// Coarse permission level gating which models a user may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Tier {
    Free,
    #[serde(alias = "premium")]
    Pro,
    Admin,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Admin => "admin",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub tier: Tier,
    pub tokens_used: i64,
    pub memory_info: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, email: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            tier: Tier::Free,
            tokens_used: 0,
            memory_info: String::new(),
            created_at: now,
            last_seen_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub title: String,
    pub is_title_user_modified: bool,
    pub model: String,
    pub category_id: Option<i64>,
    pub is_temporary: bool,
    pub message_count: i64,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// True while the title is still the placeholder and nobody renamed it.
    pub fn wants_generated_title(&self) -> bool {
        !self.is_title_user_modified && self.title == PLACEHOLDER_TITLE
    }
}

/// Caller choices for a conversation created ahead of its first message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewConversation {
    pub is_temporary: bool,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub parent_id: Option<i64>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Pro < Tier::Admin);
    }

    #[test]
    fn test_tier_accepts_premium_alias() {
        let tier: Tier = serde_json::from_str("\"premium\"").unwrap();
        assert_eq!(tier, Tier::Pro);
        assert_eq!(serde_json::to_string(&Tier::Pro).unwrap(), "\"pro\"");
    }

    #[test]
    fn test_new_user_defaults_to_free() {
        let user = User::new(Uuid::new_v4(), "a@example.com".to_string());
        assert_eq!(user.tier, Tier::Free);
        assert_eq!(user.tokens_used, 0);
    }
}
