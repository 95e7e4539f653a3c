use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{Category, Conversation, Message, NewConversation, Role, Tier, User, PLACEHOLDER_TITLE};
use crate::db::store::{ConversationStore, UserStore};
use crate::error::AppError;

/// SQLite implementation of the conversation and user stores.
#[derive(Debug, Clone)]
pub struct DbOperations {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}

impl DbOperations {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the pool described by `config` and apply pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives only as long as its single connection.
        let pool_options = if config.url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!("Database ready at {}", config.url);
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self, AppError> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }

    async fn find_conversation(&self, conversation_id: i64) -> Result<Option<Conversation>, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(conversation)
    }

    /// Owned conversation that is live (`in_bin = false`) or recycled (`in_bin = true`).
    async fn owned_conversation(
        &self,
        user_id: Uuid,
        conversation_id: i64,
        in_bin: bool,
    ) -> Result<Conversation, AppError> {
        match self.find_conversation(conversation_id).await? {
            Some(conversation) if conversation.deleted_at.is_some() == in_bin => {
                if conversation.user_id == user_id {
                    Ok(conversation)
                } else {
                    Err(AppError::PermissionDenied(format!(
                        "conversation {} belongs to another user",
                        conversation_id
                    )))
                }
            }
            _ => Err(AppError::NotFound(format!("conversation {}", conversation_id))),
        }
    }

    async fn owned_category(&self, user_id: Uuid, category_id: i64) -> Result<Category, AppError> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;

        match category {
            Some(category) if category.user_id == user_id => Ok(category),
            Some(_) => Err(AppError::PermissionDenied(format!(
                "category {} belongs to another user",
                category_id
            ))),
            None => Err(AppError::NotFound(format!("category {}", category_id))),
        }
    }

    /// `category_id` followed by every category below it.
    async fn category_subtree(&self, category_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT ?
                UNION
                SELECT categories.id FROM categories JOIN subtree ON categories.parent_id = subtree.id
            )
            SELECT id FROM subtree
            "#,
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_conversation_rows(
        transaction: &mut Transaction<'_, Sqlite>,
        conversation_id: i64,
    ) -> Result<u64, AppError> {
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut **transaction)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut **transaction)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConversationStore for DbOperations {
    async fn ensure_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Option<i64>,
        default_model: &str,
    ) -> Result<Conversation, AppError> {
        match conversation_id {
            Some(id) => self.owned_conversation(user_id, id, false).await,
            None => {
                self.create_conversation(user_id, default_model, NewConversation::default())
                    .await
            }
        }
    }

    async fn create_conversation(
        &self,
        user_id: Uuid,
        model: &str,
        options: NewConversation,
    ) -> Result<Conversation, AppError> {
        if let Some(category_id) = options.category_id {
            self.owned_category(user_id, category_id).await?;
        }

        let now = Utc::now();
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (user_id, title, model, category_id, is_temporary, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(PLACEHOLDER_TITLE)
        .bind(model)
        .bind(options.category_id)
        .bind(options.is_temporary)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!("Created conversation {} for user {}", conversation.id, user_id);
        Ok(conversation)
    }

    async fn get_conversation(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError> {
        self.owned_conversation(user_id, conversation_id, false).await
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ? AND deleted_at IS NULL
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message, AppError> {
        let now = Utc::now();
        let mut transaction = self.begin_transaction().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(now)
        .fetch_one(&mut *transaction)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;
        Ok(message)
    }

    async fn load_history(&self, conversation_id: i64, limit: Option<u32>) -> Result<Vec<Message>, AppError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);

        let mut messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    async fn update_title(&self, conversation_id: i64, title: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_usage_counters(
        &self,
        conversation_id: i64,
        delta_messages: i64,
        delta_tokens: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = message_count + ?, tokens_used = tokens_used + ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(delta_messages)
        .bind(delta_tokens)
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rename_conversation(&self, user_id: Uuid, conversation_id: i64, title: &str) -> Result<Conversation, AppError> {
        self.owned_conversation(user_id, conversation_id, false).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET title = ?, is_title_user_modified = 1, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(title)
        .bind(Utc::now())
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn reset_title(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError> {
        self.owned_conversation(user_id, conversation_id, false).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET title = ?, is_title_user_modified = 0, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(PLACEHOLDER_TITLE)
        .bind(Utc::now())
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn set_generated_title(&self, conversation_id: i64, title: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ? WHERE id = ? AND is_title_user_modified = 0",
        )
        .bind(title)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_category(
        &self,
        user_id: Uuid,
        conversation_id: i64,
        category_id: Option<i64>,
    ) -> Result<Conversation, AppError> {
        self.owned_conversation(user_id, conversation_id, false).await?;
        if let Some(category_id) = category_id {
            self.owned_category(user_id, category_id).await?;
        }

        let conversation = sqlx::query_as::<_, Conversation>(
            "UPDATE conversations SET category_id = ? WHERE id = ? RETURNING *",
        )
        .bind(category_id)
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn soft_delete(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError> {
        self.owned_conversation(user_id, conversation_id, false).await?;

        sqlx::query("UPDATE conversations SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn restore(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError> {
        self.owned_conversation(user_id, conversation_id, true).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "UPDATE conversations SET deleted_at = NULL, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn list_deleted(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ? AND deleted_at IS NOT NULL
            ORDER BY deleted_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn permanent_delete(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError> {
        match self.find_conversation(conversation_id).await? {
            Some(conversation) if conversation.user_id == user_id => {}
            Some(_) => {
                return Err(AppError::PermissionDenied(format!(
                    "conversation {} belongs to another user",
                    conversation_id
                )))
            }
            None => return Err(AppError::NotFound(format!("conversation {}", conversation_id))),
        }

        let mut transaction = self.begin_transaction().await?;
        Self::delete_conversation_rows(&mut transaction, conversation_id).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn permanent_delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut transaction = self.begin_transaction().await?;

        sqlx::query(
            r#"
            DELETE FROM messages WHERE conversation_id IN (
                SELECT id FROM conversations WHERE deleted_at IS NOT NULL AND deleted_at < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *transaction)
        .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE deleted_at IS NOT NULL AND deleted_at < ?")
            .bind(cutoff)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;
        Ok(result.rows_affected())
    }

    async fn create_category(&self, user_id: Uuid, name: &str, parent_id: Option<i64>) -> Result<Category, AppError> {
        if let Some(parent_id) = parent_id {
            self.owned_category(user_id, parent_id).await?;
        }

        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (user_id, parent_id, name, created_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>, AppError> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT * FROM categories WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn update_category(
        &self,
        user_id: Uuid,
        category_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Category, AppError> {
        self.owned_category(user_id, category_id).await?;
        if let Some(parent_id) = parent_id {
            self.owned_category(user_id, parent_id).await?;
            if self.category_subtree(category_id).await?.contains(&parent_id) {
                return Err(AppError::InvalidInput(format!(
                    "category {} cannot be moved under its own subtree",
                    category_id
                )));
            }
        }

        let category = sqlx::query_as::<_, Category>(
            "UPDATE categories SET name = ?, parent_id = ? WHERE id = ? RETURNING *",
        )
        .bind(name)
        .bind(parent_id)
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    async fn delete_category(&self, user_id: Uuid, category_id: i64) -> Result<(), AppError> {
        self.owned_category(user_id, category_id).await?;
        let subtree = self.category_subtree(category_id).await?;

        let mut transaction = self.begin_transaction().await?;
        for id in &subtree {
            sqlx::query("UPDATE conversations SET category_id = NULL WHERE category_id = ?")
                .bind(id)
                .execute(&mut *transaction)
                .await?;
        }
        // Children go with their parent through the cascade on `parent_id`.
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&mut *transaction)
            .await?;
        transaction.commit().await?;

        debug!("Deleted category {} and {} descendants", category_id, subtree.len().saturating_sub(1));
        Ok(())
    }
}

#[async_trait]
impl UserStore for DbOperations {
    async fn ensure_user(&self, user_id: Uuid, email: &str) -> Result<User, AppError> {
        let user = User::new(user_id, email.to_string());

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, tier, tokens_used, memory_info, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.tier)
        .bind(user.tokens_used)
        .bind(&user.memory_info)
        .bind(user.created_at)
        .bind(user.last_seen_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<User, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))
    }

    async fn set_tier(&self, user_id: Uuid, tier: Tier) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET tier = ? WHERE id = ?")
            .bind(tier)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn add_user_usage(&self, user_id: Uuid, delta_tokens: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET tokens_used = tokens_used + ? WHERE id = ?")
            .bind(delta_tokens)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_memory(&self, user_id: Uuid, memory_info: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>("UPDATE users SET memory_info = ? WHERE id = ? RETURNING *")
            .bind(memory_info)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn setup() -> (DbOperations, Uuid) {
        let db = DbOperations::in_memory().await.expect("Failed to open test database");
        let user_id = Uuid::new_v4();
        db.ensure_user(user_id, "owner@example.com").await.unwrap();
        (db, user_id)
    }

    #[tokio::test]
    async fn test_new_conversation_has_placeholder_title() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "gpt-4o-mini").await.unwrap();

        assert_eq!(conversation.title, PLACEHOLDER_TITLE);
        assert!(!conversation.is_title_user_modified);
        assert_eq!(conversation.model, "gpt-4o-mini");
        assert_eq!(conversation.message_count, 0);

        let same = db.ensure_conversation(user_id, Some(conversation.id), "other").await.unwrap();
        assert_eq!(same.id, conversation.id);
        assert_eq!(same.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_ensure_conversation_ownership() {
        let (db, owner) = setup().await;
        let stranger = Uuid::new_v4();
        db.ensure_user(stranger, "stranger@example.com").await.unwrap();

        let conversation = db.ensure_conversation(owner, None, "m").await.unwrap();

        let err = db.ensure_conversation(stranger, Some(conversation.id), "m").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        let err = db.ensure_conversation(owner, Some(9999), "m").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        db.soft_delete(owner, conversation.id).await.unwrap();
        let err = db.ensure_conversation(owner, Some(conversation.id), "m").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_history_is_chronological_and_limited() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            db.append_message(conversation.id, role, &format!("message {}", i)).await.unwrap();
        }

        let all = db.load_history(conversation.id, None).await.unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 0", "message 1", "message 2", "message 3", "message 4"]);
        assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));

        let recent = db.load_history(conversation.id, Some(2)).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 4"]);
        assert_eq!(recent[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_usage_counters_accumulate() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        db.update_usage_counters(conversation.id, 2, 40).await.unwrap();
        db.update_usage_counters(conversation.id, 1, 2).await.unwrap();

        let conversation = db.get_conversation(user_id, conversation.id).await.unwrap();
        assert_eq!(conversation.message_count, 3);
        assert_eq!(conversation.tokens_used, 42);

        db.add_user_usage(user_id, 42).await.unwrap();
        db.add_user_usage(user_id, 8).await.unwrap();
        assert_eq!(db.get_user(user_id).await.unwrap().tokens_used, 50);
    }

    #[tokio::test]
    async fn test_manual_rename_blocks_generated_title() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        db.rename_conversation(user_id, conversation.id, "Trip planning").await.unwrap();
        let applied = db.set_generated_title(conversation.id, "Generated").await.unwrap();
        assert!(!applied);
        assert_eq!(db.get_conversation(user_id, conversation.id).await.unwrap().title, "Trip planning");

        let reset = db.reset_title(user_id, conversation.id).await.unwrap();
        assert_eq!(reset.title, PLACEHOLDER_TITLE);
        assert!(reset.wants_generated_title());

        let applied = db.set_generated_title(conversation.id, "Generated").await.unwrap();
        assert!(applied);
        assert_eq!(db.get_conversation(user_id, conversation.id).await.unwrap().title, "Generated");
    }

    #[tokio::test]
    async fn test_update_title_keeps_generation_open() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        db.update_title(conversation.id, "Draft").await.unwrap();
        let updated = db.get_conversation(user_id, conversation.id).await.unwrap();
        assert_eq!(updated.title, "Draft");
        assert!(!updated.is_title_user_modified);
    }

    #[tokio::test]
    async fn test_recycle_bin_round_trip() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        db.soft_delete(user_id, conversation.id).await.unwrap();
        assert!(db.list_conversations(user_id).await.unwrap().is_empty());
        assert_eq!(db.list_deleted(user_id).await.unwrap().len(), 1);

        let restored = db.restore(user_id, conversation.id).await.unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(db.list_conversations(user_id).await.unwrap().len(), 1);

        let err = db.restore(user_id, conversation.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_permanent_delete_before_cutoff() {
        let (db, user_id) = setup().await;
        let old = db.ensure_conversation(user_id, None, "m").await.unwrap();
        let kept = db.ensure_conversation(user_id, None, "m").await.unwrap();
        db.append_message(old.id, Role::User, "hello").await.unwrap();

        db.soft_delete(user_id, old.id).await.unwrap();

        let purged = db.permanent_delete_before(Utc::now() - ChronoDuration::days(1)).await.unwrap();
        assert_eq!(purged, 0);

        let purged = db.permanent_delete_before(Utc::now() + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(purged, 1);

        assert!(db.list_deleted(user_id).await.unwrap().is_empty());
        assert!(db.load_history(old.id, None).await.unwrap().is_empty());
        assert!(db.get_conversation(user_id, kept.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_permanent_delete_single_conversation() {
        let (db, user_id) = setup().await;
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();
        db.append_message(conversation.id, Role::User, "forget me").await.unwrap();

        db.permanent_delete(user_id, conversation.id).await.unwrap();

        assert!(db.load_history(conversation.id, None).await.unwrap().is_empty());
        let err = db.get_conversation(user_id, conversation.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deleting_category_clears_references() {
        let (db, user_id) = setup().await;
        let category = db.create_category(user_id, "Work", None).await.unwrap();
        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();

        let updated = db.set_category(user_id, conversation.id, Some(category.id)).await.unwrap();
        assert_eq!(updated.category_id, Some(category.id));

        db.delete_category(user_id, category.id).await.unwrap();
        assert!(db.list_categories(user_id).await.unwrap().is_empty());
        let conversation = db.get_conversation(user_id, conversation.id).await.unwrap();
        assert_eq!(conversation.category_id, None);
    }

    #[tokio::test]
    async fn test_deleting_category_removes_subtree() {
        let (db, user_id) = setup().await;
        let work = db.create_category(user_id, "Work", None).await.unwrap();
        let reports = db.create_category(user_id, "Reports", Some(work.id)).await.unwrap();
        let quarterly = db.create_category(user_id, "Quarterly", Some(reports.id)).await.unwrap();
        let home = db.create_category(user_id, "Home", None).await.unwrap();
        assert_eq!(quarterly.parent_id, Some(reports.id));

        let filed = db
            .create_conversation(
                user_id,
                "m",
                NewConversation {
                    is_temporary: false,
                    category_id: Some(quarterly.id),
                },
            )
            .await
            .unwrap();

        db.delete_category(user_id, work.id).await.unwrap();

        let remaining: Vec<_> = db.list_categories(user_id).await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(remaining, vec![home.id]);
        let filed = db.get_conversation(user_id, filed.id).await.unwrap();
        assert_eq!(filed.category_id, None);
    }

    #[tokio::test]
    async fn test_update_category_renames_and_reparents() {
        let (db, user_id) = setup().await;
        let work = db.create_category(user_id, "Work", None).await.unwrap();
        let notes = db.create_category(user_id, "notes", None).await.unwrap();

        let moved = db.update_category(user_id, notes.id, "Meeting notes", Some(work.id)).await.unwrap();
        assert_eq!(moved.name, "Meeting notes");
        assert_eq!(moved.parent_id, Some(work.id));

        // Moving a category below its own child would create a cycle.
        let err = db.update_category(user_id, work.id, "Work", Some(notes.id)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let err = db.update_category(user_id, work.id, "Work", Some(work.id)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let top = db.update_category(user_id, notes.id, "Notes", None).await.unwrap();
        assert_eq!(top.parent_id, None);

        let stranger = Uuid::new_v4();
        db.ensure_user(stranger, "stranger@example.com").await.unwrap();
        let err = db.update_category(stranger, work.id, "Mine", None).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
        let err = db.create_category(stranger, "Child", Some(work.id)).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_create_conversation_with_options() {
        let (db, user_id) = setup().await;
        let travel = db.create_category(user_id, "Travel", None).await.unwrap();

        let conversation = db
            .create_conversation(
                user_id,
                "m",
                NewConversation {
                    is_temporary: true,
                    category_id: Some(travel.id),
                },
            )
            .await
            .unwrap();
        assert!(conversation.is_temporary);
        assert_eq!(conversation.category_id, Some(travel.id));
        assert_eq!(conversation.title, PLACEHOLDER_TITLE);

        let err = db
            .create_conversation(
                user_id,
                "m",
                NewConversation {
                    is_temporary: false,
                    category_id: Some(9999),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let plain = db.ensure_conversation(user_id, None, "m").await.unwrap();
        assert!(!plain.is_temporary);
        assert_eq!(plain.category_id, None);
    }

    #[tokio::test]
    async fn test_ensure_user_is_idempotent() {
        let (db, user_id) = setup().await;
        db.set_tier(user_id, Tier::Pro).await.unwrap();
        db.update_memory(user_id, "Prefers short answers").await.unwrap();

        let user = db.ensure_user(user_id, "owner@example.com").await.unwrap();
        assert_eq!(user.tier, Tier::Pro);
        assert_eq!(user.memory_info, "Prefers short answers");
    }

    #[tokio::test]
    async fn test_pool_status() {
        let (db, _) = setup().await;
        let status = db.pool_status();

        assert!(status.total_connections <= 1);
        assert_eq!(
            status.active_connections + status.idle_connections,
            status.total_connections
        );
    }
}
