pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod proxy;
pub mod tasks;
pub mod transport;
pub mod websocket;

use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthenticatedUser, TokenService};
pub use chat::{ChatEvent, ChatOrchestrator, ChatRequest, ChatTurn, ModelCatalog, ResponseMode};
pub use db::{ConversationStore, DbOperations, UserStore};
pub use proxy::UpstreamChatClient;
pub use websocket::{ChatRoom, ConnectionRegistry};

/// Health check endpoint handler
/// Returns server status, timestamp and live WebSocket connections
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let pool = state.db.pool_status();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connections": state.registry.connection_count(),
        "database": {
            "total_connections": pool.total_connections,
            "idle_connections": pool.idle_connections,
        },
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: Arc<DbOperations>,
    pub tokens: Arc<TokenService>,
    pub orchestrator: ChatOrchestrator,
    pub registry: ConnectionRegistry,
    pub room: ChatRoom,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::connect(&config.database).await?;
        let upstream = proxy::build_client(&config.upstream)?;
        Ok(Self::with_parts(config, Arc::new(db), upstream))
    }

    /// Assemble state around an existing store and upstream client.
    pub fn with_parts(config: Settings, db: Arc<DbOperations>, upstream: Arc<dyn UpstreamChatClient>) -> Self {
        let orchestrator = ChatOrchestrator::new(
            db.clone(),
            db.clone(),
            upstream,
            ModelCatalog::new(config.models.clone()),
            config.chat.clone(),
        );
        let registry = ConnectionRegistry::new();

        Self {
            tokens: Arc::new(TokenService::new(config.auth.jwt_secret.clone())),
            room: ChatRoom::new(registry.clone()),
            config: Arc::new(config),
            db,
            orchestrator,
            registry,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.db.pool().close().await;
        Ok(())
    }
}

/// Register every route. Shared by the binary and the integration tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use auth::handlers as profile;
    use chat::handlers as chat;

    cfg.route("/health", web::get().to(health_check))
        .route("/ws", web::get().to(websocket::chat_route))
        .route("/ws/room", web::get().to(websocket::room_route))
        .service(
            web::scope("/api/v1")
                .route("/profile", web::get().to(profile::profile))
                .route("/profile/memory", web::put().to(profile::update_memory))
                .route("/models", web::get().to(chat::list_models))
                .route("/chat", web::post().to(chat::chat))
                .route("/conversations", web::post().to(chat::create_conversation))
                .route("/conversations", web::get().to(chat::list_conversations))
                .route("/conversations/{id}", web::delete().to(chat::delete_conversation))
                .route("/conversations/{id}/messages", web::post().to(chat::post_message))
                .route("/conversations/{id}/messages", web::get().to(chat::get_messages))
                .route("/conversations/{id}/title", web::put().to(chat::update_title))
                .route("/conversations/{id}/category", web::put().to(chat::update_category))
                .route("/conversations/{id}/auto-classify", web::post().to(chat::auto_classify))
                .route("/recycle-bin", web::get().to(chat::list_recycle_bin))
                .route("/recycle-bin/{id}", web::delete().to(chat::purge_conversation))
                .route("/recycle-bin/{id}/restore", web::post().to(chat::restore_conversation))
                .route("/categories", web::post().to(chat::create_category))
                .route("/categories", web::get().to(chat::list_categories))
                .route("/categories/{id}", web::put().to(chat::edit_category))
                .route("/categories/{id}", web::delete().to(chat::delete_category)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_state_creation() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.expect("Failed to build state");

        assert_eq!(state.registry.connection_count(), 0);
        assert_eq!(state.config.environment, "test");
        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_app_state_clone() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.unwrap();
        let cloned = state.clone();

        // Verify Arc references are shared
        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.db, &cloned.db));
    }
}
