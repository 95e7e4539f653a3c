use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::AuthenticatedUser;
use crate::chat::{ChatRequest, ChatTurn, ResponseMode};
use crate::db::NewConversation;
use crate::error::AppError;
use crate::transport::{collect_reply, sse_response};
use crate::AppState;

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub model: Option<String>,
    pub conversation_id: Option<i64>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub enable_thinking: bool,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub message: String,
    pub model: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub enable_thinking: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationBody {
    pub model: Option<String>,
    #[serde(default)]
    pub is_temporary: bool,
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TitleBody {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct CategoryBody {
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryDetailsBody {
    pub name: String,
    pub parent_id: Option<i64>,
}

impl CategoryDetailsBody {
    fn name(&self) -> Result<&str, AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("category name must not be empty".to_string()));
        }
        Ok(name)
    }
}

fn mode(stream: bool) -> ResponseMode {
    if stream {
        ResponseMode::Streamed
    } else {
        ResponseMode::Buffered
    }
}

async fn respond(turn: ChatTurn, stream: bool) -> Result<HttpResponse, AppError> {
    if stream {
        return Ok(sse_response(turn));
    }
    let reply = collect_reply(turn).await?;
    Ok(HttpResponse::Ok().json(reply))
}

pub async fn list_models(user: AuthenticatedUser, state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.orchestrator.list_models(user.tier))
}

pub async fn chat(
    user: AuthenticatedUser,
    body: web::Json<ChatBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    info!("Received chat request from user {}", user.id);

    let turn = state
        .orchestrator
        .process_user_message(ChatRequest {
            user: user.0,
            text: body.message,
            model: body.model,
            conversation_id: body.conversation_id,
            mode: mode(body.stream),
            enable_thinking: body.enable_thinking,
        })
        .await
        .map_err(|e| {
            warn!("Chat request rejected: {}", e);
            e
        })?;

    respond(turn, body.stream).await
}

pub async fn post_message(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<MessageBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    let body = body.into_inner();
    info!("Received message for conversation {} from user {}", conversation_id, user.id);

    let turn = state
        .orchestrator
        .process_user_message(ChatRequest {
            user: user.0,
            text: body.message,
            model: body.model,
            conversation_id: Some(conversation_id),
            mode: mode(body.stream),
            enable_thinking: body.enable_thinking,
        })
        .await?;

    respond(turn, body.stream).await
}

pub async fn create_conversation(
    user: AuthenticatedUser,
    body: Option<web::Json<CreateConversationBody>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    let model = state.orchestrator.catalog().resolve(body.model.as_deref(), user.tier)?;

    let options = NewConversation {
        is_temporary: body.is_temporary,
        category_id: body.category_id,
    };
    let conversation = state
        .orchestrator
        .store()
        .create_conversation(user.id, &model.id, options)
        .await?;
    info!("Created conversation {} for user {}", conversation.id, user.id);
    Ok(HttpResponse::Created().json(conversation))
}

pub async fn list_conversations(user: AuthenticatedUser, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let conversations = state.orchestrator.store().list_conversations(user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

pub async fn get_messages(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let store = state.orchestrator.store();
    let conversation = store.get_conversation(user.id, path.into_inner()).await?;
    let messages = store.load_history(conversation.id, None).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// Rename a conversation. An empty title resets it and lets the model pick one again.
pub async fn update_title(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<TitleBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    let title = body.title.trim();
    let store = state.orchestrator.store();

    let conversation = if title.is_empty() {
        let conversation = store.reset_title(user.id, conversation_id).await?;
        state.orchestrator.regenerate_title(user.id, conversation_id).await?;
        conversation
    } else {
        store.rename_conversation(user.id, conversation_id, title).await?
    };

    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn update_category(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<CategoryBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .orchestrator
        .store()
        .set_category(user.id, path.into_inner(), body.category_id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn auto_classify(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation = state.orchestrator.auto_classify(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn delete_conversation(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    state.orchestrator.store().soft_delete(user.id, conversation_id).await?;
    info!("Moved conversation {} to the recycle bin", conversation_id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_recycle_bin(user: AuthenticatedUser, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let conversations = state.orchestrator.store().list_deleted(user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

pub async fn restore_conversation(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let conversation = state.orchestrator.store().restore(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn purge_conversation(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.orchestrator.delete_conversation(user.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn create_category(
    user: AuthenticatedUser,
    body: web::Json<CategoryDetailsBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let category = state
        .orchestrator
        .store()
        .create_category(user.id, body.name()?, body.parent_id)
        .await?;
    Ok(HttpResponse::Created().json(category))
}

pub async fn list_categories(user: AuthenticatedUser, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let categories = state.orchestrator.store().list_categories(user.id).await?;
    Ok(HttpResponse::Ok().json(categories))
}

/// Rename a category and move it under `parent_id` (top level when absent).
pub async fn edit_category(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<CategoryDetailsBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let category = state
        .orchestrator
        .store()
        .update_category(user.id, path.into_inner(), body.name()?, body.parent_id)
        .await?;
    Ok(HttpResponse::Ok().json(category))
}

pub async fn delete_category(
    user: AuthenticatedUser,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.orchestrator.store().delete_category(user.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
