use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use crate::auth::AuthenticatedUser;
use crate::db::UserStore;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MemoryRequest {
    #[serde(default)]
    pub memory_info: String,
}

pub async fn profile(user: AuthenticatedUser) -> HttpResponse {
    HttpResponse::Ok().json(user.0)
}

pub async fn update_memory(
    user: AuthenticatedUser,
    req: web::Json<MemoryRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received memory update from user {}", user.id);
    let updated = state.db.update_memory(user.id, req.memory_info.trim()).await?;
    Ok(HttpResponse::Ok().json(updated))
}
