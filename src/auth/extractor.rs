use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;
use std::ops::Deref;
use tracing::warn;

use crate::db::{User, UserStore};
use crate::error::{AppError, AuthError};
use crate::AppState;

/// The caller behind a valid bearer token, provisioned on first sight.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl Deref for AuthenticatedUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

/// Token from `Authorization: Bearer ...`, falling back to a `token` query parameter for WebSocket upgrades.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    header.or_else(|| {
        web::Query::<std::collections::HashMap<String, String>>::from_query(req.query_string())
            .ok()
            .and_then(|query| query.get("token").cloned())
            .filter(|token| !token.is_empty())
    })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state.ok_or_else(|| AppError::Internal("application state missing".to_string()))?;
            let token = token.ok_or(AuthError::MissingToken)?;

            let claims = state.tokens.decode_token(&token).map_err(|e| {
                warn!("Rejected bearer token: {}", e);
                e
            })?;
            let user_id = claims.user_id()?;

            let user = state.db.ensure_user(user_id, &claims.email).await?;
            Ok(AuthenticatedUser(user))
        })
    }
}
