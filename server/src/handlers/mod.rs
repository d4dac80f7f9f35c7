//! HTTP request handlers for Harvest Chat Server

pub mod conversations;
pub mod health;
pub mod messages;
pub mod users;
pub mod websocket;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use harvest_chat_core::User;

use crate::{error::AppError, AppState};

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Extract Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        // Parse "Bearer <token>"
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized)?;

        let user = authenticate(state, token).await?;
        Ok(AuthUser(user))
    }
}

/// Resolve an access token to its active user.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, AppError> {
    let row = state
        .storage
        .find_user_by_token(token)
        .await
        .map_err(|_| AppError::Unauthorized)?
        .ok_or(AppError::Unauthorized)?;

    Ok(row.into())
}
