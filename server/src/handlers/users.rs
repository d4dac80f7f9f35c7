//! User handlers

use axum::{extract::State, Json};
use harvest_chat_core::{QuickRepliesResponse, User};

use crate::{error::Result, AppState};

use super::AuthUser;

/// Get the authenticated user's profile
pub async fn get_current_user(AuthUser(user): AuthUser) -> Result<Json<User>> {
    Ok(Json(user))
}

/// Canned replies offered in the composer
pub async fn quick_replies(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<QuickRepliesResponse>> {
    Ok(Json(QuickRepliesResponse {
        replies: state.service.quick_replies().to_vec(),
    }))
}
