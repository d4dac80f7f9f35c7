//! Message handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use harvest_chat_core::{EditMessageRequest, Message, ReactionRequest, SendMessageRequest};

use crate::{error::Result, AppState};

use super::AuthUser;

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    let message = state.service.send_message(&user, &req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Replace the content of one of the caller's text messages
pub async fn edit_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>> {
    let message = state
        .service
        .edit_message(&user, &message_id, &req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
) -> Result<StatusCode> {
    state.service.delete_message(&user, &message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_reaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<Message>> {
    let message = state.service.add_reaction(&user, &message_id, &req.emoji).await?;
    Ok(Json(message))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<Message>> {
    let message = state
        .service
        .remove_reaction(&user, &message_id, &req.emoji)
        .await?;
    Ok(Json(message))
}
