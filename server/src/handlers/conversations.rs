//! Conversation directory handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use harvest_chat_core::{
    Conversation, ConversationQuery, CreateConversationRequest, CreateConversationResponse, FlagRequest,
    MarkReadResponse, Message,
};

use crate::{error::Result, AppState};

use super::AuthUser;

/// List the caller's conversations, filtered and searched
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<Conversation>>> {
    let conversations = state.service.list_conversations(&user, &query).await?;
    Ok(Json(conversations))
}

/// Get or create the conversation with a counterpart
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<CreateConversationResponse>> {
    let conversation_id = state.service.create_conversation(&user, &req).await?;
    Ok(Json(CreateConversationResponse { conversation_id }))
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<MarkReadResponse>> {
    let updated = state.service.mark_as_read(&user, &conversation_id).await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn set_archived(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<Conversation>> {
    let conversation = state
        .service
        .set_archived(&user, &conversation_id, req.value)
        .await?;
    Ok(Json(conversation))
}

pub async fn set_muted(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<Conversation>> {
    let conversation = state.service.set_muted(&user, &conversation_id, req.value).await?;
    Ok(Json(conversation))
}

/// Visible messages of a conversation, oldest first
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>> {
    let messages = state.service.get_messages(&user, &conversation_id).await?;
    Ok(Json(messages))
}
