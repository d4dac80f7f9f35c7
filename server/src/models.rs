//! Database rows for Harvest Chat Server
//!
//! API and WebSocket types live in `harvest_chat_core`; these are the
//! shapes read back from SQLite.

use harvest_chat_core::{Conversation, Message, MessageType, Reaction, User, UserRole};
use serde::Serialize;
use std::collections::HashMap;

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub token_hash: String,
    pub created_at: String,
    pub is_active: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id,
            display_name: row.display_name,
            role: row.role.parse().unwrap_or(UserRole::Buyer),
        }
    }
}

// ============================================================================
// Conversation Models
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seller_id: String,
    pub seller_name: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<i64>,
    pub archived: bool,
    pub muted: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnreadRow {
    pub conversation_id: String,
    pub user_id: String,
    pub count: i64,
}

impl ConversationRow {
    pub fn into_conversation(self, unread: HashMap<String, u32>) -> Conversation {
        Conversation {
            id: self.id,
            buyer_id: self.buyer_id,
            buyer_name: self.buyer_name,
            seller_id: self.seller_id,
            seller_name: self.seller_name,
            product_id: self.product_id,
            product_name: self.product_name,
            last_message: self.last_message,
            last_message_time: self.last_message_time,
            unread_count: unread,
            archived: self.archived,
            muted: self.muted,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Message Models
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: String,
    pub file_name: Option<String>,
    pub image_url: Option<String>,
    pub file_url: Option<String>,
    pub timestamp: i64,
    pub is_read: bool,
    pub is_edited: bool,
    pub reply_to: Option<String>,
    pub client_message_id: Option<String>,
    pub deleted_at: Option<i64>,
}

impl MessageRow {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn into_message(self, reactions: Vec<Reaction>) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            content: self.content,
            message_type: MessageType::from(self.message_type),
            file_name: self.file_name,
            image_url: self.image_url,
            file_url: self.file_url,
            timestamp: self.timestamp,
            read: self.is_read,
            edited: self.is_edited,
            reply_to: self.reply_to,
            reactions,
            client_message_id: self.client_message_id,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Fields for a message insert, already validated.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_name: Option<String>,
    pub image_url: Option<String>,
    pub file_url: Option<String>,
    pub reply_to: Option<String>,
    pub client_message_id: Option<String>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub total_users: i64,
    pub conversations: i64,
    pub messages: i64,
}
