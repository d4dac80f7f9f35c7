//! Wire protocol shared by the server and its clients.
//!
//! REST bodies are plain JSON objects. WebSocket frames are JSON text
//! tagged as `{"type": ..., "payload": ...}`.

use serde::{Deserialize, Serialize};

use crate::models::*;

// ============================================================================
// Live topics
// ============================================================================

/// A stream of full snapshots a connection can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "conversation_id", rename_all = "snake_case")]
pub enum Topic {
    /// The authenticated user's conversation directory.
    Conversations,
    Messages(String),
    Typing(String),
}

// ============================================================================
// WebSocket frames
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "subscribe")]
    Subscribe { topic: Topic },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: Topic },

    #[serde(rename = "typing")]
    Typing { conversation_id: String, is_typing: bool },

    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsServerMessage {
    #[serde(rename = "authenticated")]
    Authenticated { user_id: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "conversations")]
    Conversations { conversations: Vec<Conversation> },

    #[serde(rename = "messages")]
    Messages {
        conversation_id: String,
        messages: Vec<Message>,
    },

    #[serde(rename = "typing")]
    Typing {
        conversation_id: String,
        users: Vec<TypingUser>,
    },

    #[serde(rename = "unsubscribed")]
    Unsubscribed { topic: Topic },

    #[serde(rename = "pong")]
    Pong,
}

impl WsServerMessage {
    /// Topic a snapshot frame belongs to, if it is one.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            WsServerMessage::Conversations { .. } => Some(Topic::Conversations),
            WsServerMessage::Messages { conversation_id, .. } => {
                Some(Topic::Messages(conversation_id.clone()))
            }
            WsServerMessage::Typing { conversation_id, .. } => {
                Some(Topic::Typing(conversation_id.clone()))
            }
            _ => None,
        }
    }
}

// ============================================================================
// REST request/response bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub counterpart_id: String,
    pub counterpart_name: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Existing conversation; when absent one is looked up or created
    /// from the counterpart and product fields.
    pub conversation_id: Option<String>,
    pub content: String,
    pub counterpart_id: String,
    pub counterpart_name: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub reply_to: Option<String>,
    pub client_message_id: Option<String>,
}

impl SendMessageRequest {
    pub fn text(conversation_id: &str, counterpart_id: &str, counterpart_name: &str, content: &str) -> Self {
        Self {
            conversation_id: Some(conversation_id.to_string()),
            content: content.to_string(),
            counterpart_id: counterpart_id.to_string(),
            counterpart_name: counterpart_name.to_string(),
            message_type: MessageType::Text,
            attachment: None,
            product_id: None,
            product_name: None,
            reply_to: None,
            client_message_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

/// Body for archive/mute toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagRequest {
    pub value: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationQuery {
    #[serde(default)]
    pub filter: ConversationFilter,
    #[serde(default)]
    pub q: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickRepliesResponse {
    pub replies: Vec<String>,
}
