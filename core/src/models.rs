//! Data models for Harvest Chat

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Buyer,
    Seller,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Buyer => "buyer",
            UserRole::Seller => "seller",
            UserRole::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(UserRole::Buyer),
            "seller" => Ok(UserRole::Seller),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    pub role: UserRole,
}

// ============================================================================
// Conversation
// ============================================================================

/// One buyer/seller thread, optionally scoped to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seller_id: String,
    pub seller_name: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<i64>,
    /// user_id -> messages that user has not read yet
    #[serde(default)]
    pub unread_count: HashMap<String, u32>,
    pub archived: bool,
    pub muted: bool,
    pub created_at: i64,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The other side of the conversation, as seen by `me`.
    pub fn counterpart_id(&self, me: &str) -> &str {
        if self.buyer_id == me {
            &self.seller_id
        } else {
            &self.buyer_id
        }
    }

    pub fn counterpart_name(&self, me: &str) -> &str {
        if self.buyer_id == me {
            &self.seller_name
        } else {
            &self.buyer_name
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }

    /// Millisecond timestamp used for recency ordering.
    pub fn last_activity(&self) -> i64 {
        self.last_message_time.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Archived,
}

impl std::str::FromStr for ConversationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(ConversationFilter::All),
            "unread" => Ok(ConversationFilter::Unread),
            "archived" => Ok(ConversationFilter::Archived),
            other => Err(format!("unknown filter: {}", other)),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }

    /// Human-readable stand-in shown as content for attachment messages.
    pub fn placeholder(&self, file_name: Option<&str>) -> String {
        match self {
            MessageType::Text => String::new(),
            MessageType::Image => "📷 Image".to_string(),
            MessageType::File => match file_name {
                Some(name) if !name.trim().is_empty() => format!("📎 {}", name.trim()),
                _ => "📎 File".to_string(),
            },
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "image" => MessageType::Image,
            "file" => MessageType::File,
            _ => MessageType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_name: Option<String>,
    pub image_url: Option<String>,
    pub file_url: Option<String>,
    /// Milliseconds since the Unix epoch, assigned by the store.
    pub timestamp: i64,
    pub read: bool,
    pub edited: bool,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Temporary id the sending client used for its optimistic copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Resolved reference to uploaded media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub file_name: Option<String>,
}

// ============================================================================
// Typing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUser {
    pub user_id: String,
    pub user_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation {
            id: "c1".into(),
            buyer_id: "alice".into(),
            buyer_name: "Alice".into(),
            seller_id: "green-acres".into(),
            seller_name: "Green Acres Farm".into(),
            product_id: None,
            product_name: None,
            last_message: None,
            last_message_time: None,
            unread_count: HashMap::from([("alice".to_string(), 2)]),
            archived: false,
            muted: false,
            created_at: 10,
        }
    }

    #[test]
    fn test_counterpart_resolution() {
        let conv = conversation();
        assert_eq!(conv.counterpart_id("alice"), "green-acres");
        assert_eq!(conv.counterpart_name("alice"), "Green Acres Farm");
        assert_eq!(conv.counterpart_id("green-acres"), "alice");
        assert_eq!(conv.counterpart_name("green-acres"), "Alice");
        assert!(conv.is_participant("alice"));
        assert!(!conv.is_participant("mallory"));
    }

    #[test]
    fn test_unread_defaults_to_zero() {
        let conv = conversation();
        assert_eq!(conv.unread_for("alice"), 2);
        assert_eq!(conv.unread_for("green-acres"), 0);
    }

    #[test]
    fn test_last_activity_falls_back_to_creation() {
        let mut conv = conversation();
        assert_eq!(conv.last_activity(), 10);
        conv.last_message_time = Some(99);
        assert_eq!(conv.last_activity(), 99);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(MessageType::Image.placeholder(None), "📷 Image");
        assert_eq!(MessageType::File.placeholder(Some("invoice.pdf")), "📎 invoice.pdf");
        assert_eq!(MessageType::File.placeholder(Some("  ")), "📎 File");
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("".parse::<ConversationFilter>(), Ok(ConversationFilter::All));
        assert_eq!("unread".parse::<ConversationFilter>(), Ok(ConversationFilter::Unread));
        assert!("pinned".parse::<ConversationFilter>().is_err());
    }
}
