//! Input checks applied before a write leaves the client and again when
//! it reaches the server.

use crate::error::{Error, Result};
use crate::models::MessageType;
use crate::protocol::SendMessageRequest;

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;
const MAX_EMOJI_BYTES: usize = 32;

/// Validate an outgoing message and return the content to store.
///
/// Attachment messages with blank content get their placeholder text.
pub fn validate_outgoing(req: &SendMessageRequest, max_len: usize) -> Result<String> {
    if req.counterpart_id.trim().is_empty() && req.conversation_id.is_none() {
        return Err(Error::Validation("a counterpart or conversation is required".into()));
    }

    let content = match req.message_type {
        MessageType::Text => {
            if req.content.trim().is_empty() {
                return Err(Error::Validation("message content cannot be empty".into()));
            }
            req.content.clone()
        }
        MessageType::Image | MessageType::File => {
            let attachment = req
                .attachment
                .as_ref()
                .filter(|a| !a.url.trim().is_empty())
                .ok_or_else(|| {
                    Error::Validation(format!("{} messages require an uploaded attachment", req.message_type.as_str()))
                })?;
            if req.content.trim().is_empty() {
                req.message_type.placeholder(attachment.file_name.as_deref())
            } else {
                req.content.clone()
            }
        }
    };

    check_length(&content, max_len)?;
    Ok(content)
}

pub fn validate_edit(content: &str, max_len: usize) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::Validation("message content cannot be empty".into()));
    }
    check_length(content, max_len)
}

pub fn validate_emoji(emoji: &str) -> Result<()> {
    if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_BYTES {
        return Err(Error::Validation("invalid reaction".into()));
    }
    Ok(())
}

fn check_length(content: &str, max_len: usize) -> Result<()> {
    if content.chars().count() > max_len {
        return Err(Error::Validation(format!("message exceeds {} characters", max_len)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    fn request(message_type: MessageType, content: &str, attachment: Option<Attachment>) -> SendMessageRequest {
        let mut req = SendMessageRequest::text("c1", "farm-1", "Sunny Farm", content);
        req.message_type = message_type;
        req.attachment = attachment;
        req
    }

    #[test]
    fn test_text_requires_content() {
        let err = validate_outgoing(&request(MessageType::Text, "   ", None), 100).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            validate_outgoing(&request(MessageType::Text, "hello", None), 100).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_image_requires_resolved_attachment() {
        assert!(validate_outgoing(&request(MessageType::Image, "", None), 100).is_err());

        let unresolved = Attachment { url: "".into(), file_name: None };
        assert!(validate_outgoing(&request(MessageType::Image, "", Some(unresolved)), 100).is_err());

        let uploaded = Attachment { url: "https://cdn/x.jpg".into(), file_name: None };
        assert_eq!(
            validate_outgoing(&request(MessageType::Image, "", Some(uploaded)), 100).unwrap(),
            "📷 Image"
        );
    }

    #[test]
    fn test_file_keeps_caption() {
        let uploaded = Attachment {
            url: "https://cdn/price-list.pdf".into(),
            file_name: Some("price-list.pdf".into()),
        };
        let content = validate_outgoing(&request(MessageType::File, "Our spring prices", Some(uploaded)), 100).unwrap();
        assert_eq!(content, "Our spring prices");
    }

    #[test]
    fn test_length_limit() {
        let long = "a".repeat(11);
        assert!(validate_outgoing(&request(MessageType::Text, &long, None), 10).is_err());
        assert!(validate_edit(&long, 10).is_err());
        assert!(validate_edit("ok", 10).is_ok());
    }

    #[test]
    fn test_emoji() {
        assert!(validate_emoji("🌱").is_ok());
        assert!(validate_emoji(" ").is_err());
        assert!(validate_emoji(&"x".repeat(64)).is_err());
    }
}
