//! Conversation view with an optimistic overlay.
//!
//! Confirmed messages always come from the latest authoritative
//! snapshot. Outgoing messages sit in a pending overlay keyed by a
//! client-generated temporary id until the store hands back the real
//! message, either as the send response or inside a snapshot.

use std::collections::HashSet;

use crate::models::{Message, MessageType};
use crate::protocol::SendMessageRequest;
use crate::reactions::{self, ReactionSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub temp_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<String>,
    pub queued_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry<'a> {
    Pending(&'a PendingMessage),
    Confirmed(&'a Message),
}

impl Entry<'_> {
    pub fn id(&self) -> &str {
        match self {
            Entry::Pending(p) => &p.temp_id,
            Entry::Confirmed(m) => &m.id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }
}

/// A send that did not go through; the overlay entry has been removed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSend {
    pub pending: PendingMessage,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ConversationView {
    conversation_id: String,
    confirmed: Vec<Message>,
    pending: Vec<PendingMessage>,
}

impl ConversationView {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            confirmed: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Queue an outgoing message and stamp the request with its temp id.
    pub fn begin_send(&mut self, req: &mut SendMessageRequest, sender_id: &str, sender_name: &str) -> String {
        let temp_id = req
            .client_message_id
            .clone()
            .unwrap_or_else(|| format!("tmp-{}", uuid::Uuid::new_v4()));
        req.client_message_id = Some(temp_id.clone());

        self.pending.push(PendingMessage {
            temp_id: temp_id.clone(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: req.content.clone(),
            message_type: req.message_type,
            reply_to: req.reply_to.clone(),
            queued_at: chrono::Utc::now().timestamp_millis(),
        });
        temp_id
    }

    /// The store accepted the send.
    pub fn confirm(&mut self, temp_id: &str, message: Message) {
        self.pending.retain(|p| p.temp_id != temp_id);
        if message.conversation_id != self.conversation_id {
            return;
        }
        if let Some(existing) = self.confirmed.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
        } else {
            let pos = self
                .confirmed
                .partition_point(|m| m.timestamp <= message.timestamp);
            self.confirmed.insert(pos, message);
        }
    }

    /// The store rejected the send; roll the optimistic entry back.
    pub fn fail(&mut self, temp_id: &str, reason: impl Into<String>) -> Option<FailedSend> {
        let idx = self.pending.iter().position(|p| p.temp_id == temp_id)?;
        let pending = self.pending.remove(idx);
        log::warn!("send {} in {} failed", temp_id, self.conversation_id);
        Some(FailedSend {
            pending,
            reason: reason.into(),
        })
    }

    /// Replace the confirmed log wholesale with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, messages: Vec<Message>) {
        let landed: HashSet<&str> = messages
            .iter()
            .flat_map(|m| std::iter::once(m.id.as_str()).chain(m.client_message_id.as_deref()))
            .collect();
        self.pending.retain(|p| !landed.contains(p.temp_id.as_str()));
        drop(landed);
        self.confirmed = messages;
    }

    /// Confirmed messages in store order, then pending sends in queue order.
    pub fn entries(&self) -> Vec<Entry<'_>> {
        self.confirmed
            .iter()
            .map(Entry::Confirmed)
            .chain(self.pending.iter().map(Entry::Pending))
            .collect()
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    pub fn is_sending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.confirmed.iter().find(|m| m.id == message_id)
    }

    /// Flip `user_id`'s `emoji` on a confirmed message locally. Returns
    /// whether the pair is present afterwards, or `None` for an unknown id.
    /// The next snapshot overwrites this either way.
    pub fn toggle_reaction(&mut self, message_id: &str, user_id: &str, emoji: &str) -> Option<bool> {
        let message = self.confirmed.iter_mut().find(|m| m.id == message_id)?;
        Some(reactions::toggle(&mut message.reactions, user_id, emoji))
    }

    pub fn reaction_summary(&self, message_id: &str) -> Vec<ReactionSummary> {
        self.find(message_id)
            .map(|m| reactions::summarize(&m.reactions))
            .unwrap_or_default()
    }

    /// Looks up the message a reply points at within this log only.
    pub fn reply_target(&self, message: &Message) -> Option<&Message> {
        let target = message.reply_to.as_deref()?;
        if target == message.id {
            return None;
        }
        self.find(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, ts: i64, client_id: Option<&str>) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "me".into(),
            sender_name: "Me".into(),
            content: format!("msg {}", id),
            message_type: MessageType::Text,
            file_name: None,
            image_url: None,
            file_url: None,
            timestamp: ts,
            read: false,
            edited: false,
            reply_to: None,
            reactions: vec![],
            client_message_id: client_id.map(String::from),
        }
    }

    fn draft(content: &str) -> SendMessageRequest {
        SendMessageRequest::text("c1", "farm", "Farm", content)
    }

    #[test]
    fn test_pending_shown_then_confirmed_once() {
        let mut view = ConversationView::new("c1");
        let mut req = draft("Do you deliver?");
        let temp = view.begin_send(&mut req, "me", "Me");

        assert_eq!(req.client_message_id.as_deref(), Some(temp.as_str()));
        let entries = view.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_pending());

        view.confirm(&temp, message("m1", 5, Some(&temp)));
        // the snapshot that follows carries the same message
        view.apply_snapshot(vec![message("m1", 5, Some(&temp))]);

        let entries = view.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "m1");
        assert!(!view.is_sending());
    }

    #[test]
    fn test_local_reaction_toggle() {
        let mut view = ConversationView::new("c1");
        view.apply_snapshot(vec![message("m1", 5, None)]);

        assert_eq!(view.toggle_reaction("m1", "me", "🌱"), Some(true));
        assert_eq!(view.reaction_summary("m1")[0].count, 1);
        assert_eq!(view.toggle_reaction("m1", "me", "🌱"), Some(false));
        assert!(view.reaction_summary("m1").is_empty());
        assert_eq!(view.toggle_reaction("missing", "me", "🌱"), None);
    }

    #[test]
    fn test_snapshot_before_response_does_not_duplicate() {
        let mut view = ConversationView::new("c1");
        let mut req = draft("hello");
        let temp = view.begin_send(&mut req, "me", "Me");

        view.apply_snapshot(vec![message("m1", 5, Some(&temp))]);
        assert_eq!(view.entries().len(), 1);

        view.confirm(&temp, message("m1", 5, Some(&temp)));
        assert_eq!(view.entries().len(), 1);
    }

    #[test]
    fn test_same_content_different_ids_both_kept() {
        let mut view = ConversationView::new("c1");
        let mut req = draft("msg m2");
        view.begin_send(&mut req, "me", "Me");

        // someone else's identical text must not swallow our pending copy
        view.apply_snapshot(vec![message("m2", 1, None)]);
        assert_eq!(view.entries().len(), 2);
    }

    #[test]
    fn test_failure_rolls_back() {
        let mut view = ConversationView::new("c1");
        let mut req = draft("will fail");
        let temp = view.begin_send(&mut req, "me", "Me");

        let failed = view.fail(&temp, "network down").unwrap();
        assert_eq!(failed.pending.content, "will fail");
        assert!(view.entries().is_empty());
        assert!(view.fail(&temp, "again").is_none());
    }

    #[test]
    fn test_confirm_keeps_timestamp_order() {
        let mut view = ConversationView::new("c1");
        view.apply_snapshot(vec![message("a", 1, None), message("c", 9, None)]);
        view.confirm("unknown", message("b", 5, None));
        let ids: Vec<_> = view.entries().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reply_target_stays_in_log() {
        let mut view = ConversationView::new("c1");
        let mut reply = message("b", 2, None);
        reply.reply_to = Some("a".into());
        let mut selfish = message("c", 3, None);
        selfish.reply_to = Some("c".into());
        view.apply_snapshot(vec![message("a", 1, None), reply.clone(), selfish.clone()]);

        assert_eq!(view.reply_target(&reply).map(|m| m.id.as_str()), Some("a"));
        assert!(view.reply_target(&selfish).is_none());
    }
}
