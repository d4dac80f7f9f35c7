//! Conversation and message operations for an authenticated caller.
//!
//! Every successful write republishes the affected snapshots: both
//! participants' directories, the conversation's message log and, when
//! it changes, the typing set.

use harvest_chat_core::{
    directory, validation, Conversation, ConversationQuery, CreateConversationRequest, Message, MessageType,
    SendMessageRequest, TypingUser, User, UserRole,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, LimitsConfig};
use crate::error::{AppError, Result};
use crate::hub::{SnapshotHub, Subscription};
use crate::models::NewMessage;
use crate::presence::TypingTracker;
use crate::storage::Storage;

pub type DirectorySnapshot = Arc<Vec<Conversation>>;
pub type MessagesSnapshot = Arc<Vec<Message>>;
pub type TypingSnapshot = Arc<Vec<TypingUser>>;

/// Keyed by user id.
pub type DirectorySubscription = Subscription<String, DirectorySnapshot>;
/// Keyed by conversation id.
pub type MessagesSubscription = Subscription<String, MessagesSnapshot>;
/// Keyed by conversation id.
pub type TypingSubscription = Subscription<String, TypingSnapshot>;

pub struct ChatService {
    storage: Arc<Storage>,
    directories: SnapshotHub<String, DirectorySnapshot>,
    streams: SnapshotHub<String, MessagesSnapshot>,
    typing_sets: SnapshotHub<String, TypingSnapshot>,
    typing: TypingTracker,
    limits: LimitsConfig,
    quick_replies: Vec<String>,
}

impl ChatService {
    pub fn new(storage: Arc<Storage>, config: &Config) -> Self {
        Self {
            storage,
            directories: SnapshotHub::new(),
            streams: SnapshotHub::new(),
            typing_sets: SnapshotHub::new(),
            typing: TypingTracker::new(Duration::from_millis(config.typing.timeout_ms)),
            limits: config.limits.clone(),
            quick_replies: config.quick_replies.clone(),
        }
    }

    // ========================================================================
    // Directory
    // ========================================================================

    pub async fn list_conversations(&self, user: &User, query: &ConversationQuery) -> Result<Vec<Conversation>> {
        let all = self.load_conversations(&user.user_id).await?;

        Ok(directory::filter_conversations(&all, &user.user_id, query.filter, query.q.as_deref()))
    }

    /// Live, unfiltered directory of the caller.
    pub async fn subscribe_conversations(&self, user: &User) -> Result<DirectorySubscription> {
        let _guard = self.directories.lock_updates().await;
        let snapshot = self.load_directory(&user.user_id).await?;
        Ok(self.directories.subscribe(user.user_id.clone(), snapshot))
    }

    pub async fn create_conversation(&self, user: &User, req: &CreateConversationRequest) -> Result<String> {
        self.open_conversation(
            user,
            &req.counterpart_id,
            &req.counterpart_name,
            req.product_id.as_deref(),
            req.product_name.as_deref(),
        )
        .await
    }

    pub async fn mark_as_read(&self, user: &User, conversation_id: &str) -> Result<bool> {
        let conversation = self.conversation_for(user, conversation_id).await?;

        let updated = self.storage.mark_as_read(conversation_id, &user.user_id).await?;
        if updated {
            tracing::debug!("{} read conversation {}", user.user_id, conversation_id);
            self.publish_directories(&conversation).await;
            self.publish_messages(conversation_id).await;
        }

        Ok(updated)
    }

    pub async fn set_archived(&self, user: &User, conversation_id: &str, archived: bool) -> Result<Conversation> {
        self.conversation_for(user, conversation_id).await?;
        let changed = self.storage.set_archived(conversation_id, archived).await?;
        self.after_flag_change(conversation_id, changed).await
    }

    pub async fn set_muted(&self, user: &User, conversation_id: &str, muted: bool) -> Result<Conversation> {
        self.conversation_for(user, conversation_id).await?;
        let changed = self.storage.set_muted(conversation_id, muted).await?;
        self.after_flag_change(conversation_id, changed).await
    }

    async fn after_flag_change(&self, conversation_id: &str, changed: bool) -> Result<Conversation> {
        let conversation = self
            .storage
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;

        if changed {
            self.publish_directories(&conversation).await;
        }
        Ok(conversation)
    }

    // ========================================================================
    // Message stream
    // ========================================================================

    pub async fn get_messages(&self, user: &User, conversation_id: &str) -> Result<Vec<Message>> {
        self.conversation_for(user, conversation_id).await?;
        Ok(self.storage.list_messages(conversation_id).await?)
    }

    pub async fn subscribe_messages(&self, user: &User, conversation_id: &str) -> Result<MessagesSubscription> {
        self.conversation_for(user, conversation_id).await?;

        let _guard = self.streams.lock_updates().await;
        let snapshot = Arc::new(self.storage.list_messages(conversation_id).await?);
        Ok(self.streams.subscribe(conversation_id.to_string(), snapshot))
    }

    pub async fn send_message(&self, user: &User, req: &SendMessageRequest) -> Result<Message> {
        let content = validation::validate_outgoing(req, self.limits.max_message_length)?;

        let conversation_id = match &req.conversation_id {
            Some(id) => id.clone(),
            None => {
                self.open_conversation(
                    user,
                    &req.counterpart_id,
                    &req.counterpart_name,
                    req.product_id.as_deref(),
                    req.product_name.as_deref(),
                )
                .await?
            }
        };
        let conversation = self.conversation_for(user, &conversation_id).await?;

        if let Some(reply_to) = &req.reply_to {
            match self.storage.get_message(reply_to).await? {
                Some(target) if target.conversation_id == conversation.id => {}
                _ => return Err(AppError::BadRequest("Reply target not found in this conversation".into())),
            }
        }

        let attachment = req.attachment.as_ref();
        let (image_url, file_url) = match req.message_type {
            MessageType::Text => (None, None),
            MessageType::Image => (attachment.map(|a| a.url.clone()), None),
            MessageType::File => (None, attachment.map(|a| a.url.clone())),
        };
        let file_name = match req.message_type {
            MessageType::Text => None,
            _ => attachment.and_then(|a| a.file_name.clone()),
        };

        let message = self
            .storage
            .insert_message(&NewMessage {
                conversation_id: conversation.id.clone(),
                sender_id: user.user_id.clone(),
                sender_name: user.display_name.clone(),
                recipient_id: conversation.counterpart_id(&user.user_id).to_string(),
                content,
                message_type: req.message_type,
                file_name,
                image_url,
                file_url,
                reply_to: req.reply_to.clone(),
                client_message_id: req.client_message_id.clone(),
            })
            .await?;

        tracing::debug!("Message {} sent in {}", message.id, conversation.id);

        // sending ends the typing burst
        if self
            .typing
            .set(&conversation.id, &user.user_id, &user.display_name, false)
        {
            self.publish_typing(&conversation.id).await;
        }
        self.publish_messages(&conversation.id).await;
        self.publish_directories(&conversation).await;

        Ok(message)
    }

    pub async fn edit_message(&self, user: &User, message_id: &str, content: &str) -> Result<Message> {
        validation::validate_edit(content, self.limits.max_message_length)?;

        let row = self.own_message(user, message_id).await?;
        if MessageType::from(row.message_type.clone()) != MessageType::Text {
            return Err(AppError::BadRequest("Only text messages can be edited".into()));
        }

        self.storage.update_message_content(message_id, content).await?;

        let conversation = self.conversation_for(user, &row.conversation_id).await?;
        self.publish_messages(&conversation.id).await;
        self.publish_directories(&conversation).await;

        self.storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))
    }

    pub async fn delete_message(&self, user: &User, message_id: &str) -> Result<()> {
        let row = self.own_message(user, message_id).await?;
        let conversation = self.conversation_for(user, &row.conversation_id).await?;

        let deleted = self
            .storage
            .soft_delete_message(message_id, conversation.counterpart_id(&user.user_id))
            .await?;
        if !deleted {
            return Err(AppError::NotFound("Message not found".into()));
        }

        self.publish_messages(&conversation.id).await;
        self.publish_directories(&conversation).await;
        Ok(())
    }

    pub async fn add_reaction(&self, user: &User, message_id: &str, emoji: &str) -> Result<Message> {
        validation::validate_emoji(emoji)?;
        let message = self.visible_message(user, message_id).await?;

        if self.storage.add_reaction(message_id, &user.user_id, emoji).await? {
            self.publish_messages(&message.conversation_id).await;
        }
        self.reload_message(message_id).await
    }

    pub async fn remove_reaction(&self, user: &User, message_id: &str, emoji: &str) -> Result<Message> {
        let message = self.visible_message(user, message_id).await?;

        if self.storage.remove_reaction(message_id, &user.user_id, emoji).await? {
            self.publish_messages(&message.conversation_id).await;
        }
        self.reload_message(message_id).await
    }

    // ========================================================================
    // Typing presence
    // ========================================================================

    pub async fn set_typing(&self, user: &User, conversation_id: &str, is_typing: bool) -> Result<()> {
        self.conversation_for(user, conversation_id).await?;

        if self
            .typing
            .set(conversation_id, &user.user_id, &user.display_name, is_typing)
        {
            self.publish_typing(conversation_id).await;
        }
        Ok(())
    }

    pub async fn subscribe_typing(&self, user: &User, conversation_id: &str) -> Result<TypingSubscription> {
        self.conversation_for(user, conversation_id).await?;

        let _guard = self.typing_sets.lock_updates().await;
        let snapshot = Arc::new(self.typing.current(conversation_id));
        Ok(self.typing_sets.subscribe(conversation_id.to_string(), snapshot))
    }

    /// Expire stale typing signals and republish the sets that shrank.
    pub async fn sweep_typing(&self) {
        for conversation_id in self.typing.sweep() {
            self.publish_typing(&conversation_id).await;
        }
    }

    pub fn quick_replies(&self) -> &[String] {
        &self.quick_replies
    }

    /// Directory, message and typing topics with at least one subscriber.
    pub fn live_topic_count(&self) -> usize {
        self.directories.topic_count() + self.streams.topic_count() + self.typing_sets.topic_count()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn open_conversation(
        &self,
        user: &User,
        counterpart_id: &str,
        counterpart_name: &str,
        product_id: Option<&str>,
        product_name: Option<&str>,
    ) -> Result<String> {
        let counterpart_id = counterpart_id.trim();
        if counterpart_id.is_empty() {
            return Err(AppError::BadRequest("Counterpart is required".into()));
        }
        if counterpart_id == user.user_id {
            return Err(AppError::BadRequest("Cannot start a conversation with yourself".into()));
        }

        // the caller's role decides which side of the pair they are on
        let me = (user.user_id.as_str(), user.display_name.as_str());
        let them = (counterpart_id, counterpart_name);
        let ((buyer_id, buyer_name), (seller_id, seller_name)) = match user.role {
            UserRole::Seller => (them, me),
            UserRole::Buyer | UserRole::Admin => (me, them),
        };

        let (conversation_id, created) = self
            .storage
            .get_or_create_conversation(buyer_id, buyer_name, seller_id, seller_name, product_id, product_name)
            .await?;

        if created {
            tracing::info!("Conversation {} opened between {} and {}", conversation_id, buyer_id, seller_id);
            if let Some(conversation) = self.storage.get_conversation(&conversation_id).await? {
                self.publish_directories(&conversation).await;
            }
        }

        Ok(conversation_id)
    }

    /// The conversation, if `user` takes part in it.
    async fn conversation_for(&self, user: &User, conversation_id: &str) -> Result<Conversation> {
        let conversation = self
            .storage
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;

        if !conversation.is_participant(&user.user_id) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    /// Visible message row authored by `user`.
    async fn own_message(&self, user: &User, message_id: &str) -> Result<crate::models::MessageRow> {
        let row = match self.storage.get_message_row(message_id).await? {
            Some(row) if !row.is_deleted() => row,
            _ => return Err(AppError::NotFound("Message not found".into())),
        };

        if row.sender_id != user.user_id {
            tracing::warn!("{} tried to modify message {} of {}", user.user_id, message_id, row.sender_id);
            return Err(AppError::Forbidden);
        }
        Ok(row)
    }

    /// Visible message in a conversation `user` takes part in.
    async fn visible_message(&self, user: &User, message_id: &str) -> Result<Message> {
        let message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

        self.conversation_for(user, &message.conversation_id).await?;
        Ok(message)
    }

    async fn reload_message(&self, message_id: &str) -> Result<Message> {
        self.storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))
    }

    async fn load_directory(&self, user_id: &str) -> anyhow::Result<DirectorySnapshot> {
        let mut list = self.load_conversations(user_id).await?;
        directory::sort_by_recency(&mut list);
        Ok(Arc::new(list))
    }

    /// At most `max_conversations_listed` conversations, most recent first.
    async fn load_conversations(&self, user_id: &str) -> anyhow::Result<Vec<Conversation>> {
        let cap = self.limits.max_conversations_listed;
        let list = self.storage.list_conversations_for(user_id, cap).await?;
        if list.len() >= cap {
            tracing::warn!("Directory of {} truncated to the {} most recent conversations", user_id, cap);
        }
        Ok(list)
    }

    // Publishing happens after the write committed; a failed reload is
    // logged and the next write republishes. The subscriber check runs
    // under the update lock, so a subscribe that loaded its snapshot
    // before this write is always visible here.

    async fn publish_directories(&self, conversation: &Conversation) {
        for user_id in [&conversation.buyer_id, &conversation.seller_id] {
            let _guard = self.directories.lock_updates().await;
            if !self.directories.has_subscribers(user_id) {
                continue;
            }

            match self.load_directory(user_id).await {
                Ok(snapshot) => {
                    self.directories.publish(user_id, snapshot);
                }
                Err(e) => tracing::warn!("Failed to refresh directory of {}: {}", user_id, e),
            }
        }
    }

    async fn publish_messages(&self, conversation_id: &str) {
        let key = conversation_id.to_string();
        let _guard = self.streams.lock_updates().await;
        if !self.streams.has_subscribers(&key) {
            return;
        }

        match self.storage.list_messages(conversation_id).await {
            Ok(messages) => {
                self.streams.publish(&key, Arc::new(messages));
            }
            Err(e) => tracing::warn!("Failed to refresh messages of {}: {}", conversation_id, e),
        }
    }

    async fn publish_typing(&self, conversation_id: &str) {
        let key = conversation_id.to_string();
        let _guard = self.typing_sets.lock_updates().await;
        self.typing_sets
            .publish(&key, Arc::new(self.typing.current(conversation_id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_chat_core::{Attachment, ConversationFilter};

    fn user(id: &str, name: &str, role: UserRole) -> User {
        User {
            user_id: id.to_string(),
            display_name: name.to_string(),
            role,
        }
    }

    fn bea() -> User {
        user("bea", "Bea", UserRole::Buyer)
    }

    fn sal() -> User {
        user("sal", "Sal's Farm", UserRole::Seller)
    }

    async fn service_with_timeout(timeout_ms: u64) -> ChatService {
        let storage = Arc::new(Storage::new(":memory:").await.unwrap());
        let mut config = Config::default();
        config.typing.timeout_ms = timeout_ms;
        ChatService::new(storage, &config)
    }

    async fn service() -> ChatService {
        service_with_timeout(3000).await
    }

    async fn open(service: &ChatService) -> String {
        service
            .create_conversation(
                &bea(),
                &CreateConversationRequest {
                    counterpart_id: "sal".into(),
                    counterpart_name: "Sal's Farm".into(),
                    product_id: Some("kale".into()),
                    product_name: Some("Curly Kale".into()),
                },
            )
            .await
            .unwrap()
    }

    async fn send(service: &ChatService, from: &User, conversation_id: &str, content: &str) -> Message {
        let counterpart = if from.user_id == "bea" { "sal" } else { "bea" };
        service
            .send_message(from, &SendMessageRequest::text(conversation_id, counterpart, "", content))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_both_sides_resolve_same_conversation() {
        let service = service().await;
        let from_buyer = open(&service).await;

        let from_seller = service
            .create_conversation(
                &sal(),
                &CreateConversationRequest {
                    counterpart_id: "bea".into(),
                    counterpart_name: "Bea".into(),
                    product_id: Some("kale".into()),
                    product_name: Some("Curly Kale".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(from_buyer, from_seller);
        assert_eq!(open(&service).await, from_buyer);
    }

    #[tokio::test]
    async fn test_self_conversation_rejected() {
        let service = service().await;
        let err = service
            .create_conversation(
                &bea(),
                &CreateConversationRequest {
                    counterpart_id: "bea".into(),
                    counterpart_name: "Bea".into(),
                    product_id: None,
                    product_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unread_counts_and_mark_read() {
        let service = service().await;
        let conv = open(&service).await;

        for i in 0..4 {
            send(&service, &bea(), &conv, &format!("question {}", i)).await;
        }

        let unread = service
            .list_conversations(&sal(), &ConversationQuery { filter: ConversationFilter::Unread, q: None })
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].unread_for("sal"), 4);

        assert!(service.mark_as_read(&sal(), &conv).await.unwrap());
        assert!(!service.mark_as_read(&sal(), &conv).await.unwrap());

        let all = service.list_conversations(&sal(), &ConversationQuery::default()).await.unwrap();
        assert_eq!(all[0].unread_for("sal"), 0);
        assert!(service.get_messages(&bea(), &conv).await.unwrap().iter().all(|m| m.read));
    }

    #[tokio::test]
    async fn test_send_without_conversation_id_creates_one() {
        let service = service().await;

        let mut req = SendMessageRequest::text("", "sal", "Sal's Farm", "Do you have eggs?");
        req.conversation_id = None;
        req.product_id = Some("eggs".into());
        req.product_name = Some("Eggs".into());
        let first = service.send_message(&bea(), &req).await.unwrap();
        let second = service.send_message(&bea(), &req).await.unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(service.get_messages(&sal(), &first.conversation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_ordered_log() {
        let service = service().await;
        let conv = open(&service).await;

        let mut sub = service.subscribe_messages(&sal(), &conv).await.unwrap();
        assert!(sub.current().is_empty());

        let a = send(&service, &bea(), &conv, "first").await;
        let b = send(&service, &sal(), &conv, "second").await;
        let c = send(&service, &bea(), &conv, "third").await;

        let snapshot = sub.current();
        let ids: Vec<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);
        assert!(snapshot.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        drop(sub);

        let mut again = service.subscribe_messages(&bea(), &conv).await.unwrap();
        let reloaded: Vec<String> = again.current().iter().map(|m| m.id.clone()).collect();
        assert_eq!(reloaded, vec![a.id, b.id, c.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_send_never_misses() {
        let service = Arc::new(service().await);
        let conv = open(&service).await;

        for round in 0..100 {
            let subscribing = {
                let service = Arc::clone(&service);
                let conv = conv.clone();
                tokio::spawn(async move { service.subscribe_messages(&sal(), &conv).await.unwrap() })
            };
            let sending = {
                let service = Arc::clone(&service);
                let conv = conv.clone();
                tokio::spawn(async move { send(&service, &bea(), &conv, &format!("round {}", round)).await })
            };

            let mut sub = subscribing.await.unwrap();
            let sent = sending.await.unwrap();
            assert!(
                sub.current().iter().any(|m| m.id == sent.id),
                "round {}: committed message missing from the live log",
                round
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_on_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chat.db");
        let storage = Arc::new(Storage::new(path.to_str().unwrap()).await.unwrap());
        let service = Arc::new(ChatService::new(storage, &Config::default()));
        let conv = open(&service).await;

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let service = Arc::clone(&service);
                let conv = conv.clone();
                tokio::spawn(async move {
                    service
                        .send_message(&bea(), &SendMessageRequest::text(&conv, "sal", "", &format!("crate {}", i)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = service.get_messages(&sal(), &conv).await.unwrap();
        assert_eq!(messages.len(), 40);
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let listed = service.list_conversations(&sal(), &ConversationQuery::default()).await.unwrap();
        assert_eq!(listed[0].unread_for("sal"), 40);
    }

    #[tokio::test]
    async fn test_directory_capped_to_most_recent() {
        let storage = Arc::new(Storage::new(":memory:").await.unwrap());
        let mut config = Config::default();
        config.limits.max_conversations_listed = 1;
        let service = ChatService::new(storage, &config);

        let kale = open(&service).await;
        let eggs = service
            .create_conversation(
                &bea(),
                &CreateConversationRequest {
                    counterpart_id: "sal".into(),
                    counterpart_name: "Sal's Farm".into(),
                    product_id: Some("eggs".into()),
                    product_name: Some("Eggs".into()),
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        send(&service, &bea(), &kale, "kale still available?").await;

        let listed = service.list_conversations(&sal(), &ConversationQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kale);

        let mut sub = service.subscribe_conversations(&bea()).await.unwrap();
        let snapshot = sub.current();
        assert_eq!(snapshot.len(), 1);
        assert_ne!(snapshot[0].id, eggs);
    }

    #[tokio::test]
    async fn test_directory_subscription_follows_sends() {
        let service = service().await;
        let conv = open(&service).await;

        let mut sub = service.subscribe_conversations(&sal()).await.unwrap();
        assert_eq!(sub.current().len(), 1);

        send(&service, &bea(), &conv, "Still have kale?").await;
        let snapshot = sub.changed().await.unwrap();
        assert_eq!(snapshot[0].last_message.as_deref(), Some("Still have kale?"));
        assert_eq!(snapshot[0].unread_for("sal"), 1);
    }

    #[tokio::test]
    async fn test_reaction_added_once() {
        let service = service().await;
        let conv = open(&service).await;
        let m = send(&service, &bea(), &conv, "Fresh today!").await;

        service.add_reaction(&sal(), &m.id, "🌱").await.unwrap();
        let twice = service.add_reaction(&sal(), &m.id, "🌱").await.unwrap();
        assert_eq!(twice.reactions.iter().filter(|r| r.user_id == "sal" && r.emoji == "🌱").count(), 1);

        let removed = service.remove_reaction(&sal(), &m.id, "🌱").await.unwrap();
        assert!(removed.reactions.is_empty());
    }

    #[tokio::test]
    async fn test_only_sender_edits_or_deletes() {
        let service = service().await;
        let conv = open(&service).await;
        let m = send(&service, &bea(), &conv, "original").await;

        let mut sub = service.subscribe_messages(&bea(), &conv).await.unwrap();
        sub.current();

        let err = service.edit_message(&sal(), &m.id, "hijacked").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let err = service.delete_message(&sal(), &m.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let messages = service.get_messages(&bea(), &conv).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "original");
        assert!(!messages[0].edited);
        assert_eq!(sub.current()[0].content, "original");

        let edited = service.edit_message(&bea(), &m.id, "revised").await.unwrap();
        assert!(edited.edited);
        assert_eq!(edited.timestamp, m.timestamp);

        service.delete_message(&bea(), &m.id).await.unwrap();
        assert!(sub.current().is_empty());
    }

    #[tokio::test]
    async fn test_outsiders_cannot_read() {
        let service = service().await;
        let conv = open(&service).await;
        let mallory = user("mallory", "Mallory", UserRole::Buyer);

        assert!(matches!(service.get_messages(&mallory, &conv).await, Err(AppError::Forbidden)));
        assert!(matches!(service.subscribe_typing(&mallory, &conv).await, Err(AppError::Forbidden)));
        assert!(matches!(
            service.get_messages(&bea(), "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_must_stay_in_conversation() {
        let service = service().await;
        let kale = open(&service).await;
        let other = service
            .create_conversation(
                &bea(),
                &CreateConversationRequest {
                    counterpart_id: "sal".into(),
                    counterpart_name: "Sal's Farm".into(),
                    product_id: None,
                    product_name: None,
                },
            )
            .await
            .unwrap();
        let elsewhere = send(&service, &bea(), &other, "general question").await;
        let here = send(&service, &bea(), &kale, "kale question").await;

        let mut req = SendMessageRequest::text(&kale, "bea", "Bea", "answer");
        req.reply_to = Some(elsewhere.id.clone());
        assert!(matches!(service.send_message(&sal(), &req).await, Err(AppError::BadRequest(_))));

        req.reply_to = Some(here.id.clone());
        let reply = service.send_message(&sal(), &req).await.unwrap();
        assert_eq!(reply.reply_to, Some(here.id));
    }

    #[tokio::test]
    async fn test_attachment_urls_routed_by_type() {
        let service = service().await;
        let conv = open(&service).await;

        let mut req = SendMessageRequest::text(&conv, "sal", "Sal's Farm", "");
        req.message_type = MessageType::File;
        req.attachment = Some(Attachment {
            url: "https://cdn.example/invoice.pdf".into(),
            file_name: Some("invoice.pdf".into()),
        });
        let m = service.send_message(&bea(), &req).await.unwrap();

        assert_eq!(m.content, "📎 invoice.pdf");
        assert_eq!(m.file_url.as_deref(), Some("https://cdn.example/invoice.pdf"));
        assert!(m.image_url.is_none());

        let err = service.edit_message(&bea(), &m.id, "renamed").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_typing_expires_without_stop() {
        let service = service_with_timeout(50).await;
        let conv = open(&service).await;

        let mut sub = service.subscribe_typing(&sal(), &conv).await.unwrap();
        service.set_typing(&bea(), &conv, true).await.unwrap();
        assert_eq!(sub.changed().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        service.sweep_typing().await;
        assert!(sub.changed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_clears_typing() {
        let service = service().await;
        let conv = open(&service).await;

        let mut sub = service.subscribe_typing(&sal(), &conv).await.unwrap();
        service.set_typing(&bea(), &conv, true).await.unwrap();
        assert_eq!(sub.changed().await.unwrap().len(), 1);

        send(&service, &bea(), &conv, "done typing").await;
        assert!(sub.changed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let service = service().await;
        let conv = open(&service).await;

        let archived = service.set_archived(&bea(), &conv, true).await.unwrap();
        assert!(archived.archived);
        let listed = service
            .list_conversations(&bea(), &ConversationQuery { filter: ConversationFilter::Archived, q: None })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(service.list_conversations(&bea(), &ConversationQuery::default()).await.unwrap().is_empty());

        let restored = service.set_archived(&bea(), &conv, false).await.unwrap();
        assert!(!restored.archived);
        assert!(service.set_muted(&sal(), &conv, true).await.unwrap().muted);
    }
}
