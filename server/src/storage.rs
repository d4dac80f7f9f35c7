//! Database storage layer for Harvest Chat Server
//!
//! SQLite is the single authority for conversation and message state.
//! Every write is a field-level update on one conversation or message
//! row; multi-row side effects of a send run in one transaction.
//!
//! Write transactions open with a write statement. A transaction that
//! reads first holds a shared lock it cannot upgrade while another
//! writer is active, and SQLite fails it instead of waiting.

use chrono::Utc;
use harvest_chat_core::{Conversation, Message, Reaction};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto;
use crate::models::*;

const CONVERSATION_COLUMNS: &str = "id, buyer_id, buyer_name, seller_id, seller_name, product_id, product_name,
     last_message, last_message_time, archived, muted, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sender_name, content, message_type,
     file_name, image_url, file_url, timestamp, is_read, is_edited, reply_to, client_message_id, deleted_at";

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        let pool = if database_path == ":memory:" {
            // One connection that never recycles, or the database vanishes.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            // Ensure directory exists
            if let Some(parent) = Path::new(database_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT);

            SqlitePoolOptions::new()
                .max_connections(10)
                .connect_with(options)
                .await?
        };

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                buyer_id TEXT NOT NULL,
                buyer_name TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                seller_name TEXT NOT NULL,
                product_key TEXT NOT NULL DEFAULT '',
                product_id TEXT,
                product_name TEXT,
                last_message TEXT,
                last_message_time INTEGER,
                archived INTEGER NOT NULL DEFAULT 0,
                muted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (buyer_id, seller_id, product_key)
            );

            CREATE TABLE IF NOT EXISTS conversation_unread (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, user_id),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL,
                file_name TEXT,
                image_url TEXT,
                file_url TEXT,
                timestamp INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_edited INTEGER NOT NULL DEFAULT 0,
                reply_to TEXT,
                client_message_id TEXT,
                deleted_at INTEGER,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );

            CREATE TABLE IF NOT EXISTS message_reactions (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                emoji TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji),
                FOREIGN KEY (message_id) REFERENCES messages(id)
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_buyer ON conversations(buyer_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_seller ON conversations(seller_id);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp, seq);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn create_user(&self, user_id: &str, display_name: &str, role: &str, token_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, display_name, role, token_hash, created_at)
             VALUES (?, ?, ?, ?, datetime('now'))",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(role)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, display_name, role, token_hash, created_at, is_active
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Active user owning this bearer token.
    pub async fn find_user_by_token(&self, token: &str) -> anyhow::Result<Option<UserRow>> {
        let token_hash = crypto::hash_token(token);

        let user = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, display_name, role, token_hash, created_at, is_active
             FROM users WHERE token_hash = ? AND is_active = 1",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<UserRow>> {
        let users = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, display_name, role, token_hash, created_at, is_active
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn deactivate_user(&self, user_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET is_active = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Look up the conversation for this participant/product tuple,
    /// creating it if absent. The unique index makes this safe under
    /// concurrent callers: every caller gets the same id.
    pub async fn get_or_create_conversation(
        &self,
        buyer_id: &str,
        buyer_name: &str,
        seller_id: &str,
        seller_name: &str,
        product_id: Option<&str>,
        product_name: Option<&str>,
    ) -> anyhow::Result<(String, bool)> {
        let product_key = product_id.unwrap_or("");

        let inserted = sqlx::query(
            "INSERT INTO conversations
             (id, buyer_id, buyer_name, seller_id, seller_name, product_key, product_id, product_name, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (buyer_id, seller_id, product_key) DO NOTHING",
        )
        .bind(crypto::generate_id())
        .bind(buyer_id)
        .bind(buyer_name)
        .bind(seller_id)
        .bind(seller_name)
        .bind(product_key)
        .bind(product_id)
        .bind(product_name)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        let (id,): (String,) = sqlx::query_as(
            "SELECT id FROM conversations WHERE buyer_id = ? AND seller_id = ? AND product_key = ?",
        )
        .bind(buyer_id)
        .bind(seller_id)
        .bind(product_key)
        .fetch_one(&self.pool)
        .await?;

        Ok((id, inserted))
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let sql = format!("SELECT {} FROM conversations WHERE id = ?", CONVERSATION_COLUMNS);
        let row = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let unread = sqlx::query_as::<_, UnreadRow>(
            "SELECT conversation_id, user_id, count FROM conversation_unread WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_conversation(group_unread(unread).remove(conversation_id).unwrap_or_default())))
    }

    /// Every conversation where `user_id` is buyer or seller, most recent first.
    pub async fn list_conversations_for(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {} FROM conversations
             WHERE buyer_id = ? OR seller_id = ?
             ORDER BY COALESCE(last_message_time, created_at) DESC, id ASC
             LIMIT ?",
            CONVERSATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(user_id)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let unread = sqlx::query_as::<_, UnreadRow>(
            "SELECT u.conversation_id, u.user_id, u.count
             FROM conversation_unread u
             JOIN conversations c ON c.id = u.conversation_id
             WHERE c.buyer_id = ? OR c.seller_id = ?",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut unread = group_unread(unread);
        Ok(rows
            .into_iter()
            .map(|row| {
                let counts = unread.remove(&row.id).unwrap_or_default();
                row.into_conversation(counts)
            })
            .collect())
    }

    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE conversations SET archived = ? WHERE id = ? AND archived != ?")
            .bind(archived)
            .bind(conversation_id)
            .bind(archived)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_muted(&self, conversation_id: &str, muted: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE conversations SET muted = ? WHERE id = ? AND muted != ?")
            .bind(muted)
            .bind(conversation_id)
            .bind(muted)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Zero `user_id`'s unread counter and flag inbound messages as read.
    /// Returns whether anything changed.
    pub async fn mark_as_read(&self, conversation_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let counter = sqlx::query(
            "UPDATE conversation_unread SET count = 0
             WHERE conversation_id = ? AND user_id = ? AND count > 0",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let messages = sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ? AND sender_id != ? AND is_read = 0 AND deleted_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(counter.rows_affected() + messages.rows_affected() > 0)
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message and apply its side effects on the conversation:
    /// preview, activity time and the recipient's unread counter.
    pub async fn insert_message(&self, new: &NewMessage) -> anyhow::Result<Message> {
        let mut tx = self.pool.begin().await?;
        let id = crypto::generate_id();

        // Timestamps never go backwards within a conversation.
        let (timestamp,): (i64,) = sqlx::query_as(
            "INSERT INTO messages
             (id, conversation_id, sender_id, sender_name, content, message_type,
              file_name, image_url, file_url, timestamp, reply_to, client_message_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?,
                     MAX(?, COALESCE((SELECT MAX(timestamp) FROM messages WHERE conversation_id = ?), 0)),
                     ?, ?)
             RETURNING timestamp",
        )
        .bind(&id)
        .bind(&new.conversation_id)
        .bind(&new.sender_id)
        .bind(&new.sender_name)
        .bind(&new.content)
        .bind(new.message_type.as_str())
        .bind(&new.file_name)
        .bind(&new.image_url)
        .bind(&new.file_url)
        .bind(Utc::now().timestamp_millis())
        .bind(&new.conversation_id)
        .bind(&new.reply_to)
        .bind(&new.client_message_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message = ?, last_message_time = ? WHERE id = ?")
            .bind(&new.content)
            .bind(timestamp)
            .bind(&new.conversation_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO conversation_unread (conversation_id, user_id, count) VALUES (?, ?, 1)
             ON CONFLICT (conversation_id, user_id) DO UPDATE SET count = count + 1",
        )
        .bind(&new.conversation_id)
        .bind(&new.recipient_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id: new.conversation_id.clone(),
            sender_id: new.sender_id.clone(),
            sender_name: new.sender_name.clone(),
            content: new.content.clone(),
            message_type: new.message_type,
            file_name: new.file_name.clone(),
            image_url: new.image_url.clone(),
            file_url: new.file_url.clone(),
            timestamp,
            read: false,
            edited: false,
            reply_to: new.reply_to.clone(),
            reactions: Vec::new(),
            client_message_id: new.client_message_id.clone(),
        })
    }

    /// Raw row, including soft-deleted messages.
    pub async fn get_message_row(&self, message_id: &str) -> anyhow::Result<Option<MessageRow>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// Visible message with its reactions.
    pub async fn get_message(&self, message_id: &str) -> anyhow::Result<Option<Message>> {
        let row = match self.get_message_row(message_id).await? {
            Some(row) if !row.is_deleted() => row,
            _ => return Ok(None),
        };

        let reactions = sqlx::query_as::<_, ReactionRow>(
            "SELECT message_id, user_id, emoji FROM message_reactions
             WHERE message_id = ? ORDER BY created_at, rowid",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_message(reactions.into_iter().map(to_reaction).collect())))
    }

    /// Visible messages of a conversation in `(timestamp, seq)` order.
    pub async fn list_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages
             WHERE conversation_id = ? AND deleted_at IS NULL
             ORDER BY timestamp ASC, seq ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;

        let reaction_rows = sqlx::query_as::<_, ReactionRow>(
            "SELECT r.message_id, r.user_id, r.emoji
             FROM message_reactions r
             JOIN messages m ON m.id = r.message_id
             WHERE m.conversation_id = ? AND m.deleted_at IS NULL
             ORDER BY r.created_at, r.rowid",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            reactions
                .entry(row.message_id.clone())
                .or_default()
                .push(to_reaction(row));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let r = reactions.remove(&row.id).unwrap_or_default();
                row.into_message(r)
            })
            .collect())
    }

    pub async fn update_message_content(&self, message_id: &str, content: &str) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE messages SET content = ?, is_edited = 1 WHERE id = ? AND deleted_at IS NULL")
            .bind(content)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        refresh_preview_for_message(&mut tx, message_id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Hide a message from every reader. An unread message no longer
    /// counts towards `recipient_id`'s unread total.
    pub async fn soft_delete_message(&self, message_id: &str, recipient_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, bool)> = sqlx::query_as(
            "UPDATE messages SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL
             RETURNING conversation_id, is_read",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((conversation_id, is_read)) = row else {
            return Ok(false);
        };

        if !is_read {
            sqlx::query(
                "UPDATE conversation_unread SET count = MAX(count - 1, 0)
                 WHERE conversation_id = ? AND user_id = ?",
            )
            .bind(&conversation_id)
            .bind(recipient_id)
            .execute(&mut *tx)
            .await?;
        }

        refresh_preview(&mut tx, &conversation_id).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Returns false when the pair was already present.
    pub async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the pair was absent.
    pub async fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn get_stats(&self) -> anyhow::Result<ServerStats> {
        let total_users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        let conversations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;

        let messages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(ServerStats {
            total_users: total_users.0,
            conversations: conversations.0,
            messages: messages.0,
        })
    }
}

fn to_reaction(row: ReactionRow) -> Reaction {
    Reaction {
        user_id: row.user_id,
        emoji: row.emoji,
    }
}

fn group_unread(rows: Vec<UnreadRow>) -> HashMap<String, HashMap<String, u32>> {
    let mut grouped: HashMap<String, HashMap<String, u32>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.conversation_id)
            .or_default()
            .insert(row.user_id, row.count.max(0) as u32);
    }
    grouped
}

async fn refresh_preview_for_message(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    message_id: &str,
) -> anyhow::Result<()> {
    let row: Option<(String,)> = sqlx::query_as("SELECT conversation_id FROM messages WHERE id = ?")
        .bind(message_id)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some((conversation_id,)) = row {
        refresh_preview(tx, &conversation_id).await?;
    }
    Ok(())
}

/// Point the conversation preview at its latest visible message.
async fn refresh_preview(tx: &mut sqlx::Transaction<'_, Sqlite>, conversation_id: &str) -> anyhow::Result<()> {
    let latest: Option<(String, i64)> = sqlx::query_as(
        "SELECT content, timestamp FROM messages
         WHERE conversation_id = ? AND deleted_at IS NULL
         ORDER BY timestamp DESC, seq DESC LIMIT 1",
    )
    .bind(conversation_id)
    .fetch_optional(&mut **tx)
    .await?;

    let (content, timestamp) = match latest {
        Some((content, timestamp)) => (Some(content), Some(timestamp)),
        None => (None, None),
    };

    sqlx::query("UPDATE conversations SET last_message = ?, last_message_time = ? WHERE id = ?")
        .bind(content)
        .bind(timestamp)
        .bind(conversation_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_chat_core::MessageType;

    async fn storage() -> Storage {
        Storage::new(":memory:").await.unwrap()
    }

    async fn conversation(storage: &Storage, product: Option<&str>) -> String {
        storage
            .get_or_create_conversation("buyer", "Bea", "seller", "Sal's Farm", product, product)
            .await
            .unwrap()
            .0
    }

    fn text(conversation_id: &str, from: &str, to: &str, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender_id: from.to_string(),
            sender_name: from.to_uppercase(),
            recipient_id: to.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            file_name: None,
            image_url: None,
            file_url: None,
            reply_to: None,
            client_message_id: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let storage = storage().await;

        let (first, created) = storage
            .get_or_create_conversation("buyer", "Bea", "seller", "Sal", Some("kale"), Some("Kale"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = storage
            .get_or_create_conversation("buyer", "Bea", "seller", "Sal", Some("kale"), Some("Kale"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let general = conversation(&storage, None).await;
        assert_ne!(general, first);
        assert_eq!(conversation(&storage, None).await, general);
    }

    #[tokio::test]
    async fn test_send_updates_preview_and_unread() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;

        for i in 0..3 {
            storage
                .insert_message(&text(&conv, "buyer", "seller", &format!("hello {}", i)))
                .await
                .unwrap();
        }

        let c = storage.get_conversation(&conv).await.unwrap().unwrap();
        assert_eq!(c.unread_for("seller"), 3);
        assert_eq!(c.unread_for("buyer"), 0);
        assert_eq!(c.last_message.as_deref(), Some("hello 2"));

        assert!(storage.mark_as_read(&conv, "seller").await.unwrap());
        assert!(!storage.mark_as_read(&conv, "seller").await.unwrap());

        let c = storage.get_conversation(&conv).await.unwrap().unwrap();
        assert_eq!(c.unread_for("seller"), 0);
        let messages = storage.list_messages(&conv).await.unwrap();
        assert!(messages.iter().all(|m| m.read));
    }

    #[tokio::test]
    async fn test_messages_ordered_and_stable() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;

        let mut sent = Vec::new();
        for i in 0..5 {
            let m = storage
                .insert_message(&text(&conv, "buyer", "seller", &format!("m{}", i)))
                .await
                .unwrap();
            sent.push(m.id);
        }

        let first: Vec<String> = storage.list_messages(&conv).await.unwrap().into_iter().map(|m| m.id).collect();
        let again: Vec<String> = storage.list_messages(&conv).await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(first, sent);
        assert_eq!(first, again);

        let timestamps: Vec<i64> = storage.list_messages(&conv).await.unwrap().iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_and_repoints_preview() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;

        storage.insert_message(&text(&conv, "buyer", "seller", "first")).await.unwrap();
        let last = storage.insert_message(&text(&conv, "buyer", "seller", "second")).await.unwrap();

        assert!(storage.soft_delete_message(&last.id, "seller").await.unwrap());
        assert!(!storage.soft_delete_message(&last.id, "seller").await.unwrap());

        let messages = storage.list_messages(&conv).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(storage.get_message(&last.id).await.unwrap().is_none());

        let c = storage.get_conversation(&conv).await.unwrap().unwrap();
        assert_eq!(c.last_message.as_deref(), Some("first"));
        assert_eq!(c.unread_for("seller"), 1);
    }

    #[tokio::test]
    async fn test_edit_marks_edited() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;
        let m = storage.insert_message(&text(&conv, "buyer", "seller", "typo")).await.unwrap();

        storage.update_message_content(&m.id, "fixed").await.unwrap();

        let edited = storage.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited);
        assert_eq!(edited.timestamp, m.timestamp);
        assert_eq!(edited.sender_id, "buyer");

        let c = storage.get_conversation(&conv).await.unwrap().unwrap();
        assert_eq!(c.last_message.as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_reaction_pairs_unique() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;
        let m = storage.insert_message(&text(&conv, "buyer", "seller", "fresh eggs?")).await.unwrap();

        assert!(storage.add_reaction(&m.id, "seller", "🌱").await.unwrap());
        assert!(!storage.add_reaction(&m.id, "seller", "🌱").await.unwrap());
        assert!(storage.add_reaction(&m.id, "buyer", "🌱").await.unwrap());

        let loaded = storage.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(loaded.reactions.len(), 2);

        assert!(storage.remove_reaction(&m.id, "seller", "🌱").await.unwrap());
        assert!(!storage.remove_reaction(&m.id, "seller", "🌱").await.unwrap());
        let listed = storage.list_messages(&conv).await.unwrap();
        assert_eq!(listed[0].reactions, vec![Reaction { user_id: "buyer".into(), emoji: "🌱".into() }]);
    }

    #[tokio::test]
    async fn test_flags_report_changes() {
        let storage = storage().await;
        let conv = conversation(&storage, None).await;

        assert!(storage.set_archived(&conv, true).await.unwrap());
        assert!(!storage.set_archived(&conv, true).await.unwrap());
        assert!(storage.set_muted(&conv, true).await.unwrap());

        let listed = storage.list_conversations_for("seller", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].archived && listed[0].muted);
        assert!(storage.list_conversations_for("stranger", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_lookup() {
        let storage = storage().await;
        storage
            .create_user("sal", "Sal's Farm", "seller", &crypto::hash_token("tok"))
            .await
            .unwrap();

        let user = storage.find_user_by_token("tok").await.unwrap().unwrap();
        assert_eq!(user.user_id, "sal");
        assert!(storage.find_user_by_token("nope").await.unwrap().is_none());

        storage.deactivate_user("sal").await.unwrap();
        assert!(storage.find_user_by_token("tok").await.unwrap().is_none());
    }
}
