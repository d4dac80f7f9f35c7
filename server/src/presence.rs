//! Ephemeral typing presence.
//!
//! Entries live only in memory and expire unless refreshed, so a client
//! that disappears mid-keystroke does not leave a permanent indicator.

use dashmap::DashMap;
use harvest_chat_core::TypingUser;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

struct TypingEntry {
    user_name: String,
    expires_at: Instant,
}

pub struct TypingTracker {
    timeout: Duration,
    /// conversation_id -> user_id -> entry
    conversations: DashMap<String, BTreeMap<String, TypingEntry>>,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            conversations: DashMap::new(),
        }
    }

    /// Record a typing signal. Returns whether the visible set changed.
    pub fn set(&self, conversation_id: &str, user_id: &str, user_name: &str, is_typing: bool) -> bool {
        let now = Instant::now();

        if !is_typing {
            let mut removed = false;
            if let Some(mut users) = self.conversations.get_mut(conversation_id) {
                removed = users
                    .remove(user_id)
                    .map(|e| e.expires_at > now)
                    .unwrap_or(false);
                if users.is_empty() {
                    drop(users);
                    self.conversations.remove_if(conversation_id, |_, u| u.is_empty());
                }
            }
            return removed;
        }

        let mut users = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        let was_visible = users
            .get(user_id)
            .map(|e| e.expires_at > now)
            .unwrap_or(false);
        users.insert(
            user_id.to_string(),
            TypingEntry {
                user_name: user_name.to_string(),
                expires_at: now + self.timeout,
            },
        );
        !was_visible
    }

    /// Users currently typing, ordered by user id. Expired entries are skipped.
    pub fn current(&self, conversation_id: &str) -> Vec<TypingUser> {
        let now = Instant::now();
        self.conversations
            .get(conversation_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, e)| e.expires_at > now)
                    .map(|(user_id, e)| TypingUser {
                        user_id: user_id.clone(),
                        user_name: e.user_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop expired entries; returns the conversations whose set shrank.
    pub fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut touched = Vec::new();

        for mut entry in self.conversations.iter_mut() {
            let before = entry.len();
            entry.retain(|_, e| e.expires_at > now);
            if entry.len() != before {
                touched.push(entry.key().clone());
            }
        }
        self.conversations.retain(|_, users| !users.is_empty());

        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(users: &[TypingUser]) -> Vec<&str> {
        users.iter().map(|u| u.user_id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_expires_without_stop() {
        let tracker = TypingTracker::new(Duration::from_millis(3000));
        assert!(tracker.set("c1", "bea", "Bea", true));
        assert_eq!(names(&tracker.current("c1")), vec!["bea"]);

        tokio::time::advance(Duration::from_millis(2999)).await;
        assert_eq!(tracker.current("c1").len(), 1);
        assert!(tracker.sweep().is_empty());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(tracker.current("c1").is_empty());
        assert_eq!(tracker.sweep(), vec!["c1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_window() {
        let tracker = TypingTracker::new(Duration::from_millis(3000));
        assert!(tracker.set("c1", "bea", "Bea", true));

        tokio::time::advance(Duration::from_millis(2000)).await;
        // refresh does not change the visible set
        assert!(!tracker.set("c1", "bea", "Bea", true));

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(tracker.current("c1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop() {
        let tracker = TypingTracker::new(Duration::from_millis(3000));
        tracker.set("c1", "bea", "Bea", true);
        tracker.set("c1", "sal", "Sal", true);
        assert_eq!(names(&tracker.current("c1")), vec!["bea", "sal"]);

        assert!(tracker.set("c1", "bea", "Bea", false));
        assert!(!tracker.set("c1", "bea", "Bea", false));
        assert_eq!(names(&tracker.current("c1")), vec!["sal"]);
        assert!(tracker.current("other").is_empty());
    }
}
