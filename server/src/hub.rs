//! Live snapshot fan-out.
//!
//! Each topic key owns a `watch` channel holding the latest full
//! snapshot. Subscribers get a disposable [`Subscription`]; the topic is
//! torn down when its last subscription is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

pub struct SnapshotHub<K, T>
where
    K: Eq + Hash,
{
    topics: Arc<DashMap<K, watch::Sender<T>>>,
    updates: Mutex<()>,
}

impl<K, T> SnapshotHub<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            updates: Mutex::new(()),
        }
    }

    /// Serializes load-then-publish sequences so an older snapshot can
    /// never overwrite a newer one.
    pub async fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.updates.lock().await
    }

    /// Register a subscriber; `initial` becomes the topic's current value.
    pub fn subscribe(&self, key: K, initial: T) -> Subscription<K, T> {
        let rx = match self.topics.entry(key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().send_replace(initial);
                entry.get().subscribe()
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(initial);
                entry.insert(tx);
                rx
            }
        };

        Subscription {
            key,
            rx,
            topics: Arc::clone(&self.topics),
        }
    }

    /// Replace the snapshot for `key`. No-op without subscribers.
    pub fn publish(&self, key: &K, value: T) -> bool {
        match self.topics.get(key) {
            Some(tx) => {
                tx.send_replace(value);
                true
            }
            None => false,
        }
    }

    pub fn has_subscribers(&self, key: &K) -> bool {
        self.topics
            .get(key)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl<K, T> Default for SnapshotHub<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one live topic; dropping it unsubscribes.
pub struct Subscription<K, T>
where
    K: Eq + Hash,
{
    key: K,
    rx: watch::Receiver<T>,
    topics: Arc<DashMap<K, watch::Sender<T>>>,
}

impl<K, T> Subscription<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Latest snapshot, marking it seen.
    pub fn current(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Waits for the next snapshot. `None` once the topic is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl<K, T> Drop for Subscription<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // our own receiver is still alive here
        self.topics.remove_if(&self.key, |_, tx| tx.receiver_count() <= 1);
    }
}
