//! In-process broadcast store
//!
//! Shared by both participants when they run in one process (tests, the local
//! demo). Keeps a write log per key so callers can inspect what was published.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BroadcastStore, StoreChange, Subscription};
use crate::error::{GameResult, NetworkError};

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::UnboundedSender<StoreChange>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, String>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    write_log: HashMap<String, Vec<StoreChange>>,
    failing_sets: u32,
}

impl StoreInner {
    fn notify(&mut self, key: &str, change: StoreChange) {
        if let Some(subscribers) = self.subscribers.get_mut(key) {
            subscribers.retain(|sub| {
                !sub.cancel.is_cancelled() && sub.sender.send(change.clone()).is_ok()
            });
        }
        self.write_log
            .entry(key.to_string())
            .or_default()
            .push(change);
    }
}

/// Last-write-wins store held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `set` fail with a network error
    pub async fn fail_next_sets(&self, count: u32) {
        self.inner.lock().await.failing_sets = count;
    }

    /// Every successful write and removal on `key`, oldest first
    pub async fn write_log(&self, key: &str) -> Vec<StoreChange> {
        self.inner
            .lock()
            .await
            .write_log
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live subscribers on `key`
    pub async fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .await
            .subscribers
            .get(key)
            .map(|subs| subs.iter().filter(|sub| !sub.cancel.is_cancelled()).count())
            .unwrap_or(0)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.values.contains_key(key)
    }

    /// Keys currently holding a value, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().await.values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BroadcastStore for InMemoryStore {
    async fn get(&self, key: &str) -> GameResult<Option<String>> {
        Ok(self.inner.lock().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> GameResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.failing_sets > 0 {
            inner.failing_sets -= 1;
            return Err(NetworkError::PublishFailed {
                key: key.to_string(),
                message: "injected failure".to_string(),
            }
            .into());
        }

        debug!(key = %key, bytes = value.len(), "Store set");
        inner.values.insert(key.to_string(), value.clone());
        inner.notify(key, StoreChange::Set(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> GameResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.values.remove(key).is_some() {
            debug!(key = %key, "Store remove");
            inner.notify(key, StoreChange::Removed);
        }
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> GameResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.values.get(key) {
            // receiver is alive in this scope
            let _ = sender.send(StoreChange::Set(current.clone()));
        }
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber {
                sender,
                cancel: cancel.clone(),
            });

        Ok(Subscription::new(key, receiver, cancel))
    }
}
