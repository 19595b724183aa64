//! Replication channel between the two participants
//!
//! Both processes share nothing but a keyed broadcast store. The store is
//! last-write-wins per key with at-least-once change delivery; everything
//! above it (typed records, echo suppression, envelope versioning) lives in
//! [`ReplicationChannel`].

pub mod channel;
pub mod envelope;
pub mod memory;
pub mod nostr_store;

pub use channel::{
    session_key, state_key, ChannelEvent, EnvelopeSubscription, PublishOutcome,
    ReplicationChannel, RetryPolicy, SessionSubscription,
};
pub use envelope::{GameStateEnvelope, MoveDescriptor};
pub use memory::InMemoryStore;
pub use nostr_store::NostrStore;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GameResult;

/// A change observed on a subscribed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Set(String),
    Removed,
}

/// Keyed broadcast store consumed by the channel.
///
/// `set` overwrites (no merge). `subscribe` delivers the current value, if
/// any, followed by every observed change, at least once and with no ordering
/// guarantee across writers.
#[async_trait]
pub trait BroadcastStore: Send + Sync {
    async fn get(&self, key: &str) -> GameResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> GameResult<()>;

    async fn remove(&self, key: &str) -> GameResult<()>;

    async fn subscribe(&self, key: &str) -> GameResult<Subscription>;
}

/// Live subscription on one key. Delivery stops on [`Subscription::unsubscribe`]
/// or when the subscription is dropped.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    receiver: mpsc::UnboundedReceiver<StoreChange>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        key: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<StoreChange>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key: key.into(),
            receiver,
            cancel,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next change, or `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<StoreChange> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            change = self.receiver.recv() => change,
        }
    }

    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.receiver.close();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
