//! Broadcast store backed by Nostr relays
//!
//! Each key maps to a parameterized replaceable event (`d` tag = namespaced
//! key). Relays keep the latest event per author and `d` tag; readers pick the
//! newest event across both participants' keys. Each store stamps its events
//! with strictly increasing `created_at` values so two writes within one
//! second still replace each other in order. Removal publishes an
//! empty-content tombstone.
//!
//! Subscribers drop redelivered events by id only. Ordering between envelopes
//! is decided by their version, not by relay timestamps.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr::{Event, EventBuilder, EventId, Filter, Keys, Kind, PublicKey, Tag, Timestamp};
use nostr_sdk::{Client as NostrClient, EventSource, RelayPoolNotification};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{BroadcastStore, StoreChange, Subscription};
use crate::config::NetworkConfig;
use crate::error::{GameProtocolError, GameResult, NetworkError};

/// Event kind for store records (application-specific data range)
pub const STORE_KIND: Kind = Kind::Custom(30_078);

#[derive(Clone)]
pub struct NostrStore {
    client: NostrClient,
    keys: Keys,
    namespace: String,
    fetch_timeout: Duration,
    /// `created_at` of the last event this store signed, in seconds
    last_created: Arc<AtomicU64>,
}

impl NostrStore {
    /// Connect to the configured relays and sign records with `keys`
    #[instrument(skip(keys, config, namespace), fields(relays = config.relays.len()))]
    pub async fn connect(
        keys: Keys,
        config: &NetworkConfig,
        namespace: impl Into<String>,
    ) -> GameResult<Self> {
        if config.relays.is_empty() {
            return Err(NetworkError::ConnectionFailed {
                message: "no relays configured".to_string(),
            }
            .into());
        }

        let client = NostrClient::new(keys.clone());
        for relay in &config.relays {
            client.add_relay(relay.as_str()).await?;
        }
        client.connect().await;
        info!("Connected to relays");

        Ok(Self {
            client,
            keys,
            namespace: namespace.into(),
            fetch_timeout: Duration::from_secs(config.connection_timeout),
            last_created: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn client(&self) -> &NostrClient {
        &self.client
    }

    fn identifier(&self, key: &str) -> String {
        format!("{}/{}", self.namespace, key)
    }

    fn filter(&self, key: &str) -> Filter {
        Filter::new().kind(STORE_KIND).identifier(self.identifier(key))
    }

    /// Now, or one second past the previous event when that is later
    fn next_created_at(&self) -> Timestamp {
        let now = Timestamp::now().as_u64();
        let previous = self
            .last_created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Timestamp::from(now.max(previous + 1))
    }

    async fn publish(&self, key: &str, content: String) -> GameResult<()> {
        let event = EventBuilder::new(STORE_KIND, content, [Tag::identifier(self.identifier(key))])
            .custom_created_at(self.next_created_at())
            .to_event(&self.keys)?;
        self.client.send_event(event).await.map_err(|e| {
            GameProtocolError::from(NetworkError::PublishFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(())
    }

    fn latest(events: impl IntoIterator<Item = Event>) -> Option<Event> {
        events
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
    }

    fn to_change(event: &Event) -> StoreChange {
        if event.content.is_empty() {
            StoreChange::Removed
        } else {
            StoreChange::Set(event.content.clone())
        }
    }
}

#[async_trait]
impl BroadcastStore for NostrStore {
    async fn get(&self, key: &str) -> GameResult<Option<String>> {
        let events = self
            .client
            .get_events_of(vec![self.filter(key)], EventSource::relays(Some(self.fetch_timeout)))
            .await?;
        Ok(Self::latest(events).and_then(|event| match Self::to_change(&event) {
            StoreChange::Set(value) => Some(value),
            StoreChange::Removed => None,
        }))
    }

    async fn set(&self, key: &str, value: String) -> GameResult<()> {
        debug!(key = %key, bytes = value.len(), "Publishing record");
        self.publish(key, value).await
    }

    async fn remove(&self, key: &str) -> GameResult<()> {
        debug!(key = %key, "Publishing tombstone");
        self.publish(key, String::new()).await
    }

    async fn subscribe(&self, key: &str) -> GameResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // listen before subscribing so nothing published in between is lost
        let mut notifications = self.client.notifications();
        let since = Timestamp::now();

        if let Some(current) = self.get(key).await? {
            let _ = sender.send(StoreChange::Set(current));
        }

        let output = self
            .client
            .subscribe(vec![self.filter(key).since(since)], None)
            .await?;
        let subscription_id = output.val;

        let client = self.client.clone();
        let token = cancel.clone();
        let key_name = key.to_string();
        tokio::spawn(async move {
            let mut delivery = DeliveryFilter::default();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = notifications.recv() => match notification {
                        Ok(RelayPoolNotification::Event { subscription_id: id, event, .. })
                            if id == subscription_id =>
                        {
                            if !delivery.admit(&event) {
                                continue;
                            }
                            if sender.send(Self::to_change(&event)).is_err() {
                                break;
                            }
                        }
                        Ok(RelayPoolNotification::Shutdown) => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(key = %key_name, skipped = skipped, "Notification stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            client.unsubscribe(subscription_id).await;
            debug!(key = %key_name, "Relay subscription closed");
        });

        Ok(Subscription::new(key, receiver, cancel))
    }
}

/// Drops events a relay redelivers, and events replaced by a newer one from
/// the same author. Events sharing a second are all passed on.
#[derive(Debug, Default)]
struct DeliveryFilter {
    seen: HashSet<EventId>,
    newest: HashMap<PublicKey, Timestamp>,
}

impl DeliveryFilter {
    fn admit(&mut self, event: &Event) -> bool {
        if self.seen.contains(&event.id) {
            return false;
        }
        if self
            .newest
            .get(&event.pubkey)
            .is_some_and(|newest| event.created_at < *newest)
        {
            return false;
        }
        self.seen.insert(event.id);
        self.newest.insert(event.pubkey, event.created_at);
        true
    }
}
