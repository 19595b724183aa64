//! Typed publish/subscribe over a [`BroadcastStore`]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::envelope::GameStateEnvelope;
use super::{BroadcastStore, StoreChange, Subscription};
use crate::config::NetworkConfig;
use crate::error::{GameProtocolError, GameResult};
use crate::identity::ParticipantId;
use crate::session::GameSession;

/// Store key of the session record for `code`
pub fn session_key(code: &str) -> String {
    format!("games/{}", code)
}

/// Store key of the game-state envelope for `code`
pub fn state_key(code: &str) -> String {
    format!("gameStates/{}", code)
}

/// Bounded retry with exponential backoff for publishes that must land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// A single attempt, no waiting
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds, fails with a non-network error or the
    /// attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> GameResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GameResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err @ GameProtocolError::Network { .. }) if attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.with_context(operation)),
            }
        }
    }
}

/// A record update seen by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
    Updated(T),
    Removed,
}

/// Result of a versioned state publish
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published,
    /// The store already holds a preferred envelope; nothing was written
    Superseded(GameStateEnvelope),
}

/// Replication channel for one game code, bound to the local participant
#[derive(Clone)]
pub struct ReplicationChannel {
    store: Arc<dyn BroadcastStore>,
    code: String,
    local_id: ParticipantId,
    retry: RetryPolicy,
}

impl ReplicationChannel {
    pub fn new(
        store: Arc<dyn BroadcastStore>,
        code: impl Into<String>,
        local_id: ParticipantId,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            code: code.into(),
            local_id,
            retry,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn store(&self) -> Arc<dyn BroadcastStore> {
        Arc::clone(&self.store)
    }

    /// Publish the session record, retrying transient failures
    #[instrument(skip(self, session), fields(code = %self.code))]
    pub async fn publish_session(&self, session: &GameSession) -> GameResult<()> {
        let key = session_key(&self.code);
        let value = serde_json::to_string(session)?;
        self.retry
            .run("publish session", || self.store.set(&key, value.clone()))
            .await?;
        debug!("Session record published");
        Ok(())
    }

    pub async fn fetch_session(&self) -> GameResult<Option<GameSession>> {
        let key = session_key(&self.code);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn subscribe_session(&self) -> GameResult<SessionSubscription> {
        let inner = self.store.subscribe(&session_key(&self.code)).await?;
        Ok(SessionSubscription { inner })
    }

    pub async fn fetch_state(&self) -> GameResult<Option<GameStateEnvelope>> {
        let key = state_key(&self.code);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(GameStateEnvelope::from_json(&value)?)),
            None => Ok(None),
        }
    }

    /// Publish a fresh transition. Refused with `Superseded` once the store
    /// holds anything newer than the version `envelope` was derived from, so
    /// a move the opponent already published is never overwritten. Single
    /// attempt.
    #[instrument(skip(self, envelope), fields(code = %self.code, version = envelope.version))]
    pub async fn publish_state(&self, envelope: &GameStateEnvelope) -> GameResult<PublishOutcome> {
        if let Some(current) = self.fetch_state().await? {
            if current.version > envelope.parent_version {
                info!(
                    remote_version = current.version,
                    parent_version = envelope.parent_version,
                    "Remote state is ahead, publish refused"
                );
                return Ok(PublishOutcome::Superseded(current));
            }
        }
        self.write_state(envelope).await
    }

    /// Re-publish an envelope that won a same-version tie. Written unless the
    /// store already holds an envelope that supersedes it.
    #[instrument(skip(self, envelope), fields(code = %self.code, version = envelope.version))]
    pub async fn republish_state(&self, envelope: &GameStateEnvelope) -> GameResult<PublishOutcome> {
        if let Some(current) = self.fetch_state().await? {
            if current == *envelope {
                return Ok(PublishOutcome::Published);
            }
            if !envelope.supersedes(&current) {
                return Ok(PublishOutcome::Superseded(current));
            }
        }
        self.write_state(envelope).await
    }

    async fn write_state(&self, envelope: &GameStateEnvelope) -> GameResult<PublishOutcome> {
        let key = state_key(&self.code);
        self.store
            .set(&key, envelope.to_json()?)
            .await
            .map_err(|e| e.with_context("publish state"))?;
        debug!(last_move = ?envelope.last_move, "State envelope published");
        Ok(PublishOutcome::Published)
    }

    /// Subscribe to state envelopes published by the opponent
    pub async fn subscribe_state(&self) -> GameResult<EnvelopeSubscription> {
        let inner = self.store.subscribe(&state_key(&self.code)).await?;
        Ok(EnvelopeSubscription {
            inner,
            local_id: self.local_id.clone(),
        })
    }

    /// Delete both records for this game code
    #[instrument(skip(self), fields(code = %self.code))]
    pub async fn remove_all(&self) -> GameResult<()> {
        self.store.remove(&session_key(&self.code)).await?;
        self.store.remove(&state_key(&self.code)).await?;
        info!("Session records removed");
        Ok(())
    }
}

/// Session record updates
#[derive(Debug)]
pub struct SessionSubscription {
    inner: Subscription,
}

impl SessionSubscription {
    /// Next decodable update; `None` once the subscription closes
    pub async fn next(&mut self) -> Option<ChannelEvent<GameSession>> {
        loop {
            match self.inner.recv().await? {
                StoreChange::Removed => return Some(ChannelEvent::Removed),
                StoreChange::Set(value) => match serde_json::from_str(&value) {
                    Ok(session) => return Some(ChannelEvent::Updated(session)),
                    Err(e) => warn!(error = %e, "Ignoring undecodable session record"),
                },
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.inner.unsubscribe();
    }
}

/// Game-state updates with the local participant's own writes filtered out
#[derive(Debug)]
pub struct EnvelopeSubscription {
    inner: Subscription,
    local_id: ParticipantId,
}

impl EnvelopeSubscription {
    pub async fn next(&mut self) -> Option<ChannelEvent<GameStateEnvelope>> {
        loop {
            match self.inner.recv().await? {
                StoreChange::Removed => return Some(ChannelEvent::Removed),
                StoreChange::Set(value) => match GameStateEnvelope::from_json(&value) {
                    Ok(envelope) if envelope.sender == self.local_id => {
                        debug!(version = envelope.version, "Skipping own envelope");
                    }
                    Ok(envelope) => return Some(ChannelEvent::Updated(envelope)),
                    Err(e) => warn!(error = %e, "Ignoring undecodable state envelope"),
                },
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.inner.unsubscribe();
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}
