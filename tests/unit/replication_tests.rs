//! Unit tests for the replication channel over the in-memory store

use std::sync::Arc;
use std::time::Duration;

use durak::replication::{
    session_key, state_key, ChannelEvent, PublishOutcome, RetryPolicy, StoreChange,
};
use durak::escrow::EscrowAccount;
use durak::session::GameSession;
use durak::{
    BroadcastStore, CardEngine, GameProtocolError, GameStateEnvelope, InMemoryStore,
    MoveDescriptor, ParticipantId, ReplicationChannel,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn channel(store: &InMemoryStore, who: &str, retry: RetryPolicy) -> ReplicationChannel {
    let store: Arc<dyn BroadcastStore> = Arc::new(store.clone());
    ReplicationChannel::new(store, "QWE123", ParticipantId::new(who), retry)
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        initial_backoff: Duration::from_millis(1),
    }
}

fn session() -> GameSession {
    GameSession::new(
        "QWE123".to_string(),
        ParticipantId::new("host"),
        EscrowAccount::new("escrow-1"),
        "program".to_string(),
    )
}

fn dealt_envelope(seed: u64, sender: &str) -> GameStateEnvelope {
    let mut engine = CardEngine::new();
    engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
    GameStateEnvelope::initial(engine.into_state(), ParticipantId::new(sender)).unwrap()
}

#[tokio::test]
async fn test_session_publish_retries_transient_failures() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", fast_retry(3));
    store.fail_next_sets(2).await;

    let record = session();
    host.publish_session(&record).await.unwrap();
    assert_eq!(store.write_log(&session_key("QWE123")).await.len(), 1);
    assert_eq!(host.fetch_session().await.unwrap(), Some(record));
}

#[tokio::test]
async fn test_session_publish_gives_up_after_attempts() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", fast_retry(2));
    store.fail_next_sets(2).await;

    let err = host.publish_session(&session()).await.unwrap_err();
    assert!(matches!(err, GameProtocolError::Network { .. }));
    assert_eq!(host.fetch_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_state_publish_is_a_single_attempt() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", fast_retry(5));
    store.fail_next_sets(1).await;

    let envelope = dealt_envelope(1, "host");
    assert!(host.publish_state(&envelope).await.is_err());
    assert!(store.write_log(&state_key("QWE123")).await.is_empty());

    assert_eq!(
        host.publish_state(&envelope).await.unwrap(),
        PublishOutcome::Published
    );
}

#[tokio::test]
async fn test_equal_version_tie_keeps_lower_digest() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", RetryPolicy::none());
    let guest = channel(&store, "guest", RetryPolicy::none());

    let a = dealt_envelope(2, "host");
    let b = dealt_envelope(3, "guest");
    let (low, high) = if a.state_digest < b.state_digest {
        (a, b)
    } else {
        (b, a)
    };

    let low_channel = if low.sender.as_str() == "host" { &host } else { &guest };
    let high_channel = if high.sender.as_str() == "host" { &host } else { &guest };

    low_channel.publish_state(&low).await.unwrap();
    assert_eq!(
        high_channel.publish_state(&high).await.unwrap(),
        PublishOutcome::Superseded(low.clone())
    );
    assert_eq!(host.fetch_state().await.unwrap(), Some(low));
}

#[tokio::test]
async fn test_publish_from_stale_parent_never_overwrites() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", RetryPolicy::none());
    let guest = channel(&store, "guest", RetryPolicy::none());

    // both sides derived a v2 from the same v1; the guest's landed first
    let a = dealt_envelope(7, "host");
    let b = dealt_envelope(8, "host");
    let (low, high) = if a.state_digest < b.state_digest {
        (a, b)
    } else {
        (b, a)
    };
    let landed = GameStateEnvelope::new(
        high.game_data.clone(),
        MoveDescriptor::Take,
        ParticipantId::new("guest"),
        1,
    )
    .unwrap();
    let late = GameStateEnvelope::new(
        low.game_data.clone(),
        MoveDescriptor::Pass,
        ParticipantId::new("host"),
        1,
    )
    .unwrap();
    assert!(late.supersedes(&landed));

    guest.publish_state(&landed).await.unwrap();
    assert_eq!(
        host.publish_state(&late).await.unwrap(),
        PublishOutcome::Superseded(landed.clone())
    );
    assert_eq!(host.fetch_state().await.unwrap(), Some(landed));
    assert_eq!(store.write_log(&state_key("QWE123")).await.len(), 1);
}

#[tokio::test]
async fn test_subscribers_see_removal() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", RetryPolicy::none());
    let guest = channel(&store, "guest", RetryPolicy::none());
    host.publish_session(&session()).await.unwrap();
    host.publish_state(&dealt_envelope(4, "host")).await.unwrap();

    let mut sessions = guest.subscribe_session().await.unwrap();
    let mut states = guest.subscribe_state().await.unwrap();
    assert!(matches!(sessions.next().await, Some(ChannelEvent::Updated(_))));
    assert!(matches!(states.next().await, Some(ChannelEvent::Updated(_))));

    host.remove_all().await.unwrap();
    assert_eq!(sessions.next().await, Some(ChannelEvent::Removed));
    assert_eq!(states.next().await, Some(ChannelEvent::Removed));
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn test_undecodable_values_are_skipped() {
    let store = InMemoryStore::new();
    let guest = channel(&store, "guest", RetryPolicy::none());
    let mut states = guest.subscribe_state().await.unwrap();

    store
        .set(&state_key("QWE123"), "not json".to_string())
        .await
        .unwrap();
    let envelope = dealt_envelope(5, "host");
    store
        .set(&state_key("QWE123"), envelope.to_json().unwrap())
        .await
        .unwrap();

    assert_eq!(states.next().await, Some(ChannelEvent::Updated(envelope)));
}

#[tokio::test]
async fn test_dropping_a_subscription_unsubscribes() {
    let store = InMemoryStore::new();
    let guest = channel(&store, "guest", RetryPolicy::none());
    let states = guest.subscribe_state().await.unwrap();
    assert_eq!(store.subscriber_count(&state_key("QWE123")).await, 1);

    drop(states);
    store
        .set(&state_key("QWE123"), "x".to_string())
        .await
        .unwrap();
    assert_eq!(store.subscriber_count(&state_key("QWE123")).await, 0);
    assert_eq!(
        store.write_log(&state_key("QWE123")).await,
        vec![StoreChange::Set("x".to_string())]
    );
}

#[test]
fn test_envelope_successor_versions() {
    let initial = dealt_envelope(6, "host");
    let next = GameStateEnvelope::new(
        initial.game_data.clone(),
        MoveDescriptor::Pass,
        ParticipantId::new("guest"),
        initial.version,
    )
    .unwrap();
    assert_eq!(next.version, 2);
    assert_eq!(next.parent_version, 1);
    assert!(next.supersedes(&initial));
    assert!(!initial.supersedes(&next));
}

#[tokio::test]
async fn test_session_subscription_waits_for_a_write() {
    let store = InMemoryStore::new();
    let host = channel(&store, "host", RetryPolicy::none());
    let guest = channel(&store, "guest", RetryPolicy::none());
    let mut sessions = guest.subscribe_session().await.unwrap();

    let mut next = tokio_test::task::spawn(sessions.next());
    tokio_test::assert_pending!(next.poll());

    let record = session();
    host.publish_session(&record).await.unwrap();
    assert!(next.is_woken());
    let update = tokio_test::assert_ready!(next.poll());
    assert_eq!(update, Some(ChannelEvent::Updated(record)));
}
