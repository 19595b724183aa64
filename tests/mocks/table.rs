//! Two-participant match fixture over the in-memory store and ledger

use std::sync::Arc;

use durak::client::TableView;
use durak::replication::BroadcastStore;
use durak::{
    Card, DurakConfig, EscrowCoordinator, GamePhase, InMemoryStore, LocalLedger, MatchController,
    ParticipantId, PlayerAction, SessionManager,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::RecordingSink;

pub fn card(input: &str) -> Card {
    Card::parse(input).unwrap()
}

/// Development settings with a 30 second turn and fast retries
pub fn test_config() -> DurakConfig {
    let mut config = DurakConfig::development();
    config.game.turn_time_limit = 30;
    config.network.retry_attempts = 3;
    config.network.retry_backoff_ms = 1;
    config
}

pub fn session_manager(
    store: &InMemoryStore,
    ledger: &LocalLedger,
    owner: ParticipantId,
    config: &DurakConfig,
) -> SessionManager {
    let escrow = EscrowCoordinator::new(
        Arc::new(ledger.wallet(owner)),
        Arc::new(ledger.clone()),
        config.stakes.clone(),
        config.escrow.clone(),
    );
    let store: Arc<dyn BroadcastStore> = Arc::new(store.clone());
    SessionManager::new(store, escrow, config.clone())
}

/// Naive strategy: lowest playable card, otherwise take, beat or pass
pub fn naive_action(view: &TableView) -> PlayerAction {
    let playable = view.playable_cards();
    match (view.phase, playable.first()) {
        (GamePhase::Defending, Some(card)) => PlayerAction::Defend(*card),
        (GamePhase::Defending, None) => PlayerAction::Take,
        (GamePhase::Attacking, Some(card)) if view.battle_area.len() < 6 => {
            PlayerAction::Attack(*card)
        }
        (GamePhase::Attacking, _) if view.buttons.beat => PlayerAction::Beat,
        (GamePhase::Attacking, _) => PlayerAction::Pass,
    }
}

/// Pull the latest envelope from the store into `controller`
pub async fn catch_up(controller: &mut MatchController) -> bool {
    match controller.channel().fetch_state().await.unwrap() {
        Some(envelope) => controller.handle_remote(envelope).await.unwrap(),
        None => false,
    }
}

pub struct MatchFixture {
    pub config: DurakConfig,
    pub store: InMemoryStore,
    pub ledger: LocalLedger,
    pub alice: ParticipantId,
    pub bob: ParticipantId,
    pub code: String,
    pub host: MatchController,
    pub guest: MatchController,
    pub host_sink: RecordingSink,
    pub guest_sink: RecordingSink,
}

impl MatchFixture {
    /// Both sides funded with exactly one deposit, game created, joined and
    /// both deposits recorded. Nothing dealt yet.
    pub async fn funded(config: DurakConfig) -> Self {
        let store = InMemoryStore::new();
        let ledger = LocalLedger::new(
            config.stakes.clone(),
            config.escrow.custody_program.clone(),
            Arc::new(store.clone()),
        );
        let alice = ParticipantId::new("alice");
        let bob = ParticipantId::new("bob");
        ledger.fund(&alice, config.stakes.deposit_amount()).await;
        ledger.fund(&bob, config.stakes.deposit_amount()).await;

        let host_manager = session_manager(&store, &ledger, alice.clone(), &config);
        let guest_manager = session_manager(&store, &ledger, bob.clone(), &config);

        let hosted = host_manager.create_game().await.unwrap();
        let code = hosted.session.code.clone();
        let joined = guest_manager.join_game(&code).await.unwrap();
        let session = host_manager.wait_for_opponent(&hosted.channel).await.unwrap();

        let host_sink = RecordingSink::new();
        let guest_sink = RecordingSink::new();
        let mut host = MatchController::new(
            hosted,
            host_manager.escrow().clone(),
            &config.game,
            host_sink.boxed(),
        );
        host.update_session(session);
        let guest = MatchController::new(
            joined,
            guest_manager.escrow().clone(),
            &config.game,
            guest_sink.boxed(),
        );

        Self {
            config,
            store,
            ledger,
            alice,
            bob,
            code,
            host,
            guest,
            host_sink,
            guest_sink,
        }
    }

    /// Funded fixture with the cards dealt from `seed` and replicated
    pub async fn dealt(config: DurakConfig, seed: u64) -> Self {
        let mut fixture = Self::funded(config).await;
        fixture
            .host
            .start(&mut StdRng::seed_from_u64(seed))
            .await
            .unwrap();
        assert!(catch_up(&mut fixture.guest).await);
        fixture
    }

    /// Play naive moves until both sides have settled
    pub async fn play_out(&mut self, max_moves: usize) -> usize {
        for moves in 0..max_moves {
            catch_up(&mut self.host).await;
            catch_up(&mut self.guest).await;
            assert!(self.host.state().check_invariants().is_ok());
            if self.host.is_finished() && self.guest.is_finished() {
                return moves;
            }

            let mover = if self.host.view().is_active {
                &mut self.host
            } else {
                &mut self.guest
            };
            let action = naive_action(&mover.view());
            mover.handle_action(action).await.unwrap();
        }
        panic!("match did not finish within {} moves", max_moves);
    }
}
