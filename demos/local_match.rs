//! Local match: two participants, one in-memory store and one local ledger
//!
//! Run with `cargo run --example local_match`. Both sides play a naive
//! strategy (lowest playable card, otherwise take or beat) until the game ends
//! and the escrow settles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use durak::client::{LogSink, TableView};
use durak::error::logging;
use durak::replication::{session_key, BroadcastStore};
use durak::{
    DurakConfig, EscrowCoordinator, GamePhase, InMemoryStore, LocalLedger, MatchController,
    ParticipantId, PlayerAction, SessionManager,
};
use tracing::info;

const MAX_MOVES: usize = 500;

fn choose(view: &TableView) -> PlayerAction {
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

fn manager(
    store: &Arc<InMemoryStore>,
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
    let store: Arc<dyn BroadcastStore> = store.clone();
    SessionManager::new(store, escrow, config.clone())
}

async fn catch_up(controller: &mut MatchController) -> Result<()> {
    if let Some(envelope) = controller.channel().fetch_state().await? {
        controller.handle_remote(envelope).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env().map_err(|e| anyhow!("failed to initialise logging: {}", e))?;

    let config = DurakConfig::development();
    config.validate()?;

    let store = Arc::new(InMemoryStore::new());
    let ledger = LocalLedger::new(
        config.stakes.clone(),
        config.escrow.custody_program.clone(),
        store.clone(),
    );
    let alice = LocalLedger::new_address();
    let bob = LocalLedger::new_address();
    for participant in [&alice, &bob] {
        ledger.fund(participant, config.stakes.deposit_amount() * 3).await;
    }

    let host_manager = manager(&store, &ledger, alice.clone(), &config);
    let guest_manager = manager(&store, &ledger, bob.clone(), &config);

    let host = host_manager.create_game().await.context("create game")?;
    info!(code = %host.session.code, "Share this code with your opponent");
    let guest = guest_manager
        .join_game(&host.session.code.to_lowercase())
        .await
        .context("join game")?;

    let mut session = host_manager.wait_for_opponent(&host.channel).await?;
    host_manager.mark_started(&host.channel, &mut session).await?;

    let escrow = host_manager.escrow().clone();
    let mut host_ctl = MatchController::new(
        host,
        escrow,
        &config.game,
        Box::new(LogSink::new("alice")),
    );
    host_ctl.update_session(session.clone());
    host_ctl.start(&mut rand::thread_rng()).await?;

    let escrow = guest_manager.escrow().clone();
    let mut guest_ctl = MatchController::new(
        guest,
        escrow,
        &config.game,
        Box::new(LogSink::new("bob")),
    );
    guest_ctl.update_session(session.clone());

    for _ in 0..MAX_MOVES {
        catch_up(&mut host_ctl).await?;
        catch_up(&mut guest_ctl).await?;
        if host_ctl.is_finished() && guest_ctl.is_finished() {
            break;
        }

        let mover = if host_ctl.view().is_active {
            &mut host_ctl
        } else {
            &mut guest_ctl
        };
        let action = choose(&mover.view());
        mover.handle_action(action).await?;
    }

    info!(
        outcome = ?host_ctl.state().outcome(),
        version = host_ctl.version(),
        "Match finished"
    );
    info!(
        alice = ledger.balance_of(&alice).await,
        bob = ledger.balance_of(&bob).await,
        "Final balances"
    );

    tokio::time::sleep(config.escrow.cleanup_duration() + Duration::from_millis(200)).await;
    info!(
        removed = !store.contains(&session_key(&session.code)).await,
        "Session records cleaned up"
    );
    Ok(())
}
