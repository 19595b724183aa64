//! Match controller: the single writer of one participant's game state
//!
//! Local actions, remote envelopes and timer expiry all funnel through
//! [`MatchController::run`], so the engine is never touched from two places.
//! Every accepted transition is published, re-syncs the turn timer and
//! re-renders; the first terminal state settles the escrow and schedules
//! cleanup of the session records.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::timer::{TimerChange, TurnTimer};
use super::view::{PresentationSink, StatusLevel, TableView};
use crate::config::GameConfig;
use crate::error::{GameProtocolError, GameResult, NetworkError, RuleViolation};
use crate::escrow::{EscrowCoordinator, PayoutOutcome};
use crate::game::{active_role, CardEngine, GameOutcome, GameState, PlayerAction, Role};
use crate::identity::ParticipantId;
use crate::replication::{
    session_key, ChannelEvent, GameStateEnvelope, MoveDescriptor, PublishOutcome,
    ReplicationChannel,
};
use crate::session::{GameSession, JoinedSession};

/// Summary returned when [`MatchController::run`] finishes
#[derive(Debug)]
pub struct MatchReport {
    pub outcome: Option<GameOutcome>,
    pub payout: Option<PayoutOutcome>,
    pub final_state: GameState,
    pub version: u64,
    /// Pending removal of the session records
    pub cleanup: Option<JoinHandle<()>>,
}

pub struct MatchController {
    engine: CardEngine,
    local_role: Role,
    local_id: ParticipantId,
    session: GameSession,
    channel: ReplicationChannel,
    escrow: EscrowCoordinator,
    timer: TurnTimer,
    sink: Box<dyn PresentationSink>,
    /// Last envelope accepted locally, own or remote
    current: Option<GameStateEnvelope>,
    payout: Option<PayoutOutcome>,
    cleanup: Option<JoinHandle<()>>,
}

fn describe(action: PlayerAction) -> MoveDescriptor {
    match action {
        PlayerAction::Attack(card) => MoveDescriptor::Attack { card },
        PlayerAction::Defend(card) => MoveDescriptor::Defend { card },
        PlayerAction::Take => MoveDescriptor::Take,
        PlayerAction::Beat => MoveDescriptor::Beat,
        PlayerAction::Pass => MoveDescriptor::Pass,
    }
}

impl MatchController {
    pub fn new(
        joined: JoinedSession,
        escrow: EscrowCoordinator,
        config: &GameConfig,
        sink: Box<dyn PresentationSink>,
    ) -> Self {
        Self {
            engine: CardEngine::new(),
            local_role: joined.role,
            local_id: joined.local_id,
            session: joined.session,
            channel: joined.channel,
            escrow,
            timer: TurnTimer::new(config.turn_duration()),
            sink,
            current: None,
            payout: None,
            cleanup: None,
        }
    }

    pub fn state(&self) -> &GameState {
        self.engine.state()
    }

    pub fn local_role(&self) -> Role {
        self.local_role
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn channel(&self) -> &ReplicationChannel {
        &self.channel
    }

    pub fn timer(&self) -> &TurnTimer {
        &self.timer
    }

    pub fn current_envelope(&self) -> Option<&GameStateEnvelope> {
        self.current.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.current.as_ref().map(|e| e.version).unwrap_or(0)
    }

    pub fn payout(&self) -> Option<&PayoutOutcome> {
        self.payout.as_ref()
    }

    pub fn view(&self) -> TableView {
        TableView::new(&self.engine, self.local_role)
    }

    /// Game over and settlement done
    pub fn is_finished(&self) -> bool {
        self.engine.state().is_game_over && self.payout.is_some()
    }

    /// Refresh the session record, e.g. after the opponent's deposit landed
    pub fn update_session(&mut self, session: GameSession) {
        self.session = session;
    }

    /// Deal and publish the opening state. Host only, after both deposits.
    #[instrument(skip(self, rng), fields(code = %self.channel.code()))]
    pub async fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> GameResult<()> {
        if self.local_role != Role::A {
            return Err(GameProtocolError::Validation {
                message: "Only the host deals".to_string(),
                field: Some("role".to_string()),
            });
        }
        if let Err(e) = self.escrow.ensure_funded(&self.session) {
            self.sink.status(&e.user_message(), StatusLevel::Error);
            return Err(e);
        }

        let mut candidate = self.engine.clone();
        candidate.deal_initial(rng)?;
        let envelope = GameStateEnvelope::initial(candidate.state().clone(), self.local_id.clone())?;
        self.publish(candidate, envelope).await?;
        info!(trump = ?self.engine.state().trump_card, "Cards dealt");
        Ok(())
    }

    /// Apply a local action. Refused actions are reported to the sink and
    /// leave the state untouched.
    #[instrument(skip(self), fields(code = %self.channel.code(), role = ?self.local_role))]
    pub async fn handle_action(&mut self, action: PlayerAction) -> GameResult<()> {
        if self.forfeit_pending() {
            let err = GameProtocolError::from(RuleViolation::TurnExpired);
            debug!(error = %err, "Action refused");
            self.sink.status(&err.user_message(), StatusLevel::Error);
            return Err(err);
        }
        let mut candidate = self.engine.clone();
        if let Err(violation) = candidate.apply(self.local_role, action) {
            let err = GameProtocolError::from(violation);
            debug!(error = %err, "Action refused");
            self.sink.status(&err.user_message(), StatusLevel::Error);
            return Err(err);
        }

        let last_move = if candidate.state().is_game_over {
            MoveDescriptor::GameOver {
                winner: candidate.state().winner,
            }
        } else {
            describe(action)
        };
        let envelope = GameStateEnvelope::new(
            candidate.state().clone(),
            last_move,
            self.local_id.clone(),
            self.version(),
        )?;
        self.publish(candidate, envelope).await
    }

    /// Consider an envelope published by the opponent. Returns whether it was
    /// adopted.
    #[instrument(skip(self, envelope), fields(code = %self.channel.code(), version = envelope.version))]
    pub async fn handle_remote(&mut self, envelope: GameStateEnvelope) -> GameResult<bool> {
        if envelope.sender == self.local_id {
            return Ok(false);
        }
        if !envelope.is_consistent() {
            warn!("Dropping envelope with mismatched digest or version");
            return Ok(false);
        }
        if let Err(reason) = envelope.game_data.check_invariants() {
            warn!(reason = %reason, "Dropping envelope with invalid state");
            return Ok(false);
        }

        if let Some(current) = &self.current {
            if !envelope.supersedes(current) {
                if current.version == envelope.version
                    && current.state_digest != envelope.state_digest
                    && current.sender == self.local_id
                {
                    // our envelope won the tie; make sure the store ends up with it
                    let ours = current.clone();
                    info!("Re-publishing envelope that won a same-version tie");
                    self.channel.republish_state(&ours).await?;
                }
                return Ok(false);
            }
        }

        self.adopt(envelope).await;
        Ok(true)
    }

    /// Local turn ran out: forfeit and publish a single timeout envelope
    #[instrument(skip(self), fields(code = %self.channel.code(), role = ?self.local_role))]
    pub async fn handle_timer_expired(&mut self) -> GameResult<()> {
        if self.engine.state().is_game_over {
            return Ok(());
        }
        let mut candidate = self.engine.clone();
        candidate.forfeit(self.local_role)?;
        let envelope = GameStateEnvelope::new(
            candidate.state().clone(),
            MoveDescriptor::Timeout {
                winner: self.local_role.opponent(),
            },
            self.local_id.clone(),
            self.version(),
        )?;
        warn!("Turn time expired, forfeiting");
        self.publish(candidate, envelope).await
    }

    /// Per-second tick: report the countdown and fire expiry. A forfeit
    /// that failed to publish is retried on every tick.
    pub async fn tick(&mut self, now: Instant) -> GameResult<()> {
        if self.timer.poll_expired(now) || self.forfeit_pending() {
            return self.handle_timer_expired().await;
        }
        if let Some(remaining) = self.timer.remaining(now) {
            self.sink.timer(remaining);
        }
        Ok(())
    }

    /// Event loop: remote envelopes, local actions and the turn timer.
    /// Returns once the game is over and settled, or the session is gone.
    pub async fn run(mut self, mut actions: mpsc::Receiver<PlayerAction>) -> GameResult<MatchReport> {
        let mut updates = self.channel.subscribe_state().await?;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut actions_open = true;

        while !self.is_finished() {
            let deadline = self.timer.deadline();
            tokio::select! {
                update = updates.next() => match update {
                    Some(ChannelEvent::Updated(envelope)) => {
                        if let Err(e) = self.handle_remote(envelope).await {
                            warn!(error = %e, "Failed to handle remote state");
                        }
                    }
                    Some(ChannelEvent::Removed) => {
                        if !self.engine.state().is_game_over {
                            self.sink.status("Game session closed", StatusLevel::Warning);
                        }
                        break;
                    }
                    None => {
                        return Err(NetworkError::SubscriptionClosed {
                            key: session_key(self.channel.code()),
                        }
                        .into());
                    }
                },
                action = actions.recv(), if actions_open => match action {
                    Some(action) => {
                        if let Err(e) = self.handle_action(action).await {
                            debug!(error = %e, "Local action not applied");
                        }
                    }
                    None => actions_open = false,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        warn!(error = %e, "Failed to publish timeout");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        warn!(error = %e, "Failed to publish timeout");
                    }
                }
            }
        }

        updates.unsubscribe();
        Ok(self.into_report())
    }

    /// Turn time ran out but no timeout envelope has been committed yet
    fn forfeit_pending(&self) -> bool {
        self.timer.is_expired() && !self.engine.state().is_game_over
    }

    pub fn into_report(self) -> MatchReport {
        MatchReport {
            outcome: self.engine.state().outcome(),
            version: self.version(),
            payout: self.payout,
            cleanup: self.cleanup,
            final_state: self.engine.into_state(),
        }
    }

    async fn publish(&mut self, candidate: CardEngine, envelope: GameStateEnvelope) -> GameResult<()> {
        match self.channel.publish_state(&envelope).await {
            Ok(PublishOutcome::Published) => {
                debug!(version = envelope.version, last_move = ?envelope.last_move, "State committed");
                self.engine = candidate;
                self.current = Some(envelope);
                self.after_transition().await;
                Ok(())
            }
            Ok(PublishOutcome::Superseded(remote)) => {
                let err = GameProtocolError::StaleState {
                    local_version: envelope.parent_version,
                    remote_version: remote.version,
                };
                if remote.is_consistent() && remote.game_data.check_invariants().is_ok() {
                    self.adopt(remote).await;
                }
                self.sink.status(&err.user_message(), StatusLevel::Warning);
                Err(err)
            }
            Err(e) => {
                self.sink.status(&e.user_message(), StatusLevel::Error);
                Err(e)
            }
        }
    }

    async fn adopt(&mut self, envelope: GameStateEnvelope) {
        debug!(version = envelope.version, last_move = ?envelope.last_move, "Adopting remote state");
        if let Some(previous) = self.payout.take() {
            // the terminal state we settled on lost to a concurrent write
            warn!(payout = ?previous, "Settled state superseded, settlement reopened");
            if let Some(cleanup) = self.cleanup.take() {
                cleanup.abort();
            }
        }
        // an expiry observed on the replaced state no longer applies
        self.timer.rearm();
        self.engine.replace_state(envelope.game_data.clone());
        self.current = Some(envelope);
        self.after_transition().await;
    }

    async fn after_transition(&mut self) {
        let now = Instant::now();
        let state = self.engine.state();
        let playing = state.is_dealt() && !state.is_game_over;
        let active = active_role(state, self.local_role);
        if self.timer.sync(active, playing, now) == TimerChange::Unchanged && active && playing {
            self.timer.restart(now);
        }

        let view = self.view();
        self.sink.render(&view);

        if self.engine.state().is_game_over {
            self.finish().await;
        }
    }

    /// Settle exactly once and schedule cleanup
    async fn finish(&mut self) {
        if self.payout.is_some() {
            return;
        }
        self.timer.cancel();
        let (Some(outcome), Some(terminal)) = (self.engine.state().outcome(), self.current.clone())
        else {
            return;
        };
        info!(outcome = ?outcome, "Game over");
        self.sink.outcome(&outcome, self.local_role);

        let payout = self
            .escrow
            .settle(&self.session, &terminal, self.local_role)
            .await;
        self.sink.settlement(&payout);
        self.payout = Some(payout);
        self.cleanup = Some(self.escrow.schedule_cleanup(self.channel.clone()));
    }
}
