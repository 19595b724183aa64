//! Local perspective on the table and the presentation seam

use std::time::Duration;

use tracing::{info, warn};

use crate::escrow::PayoutOutcome;
use crate::game::{
    active_role, AttackDefensePair, Card, CardEngine, GameOutcome, GamePhase, Role, Suit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandCard {
    pub card: Card,
    pub playable: bool,
}

/// Which action buttons the local side may press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllowedButtons {
    pub take: bool,
    pub beat: bool,
    pub pass: bool,
}

/// Everything a renderer needs, seen from `local_role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub local_role: Role,
    pub hand: Vec<HandCard>,
    pub opponent_card_count: usize,
    pub battle_area: Vec<AttackDefensePair>,
    pub trump_card: Option<Card>,
    pub trump_suit: Option<Suit>,
    pub deck_size: usize,
    pub beat_pile_size: usize,
    pub phase: GamePhase,
    pub is_active: bool,
    pub buttons: AllowedButtons,
    pub status: String,
    pub outcome: Option<GameOutcome>,
}

impl TableView {
    pub fn new(engine: &CardEngine, local_role: Role) -> Self {
        let state = engine.state();
        let is_active = active_role(state, local_role);
        let playable = engine.legal_moves_for(local_role);

        let hand = state
            .hand(local_role)
            .iter()
            .map(|card| HandCard {
                card: *card,
                playable: is_active && playable.contains(card),
            })
            .collect();

        let covered_table = !state.battle_area.is_empty() && state.all_defended();
        let attacking = is_active && state.game_phase == GamePhase::Attacking;
        let buttons = AllowedButtons {
            take: is_active && state.game_phase == GamePhase::Defending,
            beat: attacking && covered_table,
            pass: attacking && covered_table,
        };

        Self {
            local_role,
            hand,
            opponent_card_count: state.hand(local_role.opponent()).len(),
            battle_area: state.battle_area.clone(),
            trump_card: state.trump_card,
            trump_suit: state.trump_suit,
            deck_size: state.deck.len(),
            beat_pile_size: state.beat_pile.len(),
            phase: state.game_phase,
            is_active,
            buttons,
            status: status_text(engine, local_role, is_active),
            outcome: state.outcome(),
        }
    }

    pub fn playable_cards(&self) -> Vec<Card> {
        self.hand
            .iter()
            .filter(|hand_card| hand_card.playable)
            .map(|hand_card| hand_card.card)
            .collect()
    }
}

fn status_text(engine: &CardEngine, local_role: Role, is_active: bool) -> String {
    let state = engine.state();
    if let Some(outcome) = state.outcome() {
        return outcome_text(&outcome, local_role).to_string();
    }
    if !state.is_dealt() {
        return "Waiting for the deal".to_string();
    }
    if !is_active {
        return "Opponent's turn".to_string();
    }
    match state.game_phase {
        GamePhase::Defending => "Your turn - Defend or take".to_string(),
        GamePhase::Attacking if state.battle_area.is_empty() => "Your turn - Attack!".to_string(),
        GamePhase::Attacking => "Your turn - Add a card or beat".to_string(),
    }
}

/// Final message for `outcome` from the point of view of `local_role`
pub fn outcome_text(outcome: &GameOutcome, local_role: Role) -> &'static str {
    match outcome {
        GameOutcome::Winner(role) if *role == local_role => "You won!",
        GameOutcome::Winner(_) => "You lost",
        GameOutcome::Forfeit { winner } if *winner == local_role => "Opponent ran out of time - you won!",
        GameOutcome::Forfeit { .. } => "Time's up - you lost",
        GameOutcome::Draw => "Draw - stakes refunded",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Output side of a participant's UI
pub trait PresentationSink: Send {
    fn render(&mut self, view: &TableView);

    fn status(&mut self, message: &str, level: StatusLevel);

    fn outcome(&mut self, outcome: &GameOutcome, local_role: Role);

    fn settlement(&mut self, result: &PayoutOutcome);

    /// Per-second countdown while the local timer runs
    fn timer(&mut self, _remaining: Duration) {}
}

/// Sink that writes everything to the log
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    pub label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl PresentationSink for LogSink {
    fn render(&mut self, view: &TableView) {
        let hand: Vec<String> = view.hand.iter().map(|h| h.card.to_string()).collect();
        let table: Vec<String> = view
            .battle_area
            .iter()
            .map(|pair| match pair.defense {
                Some(defense) => format!("{}/{}", pair.attack, defense),
                None => pair.attack.to_string(),
            })
            .collect();
        info!(
            who = %self.label,
            hand = %hand.join(" "),
            table = %table.join(" "),
            deck = view.deck_size,
            opponent = view.opponent_card_count,
            status = %view.status,
            "Table"
        );
    }

    fn status(&mut self, message: &str, level: StatusLevel) {
        match level {
            StatusLevel::Info => info!(who = %self.label, "{}", message),
            StatusLevel::Warning | StatusLevel::Error => warn!(who = %self.label, "{}", message),
        }
    }

    fn outcome(&mut self, outcome: &GameOutcome, local_role: Role) {
        info!(who = %self.label, "{}", outcome_text(outcome, local_role));
    }

    fn settlement(&mut self, result: &PayoutOutcome) {
        match result {
            PayoutOutcome::Paid { amount, signature } => {
                info!(who = %self.label, amount = *amount, signature = %signature, "Winnings received")
            }
            PayoutOutcome::Refunded { signature } => {
                info!(who = %self.label, signature = %signature, "Stakes refunded")
            }
            PayoutOutcome::NotClaimant => {}
            PayoutOutcome::Failed(e) => warn!(who = %self.label, "{}", e.user_message()),
        }
    }
}
