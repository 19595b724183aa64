//! Durak rule engine
//!
//! The engine owns a [`GameState`] and applies transitions to it. Every
//! operation validates first and mutates only when the move is legal, so a
//! refused move leaves the state untouched.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::cards::{beats, full_deck, sort_hand, Card, Rank};
use super::state::{
    AttackDefensePair, GamePhase, GameState, LastAction, Role, HAND_SIZE, MAX_BATTLE_PAIRS,
};
use crate::error::RuleViolation;

/// A move a participant can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerAction {
    Attack(Card),
    Defend(Card),
    Take,
    Beat,
    Pass,
}

/// What a pass by the attacker resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResolution {
    /// Every pair was covered and went to the beat pile
    Beaten,
    /// The defender was forced to pick up the table
    Taken,
}

#[derive(Debug, Clone, Default)]
pub struct CardEngine {
    state: GameState,
}

impl CardEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: GameState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn into_state(self) -> GameState {
        self.state
    }

    /// Replace the state wholesale with a replicated snapshot
    pub fn replace_state(&mut self, state: GameState) {
        self.state = state;
    }

    /// Shuffle a fresh deck, deal six cards each and fix the trump.
    ///
    /// Runs once per game, on the host only; the guest receives the result
    /// through replication.
    pub fn deal_initial<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), RuleViolation> {
        if self.state.is_dealt() {
            return Err(RuleViolation::AlreadyDealt);
        }

        let mut deck = full_deck();
        deck.shuffle(rng);

        let mut state = GameState {
            deck,
            ..GameState::default()
        };

        for _ in 0..HAND_SIZE {
            if let Some(card) = state.deck.pop() {
                state.hand_a.push(card);
            }
            if let Some(card) = state.deck.pop() {
                state.hand_b.push(card);
            }
        }

        // The bottom card stays in the deck and is drawn last
        let trump_card = state.deck.first().copied().ok_or(RuleViolation::NotDealt)?;
        state.trump_card = Some(trump_card);
        state.trump_suit = Some(trump_card.suit);

        sort_hand(&mut state.hand_a, state.trump_suit);
        sort_hand(&mut state.hand_b, state.trump_suit);

        self.state = state;
        Ok(())
    }

    /// Cards from `hand` that may be played in `phase` given the current table
    pub fn legal_moves(&self, hand: &[Card], phase: GamePhase) -> Vec<Card> {
        match phase {
            GamePhase::Attacking => {
                if self.state.battle_area.len() >= MAX_BATTLE_PAIRS {
                    return Vec::new();
                }
                if self.state.battle_area.is_empty() {
                    return hand.to_vec();
                }
                let ranks_on_table: HashSet<Rank> = self
                    .state
                    .battle_area
                    .iter()
                    .flat_map(|pair| pair.cards())
                    .map(|card| card.rank)
                    .collect();
                hand.iter()
                    .filter(|card| ranks_on_table.contains(&card.rank))
                    .copied()
                    .collect()
            }
            GamePhase::Defending => {
                let (Some(pair), Some(trump)) = (self.state.undefended_pair(), self.state.trump_suit)
                else {
                    return Vec::new();
                };
                hand.iter()
                    .filter(|card| beats(&pair.attack, card, trump))
                    .copied()
                    .collect()
            }
        }
    }

    /// Legal cards for `role` in the current phase, empty when `role` is not
    /// the one expected to play a card
    pub fn legal_moves_for(&self, role: Role) -> Vec<Card> {
        let expected = match self.state.game_phase {
            GamePhase::Attacking => self.state.attacker(),
            GamePhase::Defending => self.state.defender(),
        };
        if self.state.is_game_over || role != expected {
            return Vec::new();
        }
        self.legal_moves(self.state.hand(role), self.state.game_phase)
    }

    /// Dispatch a requested action on behalf of `actor`
    pub fn apply(&mut self, actor: Role, action: PlayerAction) -> Result<(), RuleViolation> {
        match action {
            PlayerAction::Attack(card) => self.play_attack(actor, card),
            PlayerAction::Defend(card) => self.play_defense(actor, card),
            PlayerAction::Take => self.take_cards(actor),
            PlayerAction::Beat => self.beat_cards(actor),
            PlayerAction::Pass => self.pass_attack(actor).map(|_| ()),
        }
    }

    pub fn play_attack(&mut self, actor: Role, card: Card) -> Result<(), RuleViolation> {
        self.ensure_in_play()?;
        self.ensure_actor(actor, self.state.attacker())?;
        self.ensure_phase(GamePhase::Attacking)?;
        if self.state.battle_area.len() >= MAX_BATTLE_PAIRS {
            return Err(RuleViolation::BattleAreaFull);
        }
        self.ensure_legal(actor, card)?;

        self.remove_from_hand(actor, card)?;
        self.state.battle_area.push(AttackDefensePair {
            attack: card,
            defense: None,
        });
        self.state.game_phase = GamePhase::Defending;
        self.check_terminal();
        Ok(())
    }

    pub fn play_defense(&mut self, actor: Role, card: Card) -> Result<(), RuleViolation> {
        self.ensure_in_play()?;
        self.ensure_actor(actor, self.state.defender())?;
        self.ensure_phase(GamePhase::Defending)?;
        self.ensure_legal(actor, card)?;

        self.remove_from_hand(actor, card)?;
        if let Some(pair) = self
            .state
            .battle_area
            .iter_mut()
            .find(|pair| !pair.is_defended())
        {
            pair.defense = Some(card);
        }

        if self.state.all_defended() {
            self.state.game_phase = GamePhase::Attacking;
        }
        self.check_terminal();
        Ok(())
    }

    /// Defender concedes and picks up every card on the table
    pub fn take_cards(&mut self, actor: Role) -> Result<(), RuleViolation> {
        self.ensure_in_play()?;
        self.ensure_actor(actor, self.state.defender())?;
        self.ensure_phase(GamePhase::Defending)?;
        if self.state.battle_area.is_empty() {
            return Err(RuleViolation::EmptyBattleArea);
        }

        self.pick_up_table();
        Ok(())
    }

    /// Discard a fully defended table; the defender becomes the attacker
    pub fn beat_cards(&mut self, actor: Role) -> Result<(), RuleViolation> {
        self.ensure_in_play()?;
        self.ensure_actor(actor, self.state.attacker())?;
        if self.state.battle_area.is_empty() {
            return Err(RuleViolation::EmptyBattleArea);
        }
        if !self.state.all_defended() {
            return Err(RuleViolation::UndefendedAttacks);
        }

        let pairs = std::mem::take(&mut self.state.battle_area);
        self.state
            .beat_pile
            .extend(pairs.iter().flat_map(|pair| pair.cards()));
        self.state.last_action = LastAction::Beat;
        self.state.current_turn = self.state.defender();
        self.state.game_phase = GamePhase::Attacking;
        self.refill();
        self.check_terminal();
        Ok(())
    }

    /// Attacker stops attacking: beats a covered table, otherwise makes the
    /// defender take it
    pub fn pass_attack(&mut self, actor: Role) -> Result<PassResolution, RuleViolation> {
        self.ensure_in_play()?;
        self.ensure_actor(actor, self.state.attacker())?;
        self.ensure_phase(GamePhase::Attacking)?;
        if self.state.battle_area.is_empty() {
            return Err(RuleViolation::EmptyBattleArea);
        }

        if self.state.all_defended() {
            self.beat_cards(actor)?;
            Ok(PassResolution::Beaten)
        } else {
            self.pick_up_table();
            Ok(PassResolution::Taken)
        }
    }

    /// Draw from the deck until both hands hold six cards or the deck runs
    /// out. The current attacker draws first.
    pub fn refill(&mut self) {
        let first = self.state.current_turn;
        for role in [first, first.opponent()] {
            while self.state.hand(role).len() < HAND_SIZE {
                let Some(card) = self.state.deck.pop() else {
                    break;
                };
                self.state.hand_mut(role).push(card);
            }
        }
        let trump = self.state.trump_suit;
        sort_hand(&mut self.state.hand_a, trump);
        sort_hand(&mut self.state.hand_b, trump);
    }

    /// End the game when the deck is gone and a hand is empty.
    ///
    /// Returns true when this call ended the game.
    pub fn check_terminal(&mut self) -> bool {
        if self.state.is_game_over || !self.state.is_dealt() || !self.state.deck.is_empty() {
            return false;
        }
        let winner = match (self.state.hand_a.is_empty(), self.state.hand_b.is_empty()) {
            (true, false) => Some(Role::A),
            (false, true) => Some(Role::B),
            // both out in the same exchange: draw
            (true, true) => None,
            (false, false) => return false,
        };
        self.state.is_game_over = true;
        self.state.winner = winner;
        true
    }

    /// `loser` ran out of time
    pub fn forfeit(&mut self, loser: Role) -> Result<(), RuleViolation> {
        self.ensure_in_play()?;
        self.state.is_game_over = true;
        self.state.timeout_loss = true;
        self.state.winner = Some(loser.opponent());
        Ok(())
    }

    fn pick_up_table(&mut self) {
        let defender = self.state.defender();
        let pairs = std::mem::take(&mut self.state.battle_area);
        let trump = self.state.trump_suit;
        let hand = self.state.hand_mut(defender);
        hand.extend(pairs.iter().flat_map(|pair| pair.cards()));
        sort_hand(hand, trump);

        self.state.last_action = LastAction::Take;
        self.state.game_phase = GamePhase::Attacking;
        self.refill();
        self.check_terminal();
    }

    fn ensure_in_play(&self) -> Result<(), RuleViolation> {
        if self.state.is_game_over {
            return Err(RuleViolation::GameOver);
        }
        if !self.state.is_dealt() {
            return Err(RuleViolation::NotDealt);
        }
        Ok(())
    }

    fn ensure_actor(&self, actor: Role, expected: Role) -> Result<(), RuleViolation> {
        if actor != expected {
            return Err(RuleViolation::OutOfTurn { expected, actual: actor });
        }
        Ok(())
    }

    fn ensure_phase(&self, expected: GamePhase) -> Result<(), RuleViolation> {
        if self.state.game_phase != expected {
            return Err(RuleViolation::WrongPhase {
                expected,
                actual: self.state.game_phase,
            });
        }
        Ok(())
    }

    fn ensure_legal(&self, actor: Role, card: Card) -> Result<(), RuleViolation> {
        let hand = self.state.hand(actor);
        if !hand.contains(&card) {
            return Err(RuleViolation::CardNotInHand(card.to_string()));
        }
        if !self.legal_moves(hand, self.state.game_phase).contains(&card) {
            return Err(RuleViolation::IllegalCard(card.to_string()));
        }
        Ok(())
    }

    fn remove_from_hand(&mut self, actor: Role, card: Card) -> Result<(), RuleViolation> {
        let hand = self.state.hand_mut(actor);
        let index = hand
            .iter()
            .position(|held| *held == card)
            .ok_or_else(|| RuleViolation::CardNotInHand(card.to_string()))?;
        hand.remove(index);
        Ok(())
    }
}
