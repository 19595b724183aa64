//! Replicated game state and its invariants

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::cards::{Card, Suit, DECK_SIZE};

/// Maximum hand size after a refill, and maximum number of pairs on the table
pub const HAND_SIZE: usize = 6;
pub const MAX_BATTLE_PAIRS: usize = 6;

/// Seat of a participant. The host is always `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    A,
    B,
}

impl Role {
    pub fn opponent(&self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::A => write!(f, "Player 1"),
            Role::B => write!(f, "Player 2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    Attacking,
    Defending,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamePhase::Attacking => write!(f, "attacking"),
            GamePhase::Defending => write!(f, "defending"),
        }
    }
}

/// Last table-clearing action; decides who draws first on refill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LastAction {
    #[default]
    None,
    Beat,
    Take,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackDefensePair {
    pub attack: Card,
    pub defense: Option<Card>,
}

impl AttackDefensePair {
    pub fn is_defended(&self) -> bool {
        self.defense.is_some()
    }

    pub fn cards(&self) -> impl Iterator<Item = Card> + '_ {
        std::iter::once(self.attack).chain(self.defense)
    }
}

/// How a finished game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    /// Winner emptied their hand with the deck exhausted
    Winner(Role),
    /// The opponent of `winner` ran out of time
    Forfeit { winner: Role },
    /// Both hands emptied in the same exchange
    Draw,
}

impl GameOutcome {
    pub fn winner(&self) -> Option<Role> {
        match self {
            GameOutcome::Winner(role) => Some(*role),
            GameOutcome::Forfeit { winner } => Some(*winner),
            GameOutcome::Draw => None,
        }
    }
}

/// Full game state. Owned by a single [`CardEngine`](super::CardEngine) per
/// process and replaced wholesale when a newer remote snapshot arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Bottom of the deck is index 0; cards are drawn from the end
    pub deck: Vec<Card>,
    pub hand_a: Vec<Card>,
    pub hand_b: Vec<Card>,
    pub trump_suit: Option<Suit>,
    pub trump_card: Option<Card>,
    pub battle_area: Vec<AttackDefensePair>,
    pub beat_pile: Vec<Card>,
    pub current_turn: Role,
    pub game_phase: GamePhase,
    pub last_action: LastAction,
    pub is_game_over: bool,
    pub winner: Option<Role>,
    pub timeout_loss: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            deck: Vec::new(),
            hand_a: Vec::new(),
            hand_b: Vec::new(),
            trump_suit: None,
            trump_card: None,
            battle_area: Vec::new(),
            beat_pile: Vec::new(),
            current_turn: Role::A,
            game_phase: GamePhase::Attacking,
            last_action: LastAction::None,
            is_game_over: false,
            winner: None,
            timeout_loss: false,
        }
    }
}

impl GameState {
    pub fn is_dealt(&self) -> bool {
        self.trump_suit.is_some()
    }

    pub fn attacker(&self) -> Role {
        self.current_turn
    }

    pub fn defender(&self) -> Role {
        self.current_turn.opponent()
    }

    pub fn hand(&self, role: Role) -> &[Card] {
        match role {
            Role::A => &self.hand_a,
            Role::B => &self.hand_b,
        }
    }

    pub fn hand_mut(&mut self, role: Role) -> &mut Vec<Card> {
        match role {
            Role::A => &mut self.hand_a,
            Role::B => &mut self.hand_b,
        }
    }

    /// The single pair still waiting for a defense, if any
    pub fn undefended_pair(&self) -> Option<&AttackDefensePair> {
        self.battle_area.iter().find(|pair| !pair.is_defended())
    }

    pub fn all_defended(&self) -> bool {
        self.battle_area.iter().all(AttackDefensePair::is_defended)
    }

    /// Number of cards currently lying in the battle area
    pub fn battle_card_count(&self) -> usize {
        self.battle_area
            .iter()
            .map(|pair| if pair.is_defended() { 2 } else { 1 })
            .sum()
    }

    /// Total cards accounted for across deck, hands, table and beat pile
    pub fn card_count(&self) -> usize {
        self.deck.len()
            + self.hand_a.len()
            + self.hand_b.len()
            + self.battle_card_count()
            + self.beat_pile.len()
    }

    /// How the game ended, once it has
    pub fn outcome(&self) -> Option<GameOutcome> {
        if !self.is_game_over {
            return None;
        }
        Some(match (self.winner, self.timeout_loss) {
            (Some(winner), true) => GameOutcome::Forfeit { winner },
            (Some(winner), false) => GameOutcome::Winner(winner),
            (None, _) => GameOutcome::Draw,
        })
    }

    /// Re-derive the outcome from the cards alone. Used by custody to check a
    /// payout claim without trusting the claimant's `winner` field.
    pub fn derive_terminal_outcome(&self) -> Option<GameOutcome> {
        if !self.deck.is_empty() {
            return None;
        }
        match (self.hand_a.is_empty(), self.hand_b.is_empty()) {
            (true, false) => Some(GameOutcome::Winner(Role::A)),
            (false, true) => Some(GameOutcome::Winner(Role::B)),
            (true, true) => Some(GameOutcome::Draw),
            (false, false) => None,
        }
    }

    /// Check the structural invariants of a dealt state
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.is_dealt() {
            return Ok(());
        }

        let count = self.card_count();
        if count != DECK_SIZE {
            return Err(format!("card count is {}, expected {}", count, DECK_SIZE));
        }

        let mut seen = HashSet::with_capacity(DECK_SIZE);
        let all_cards = self
            .deck
            .iter()
            .chain(&self.hand_a)
            .chain(&self.hand_b)
            .chain(&self.beat_pile)
            .copied()
            .chain(self.battle_area.iter().flat_map(|pair| pair.cards()));
        for card in all_cards {
            if !seen.insert(card) {
                return Err(format!("duplicate card {}", card));
            }
        }

        let undefended = self
            .battle_area
            .iter()
            .filter(|pair| !pair.is_defended())
            .count();
        if undefended > 1 {
            return Err(format!("{} undefended pairs in battle area", undefended));
        }

        if self.battle_area.len() > MAX_BATTLE_PAIRS {
            return Err(format!("{} pairs in battle area", self.battle_area.len()));
        }

        if self.game_phase == GamePhase::Defending && undefended == 0 {
            return Err("defending phase without an undefended attack".to_string());
        }

        if let (Some(trump_card), Some(trump_suit)) = (self.trump_card, self.trump_suit) {
            if trump_card.suit != trump_suit {
                return Err("trump card does not match trump suit".to_string());
            }
        }

        Ok(())
    }
}
