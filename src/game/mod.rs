//! Durak rules: cards, state, engine and turn authority

pub mod cards;
pub mod engine;
pub mod state;
pub mod turn;

pub use cards::{beats, Card, Rank, Suit, DECK_SIZE};
pub use engine::{CardEngine, PassResolution, PlayerAction};
pub use state::{AttackDefensePair, GameOutcome, GamePhase, GameState, LastAction, Role};
pub use turn::{active_role, acting_role};
