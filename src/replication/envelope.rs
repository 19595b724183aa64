//! Versioned game-state envelopes

use serde::{Deserialize, Serialize};

use crate::error::{utils::sha256_hex, GameResult};
use crate::game::{Card, GamePhase, GameState, Role};
use crate::identity::ParticipantId;

/// The move that produced an envelope's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MoveDescriptor {
    Init,
    Attack { card: Card },
    Defend { card: Card },
    Take,
    Beat,
    Pass,
    Timeout { winner: Role },
    GameOver { winner: Option<Role> },
}

impl MoveDescriptor {
    /// Whether this move closed the game
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MoveDescriptor::Timeout { .. } | MoveDescriptor::GameOver { .. }
        )
    }
}

/// Full-state snapshot replicated after every accepted move.
///
/// `version` grows by one per move and `parent_version` names the version the
/// move was applied to. `state_digest` is the SHA-256 of the serialized
/// `game_data`, which breaks ties between concurrent envelopes of equal
/// version: the lower digest wins on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateEnvelope {
    pub game_data: GameState,
    pub last_move: MoveDescriptor,
    pub sender: ParticipantId,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub current_turn: Role,
    pub game_phase: GamePhase,
    pub version: u64,
    pub parent_version: u64,
    pub state_digest: String,
}

impl GameStateEnvelope {
    /// Wrap `state` as the successor of `parent_version`
    pub fn new(
        state: GameState,
        last_move: MoveDescriptor,
        sender: ParticipantId,
        parent_version: u64,
    ) -> GameResult<Self> {
        let state_digest = Self::digest_of(&state)?;
        Ok(Self {
            current_turn: state.current_turn,
            game_phase: state.game_phase,
            game_data: state,
            last_move,
            sender,
            timestamp: chrono::Utc::now().timestamp_millis(),
            version: parent_version + 1,
            parent_version,
            state_digest,
        })
    }

    /// First envelope of a match, published by the host after dealing
    pub fn initial(state: GameState, sender: ParticipantId) -> GameResult<Self> {
        Self::new(state, MoveDescriptor::Init, sender, 0)
    }

    pub fn digest_of(state: &GameState) -> GameResult<String> {
        let bytes = serde_json::to_vec(state)?;
        Ok(sha256_hex(&bytes))
    }

    /// The denormalized fields agree with `game_data` and the digest matches
    pub fn is_consistent(&self) -> bool {
        self.current_turn == self.game_data.current_turn
            && self.game_phase == self.game_data.game_phase
            && self.version == self.parent_version + 1
            && Self::digest_of(&self.game_data)
                .map(|digest| digest == self.state_digest)
                .unwrap_or(false)
    }

    /// Total order used by both participants to pick the surviving state
    pub fn supersedes(&self, other: &GameStateEnvelope) -> bool {
        self.version > other.version
            || (self.version == other.version && self.state_digest < other.state_digest)
    }

    pub fn to_json(&self) -> GameResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(value: &str) -> GameResult<Self> {
        Ok(serde_json::from_str(value)?)
    }
}
