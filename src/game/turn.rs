//! Turn authority: who must act next
//!
//! This is the only place that decides whether the local participant is
//! active. It looks at `game_phase`, `current_turn` and the local role and
//! nothing else.

use super::state::{GamePhase, GameState, Role};

/// Role expected to act next, or `None` once the game is over
pub fn acting_role(state: &GameState) -> Option<Role> {
    if state.is_game_over {
        return None;
    }
    Some(match state.game_phase {
        GamePhase::Attacking => state.current_turn,
        GamePhase::Defending => state.current_turn.opponent(),
    })
}

/// Whether `local_role` must act next
pub fn active_role(state: &GameState, local_role: Role) -> bool {
    acting_role(state) == Some(local_role)
}
