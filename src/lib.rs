//! Durak - two-party staked card game over a shared broadcast store
//!
//! Two participants play the Russian card game Durak for stakes held in
//! escrow:
//! - A deterministic rule engine owns the game state; every move is validated
//!   before anything changes
//! - Full-state snapshots are replicated through a keyed broadcast store
//!   (Nostr relays or in-process) with optimistic versioning
//! - A per-turn timer forfeits a participant who stops playing
//! - Deposits and the payout go through a custody program that checks the
//!   terminal state and releases at most once

pub mod client;
pub mod config;
pub mod error;
pub mod escrow;
pub mod game;
pub mod identity;
pub mod replication;
pub mod session;

// Re-export commonly used types for convenience
pub use error::{GameProtocolError, GameResult, NetworkError, RuleViolation, TransactionError};

// Re-export core game types
pub use game::{
    active_role, beats, Card, CardEngine, GameOutcome, GamePhase, GameState, PlayerAction, Rank,
    Role, Suit,
};

// Re-export replication interfaces
pub use replication::{
    BroadcastStore, GameStateEnvelope, InMemoryStore, MoveDescriptor, NostrStore,
    ReplicationChannel,
};

// Re-export session, escrow and client interfaces
pub use client::{MatchController, MatchReport, PresentationSink, TableView, TurnTimer};
pub use escrow::{CustodyProgram, EscrowCoordinator, LocalLedger, PayoutOutcome, WalletCapability};
pub use identity::ParticipantId;
pub use session::{GameSession, JoinedSession, SessionManager};

// Re-export configuration interfaces
pub use config::{DurakConfig, EscrowConfig, GameConfig, NetworkConfig, StakeConfig};

// Re-export external dependencies for user convenience
pub use nostr::Keys;
