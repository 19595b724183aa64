//! Stake custody and settlement
//!
//! Both participants deposit `entry_stake + house_fee` into an escrow account
//! owned by a custody program. At the end of the game the winner submits a
//! [`PayoutClaim`] carrying the terminal envelope; the program checks it
//! against the envelope replicated for that game and releases the pot at most
//! once per account.

pub mod coordinator;
pub mod ledger;

pub use coordinator::{EscrowCoordinator, PayoutOutcome};
pub use ledger::{LedgerWallet, LocalLedger};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::StakeConfig;
use crate::error::TransactionError;
use crate::game::{GameOutcome, Role};
use crate::identity::ParticipantId;
use crate::replication::{GameStateEnvelope, MoveDescriptor};

/// Base units (1 SOL = 1_000_000_000)
pub type Amount = u64;

/// Address of an escrow account held by the custody program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscrowAccount(String);

impl EscrowAccount {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EscrowAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction signature returned on submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxSignature(String);

impl TxSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant wallet: signs and submits transfers into escrow
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Connect and return the wallet's public address
    async fn connect(&self) -> Result<ParticipantId, TransactionError>;

    async fn balance(&self) -> Result<Amount, TransactionError>;

    /// Sign and submit a transfer; returns once the transaction is sent
    async fn transfer(
        &self,
        to: &EscrowAccount,
        amount: Amount,
    ) -> Result<TxSignature, TransactionError>;

    /// Wait until a submitted transaction is confirmed
    async fn confirm(&self, signature: &TxSignature) -> Result<(), TransactionError>;
}

/// Program-enforced custody of the stakes
#[async_trait]
pub trait CustodyProgram: Send + Sync {
    fn program_id(&self) -> String;

    async fn open_escrow(&self, code: &str) -> Result<EscrowAccount, TransactionError>;

    async fn balance(&self, escrow: &EscrowAccount) -> Result<Amount, TransactionError>;

    /// Verify `claim` and release the funds it names. Fails with
    /// [`TransactionError::AlreadyReleased`] on any second release.
    async fn release(&self, claim: &PayoutClaim) -> Result<TxSignature, TransactionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Pot to the winner
    Winner { recipient: ParticipantId },
    /// Drawn game: each side gets its entry stake back
    Refund,
}

/// Payout request carrying the terminal envelope it is justified by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutClaim {
    pub escrow: EscrowAccount,
    pub kind: ClaimKind,
    pub host: ParticipantId,
    pub guest: ParticipantId,
    pub terminal: GameStateEnvelope,
}

impl PayoutClaim {
    pub fn participant(&self, role: Role) -> &ParticipantId {
        match role {
            Role::A => &self.host,
            Role::B => &self.guest,
        }
    }
}

fn reject(reason: impl Into<String>) -> TransactionError {
    TransactionError::InvalidClaim {
        reason: reason.into(),
    }
}

/// Check a claim against the envelope replicated for its game and compute
/// the transfers it entitles. Custody implementations call this before moving
/// any funds.
///
/// The claimed envelope must be the replicated one, byte for byte by digest
/// and version. A card outcome must match what the cards show and be closed
/// by a `GameOver` move. A forfeit cannot be re-derived from the cards, so it
/// must be closed by a `Timeout` move published by the losing side itself.
pub fn verify_claim(
    claim: &PayoutClaim,
    replicated: &GameStateEnvelope,
    stakes: &StakeConfig,
) -> Result<Vec<(ParticipantId, Amount)>, TransactionError> {
    let terminal = &claim.terminal;
    if !terminal.is_consistent() {
        return Err(reject("terminal envelope does not match its digest"));
    }
    if terminal.version != replicated.version || terminal.state_digest != replicated.state_digest
    {
        return Err(reject("claim does not match the replicated game state"));
    }

    let state = &terminal.game_data;
    if !state.is_game_over {
        return Err(reject("game is not over"));
    }
    state.check_invariants().map_err(reject)?;

    let recorded = state
        .outcome()
        .ok_or_else(|| reject("terminal state has no outcome"))?;
    match recorded {
        GameOutcome::Forfeit { winner } => {
            if terminal.last_move != (MoveDescriptor::Timeout { winner }) {
                return Err(reject("forfeit was not closed by a timeout"));
            }
            if terminal.sender != *claim.participant(winner.opponent()) {
                return Err(reject("timeout was not published by the losing side"));
            }
        }
        GameOutcome::Winner(_) | GameOutcome::Draw => {
            if state.derive_terminal_outcome() != Some(recorded) {
                return Err(reject("recorded outcome does not match the cards"));
            }
            if terminal.last_move != (MoveDescriptor::GameOver { winner: state.winner }) {
                return Err(reject("game was not closed by its final move"));
            }
        }
    }

    match (&claim.kind, recorded) {
        (ClaimKind::Winner { recipient }, GameOutcome::Winner(role))
        | (ClaimKind::Winner { recipient }, GameOutcome::Forfeit { winner: role }) => {
            if recipient != claim.participant(role) {
                return Err(reject("recipient is not the winner"));
            }
            Ok(vec![(recipient.clone(), stakes.winner_payout())])
        }
        (ClaimKind::Refund, GameOutcome::Draw) => Ok(vec![
            (claim.host.clone(), stakes.entry_stake),
            (claim.guest.clone(), stakes.entry_stake),
        ]),
        (ClaimKind::Winner { .. }, GameOutcome::Draw) => Err(reject("drawn game has no winner")),
        (ClaimKind::Refund, _) => Err(reject("refund requested for a decided game")),
    }
}
