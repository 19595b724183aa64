//! Deposit gating, payout submission and session cleanup

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::{
    Amount, ClaimKind, CustodyProgram, EscrowAccount, PayoutClaim, TxSignature, WalletCapability,
};
use crate::config::{EscrowConfig, StakeConfig};
use crate::error::{GameProtocolError, GameResult, TransactionError};
use crate::game::{GameOutcome, Role};
use crate::identity::ParticipantId;
use crate::replication::{GameStateEnvelope, ReplicationChannel};
use crate::session::GameSession;

/// Wallets and custody programs may surface node errors as raw
/// [`TransactionError::Failed`] messages; map those onto their class
fn refine(error: TransactionError) -> TransactionError {
    match error {
        TransactionError::Failed { message } => {
            let classified = TransactionError::classify(&message);
            if classified.is_retryable() {
                warn!(error = %classified, "Transient transaction failure, not resubmitted");
            }
            classified
        }
        other => other,
    }
}

/// What settlement did on this side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    /// Local side won and the pot was released to it
    Paid { signature: TxSignature, amount: Amount },
    /// Drawn game; entry stakes returned to both sides
    Refunded { signature: TxSignature },
    /// Nothing to submit from this side
    NotClaimant,
    /// Claim submitted and refused, or confirmation timed out. Not retried.
    Failed(TransactionError),
}

#[derive(Clone)]
pub struct EscrowCoordinator {
    wallet: Arc<dyn WalletCapability>,
    custody: Arc<dyn CustodyProgram>,
    stakes: StakeConfig,
    config: EscrowConfig,
}

impl EscrowCoordinator {
    pub fn new(
        wallet: Arc<dyn WalletCapability>,
        custody: Arc<dyn CustodyProgram>,
        stakes: StakeConfig,
        config: EscrowConfig,
    ) -> Self {
        Self {
            wallet,
            custody,
            stakes,
            config,
        }
    }

    pub fn stakes(&self) -> &StakeConfig {
        &self.stakes
    }

    pub fn custody_program_id(&self) -> String {
        self.custody.program_id()
    }

    pub async fn connect(&self) -> GameResult<ParticipantId> {
        Ok(self.wallet.connect().await?)
    }

    pub async fn open_escrow(&self, code: &str) -> GameResult<EscrowAccount> {
        self.custody
            .open_escrow(code)
            .await
            .map_err(|e| GameProtocolError::from(e).with_context("open escrow"))
    }

    /// Transfer the local deposit into `escrow` and wait for confirmation
    #[instrument(skip(self, escrow), fields(escrow = %escrow))]
    pub async fn deposit(&self, escrow: &EscrowAccount) -> GameResult<TxSignature> {
        let required = self.stakes.deposit_amount();
        let available = self.wallet.balance().await?;
        if available < required {
            warn!(required = required, available = available, "Deposit refused");
            return Err(TransactionError::InsufficientFunds {
                required,
                available,
            }
            .into());
        }

        let signature = self
            .wallet
            .transfer(escrow, required)
            .await
            .map_err(|e| GameProtocolError::from(refine(e)).with_context("deposit"))?;
        self.confirm(Some(&signature), async {
            self.wallet.confirm(&signature).await.map_err(refine)
        })
        .await
        .map_err(|e| GameProtocolError::from(e).with_context("deposit"))?;

        info!(signature = %signature, amount = required, "Deposit confirmed");
        Ok(signature)
    }

    /// Both deposits must be recorded before the cards are dealt
    pub fn ensure_funded(&self, session: &GameSession) -> GameResult<()> {
        if session.host_deposited && session.guest_deposited {
            Ok(())
        } else {
            Err(GameProtocolError::Validation {
                message: "Both participants must deposit before the game starts".to_string(),
                field: Some("deposits".to_string()),
            })
        }
    }

    /// Submit the payout claim this side is entitled to, if any.
    ///
    /// Only the local winner claims; a draw is refunded by the host. The
    /// claim carries `terminal`, the envelope that closed the game. Call at
    /// most once per match.
    #[instrument(skip(self, session, terminal), fields(code = %session.code, version = terminal.version))]
    pub async fn settle(
        &self,
        session: &GameSession,
        terminal: &GameStateEnvelope,
        local_role: Role,
    ) -> PayoutOutcome {
        let Some(outcome) = terminal.game_data.outcome() else {
            return PayoutOutcome::Failed(TransactionError::InvalidClaim {
                reason: "game is not over".to_string(),
            });
        };
        let Some(guest) = session.guest_id.clone() else {
            return PayoutOutcome::Failed(TransactionError::InvalidClaim {
                reason: "session has no guest".to_string(),
            });
        };

        let kind = match outcome {
            GameOutcome::Winner(role) | GameOutcome::Forfeit { winner: role } => {
                if role != local_role {
                    info!("Opponent won, nothing to claim");
                    return PayoutOutcome::NotClaimant;
                }
                ClaimKind::Winner {
                    recipient: match local_role {
                        Role::A => session.host_id.clone(),
                        Role::B => guest.clone(),
                    },
                }
            }
            GameOutcome::Draw if local_role == Role::A => ClaimKind::Refund,
            GameOutcome::Draw => return PayoutOutcome::NotClaimant,
        };

        let claim = PayoutClaim {
            escrow: session.escrow_address.clone(),
            kind,
            host: session.host_id.clone(),
            guest,
            terminal: terminal.clone(),
        };

        match self
            .confirm(None, async { self.custody.release(&claim).await.map_err(refine) })
            .await
        {
            Ok(signature) => match claim.kind {
                ClaimKind::Winner { .. } => {
                    let amount = self.stakes.winner_payout();
                    info!(signature = %signature, amount = amount, "Payout released");
                    PayoutOutcome::Paid { signature, amount }
                }
                ClaimKind::Refund => {
                    info!(signature = %signature, "Draw refunded");
                    PayoutOutcome::Refunded { signature }
                }
            },
            Err(e) => {
                error!(error = %e, "Payout failed");
                PayoutOutcome::Failed(e)
            }
        }
    }

    /// Remove both session records after the configured delay. Best effort.
    pub fn schedule_cleanup(&self, channel: ReplicationChannel) -> JoinHandle<()> {
        let delay = self.config.cleanup_duration();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = channel.remove_all().await {
                warn!(code = %channel.code(), error = %e, "Session cleanup failed");
            }
        })
    }

    async fn confirm<T, F>(
        &self,
        signature: Option<&TxSignature>,
        pending: F,
    ) -> Result<T, TransactionError>
    where
        F: Future<Output = Result<T, TransactionError>>,
    {
        let timeout = self.config.confirmation_duration();
        match tokio::time::timeout(timeout, pending).await {
            Ok(result) => result,
            Err(_) => Err(TransactionError::ConfirmationTimeout {
                signature: signature.map(ToString::to_string),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
