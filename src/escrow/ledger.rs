//! In-process ledger implementing both wallet and custody
//!
//! Balances, escrow accounts and release flags live in one shared structure so
//! two participants in the same process see a single source of truth. Claims
//! are checked against the game-state envelope the ledger reads from the
//! broadcast store itself, never against the claimant's copy alone. Used by
//! tests and the local demo.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    verify_claim, Amount, CustodyProgram, EscrowAccount, PayoutClaim, TxSignature,
    WalletCapability,
};
use crate::config::StakeConfig;
use crate::error::TransactionError;
use crate::identity::ParticipantId;
use crate::replication::{state_key, BroadcastStore, GameStateEnvelope};

#[derive(Debug, Default)]
struct EscrowRecord {
    code: String,
    balance: Amount,
    depositors: HashSet<ParticipantId>,
    released: bool,
}

#[derive(Debug, Default)]
struct LedgerInner {
    balances: HashMap<ParticipantId, Amount>,
    escrows: HashMap<EscrowAccount, EscrowRecord>,
    confirmed: HashSet<TxSignature>,
    injected_failures: VecDeque<TransactionError>,
    confirmation_delay: Duration,
}

/// Shared ledger handle; clones see the same state
#[derive(Clone)]
pub struct LocalLedger {
    inner: Arc<Mutex<LedgerInner>>,
    stakes: StakeConfig,
    program_id: String,
    replicated: Arc<dyn BroadcastStore>,
}

impl fmt::Debug for LocalLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLedger")
            .field("program_id", &self.program_id)
            .field("stakes", &self.stakes)
            .finish_non_exhaustive()
    }
}

fn new_signature() -> TxSignature {
    TxSignature::new(Uuid::new_v4().simple().to_string())
}

impl LocalLedger {
    /// Ledger verifying claims against the envelopes replicated in `replicated`
    pub fn new(
        stakes: StakeConfig,
        program_id: impl Into<String>,
        replicated: Arc<dyn BroadcastStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerInner::default())),
            stakes,
            program_id: program_id.into(),
            replicated,
        }
    }

    /// Credit `amount` to `owner`
    pub async fn fund(&self, owner: &ParticipantId, amount: Amount) {
        let mut inner = self.inner.lock().await;
        *inner.balances.entry(owner.clone()).or_default() += amount;
    }

    pub async fn balance_of(&self, owner: &ParticipantId) -> Amount {
        self.inner
            .lock()
            .await
            .balances
            .get(owner)
            .copied()
            .unwrap_or(0)
    }

    pub async fn escrow_balance(&self, escrow: &EscrowAccount) -> Option<Amount> {
        self.inner
            .lock()
            .await
            .escrows
            .get(escrow)
            .map(|record| record.balance)
    }

    pub async fn is_released(&self, escrow: &EscrowAccount) -> bool {
        self.inner
            .lock()
            .await
            .escrows
            .get(escrow)
            .is_some_and(|record| record.released)
    }

    /// Make the next wallet transfer fail with `error`
    pub async fn fail_next_transfer(&self, error: TransactionError) {
        self.inner.lock().await.injected_failures.push_back(error);
    }

    /// Delay every confirmation by `delay`
    pub async fn set_confirmation_delay(&self, delay: Duration) {
        self.inner.lock().await.confirmation_delay = delay;
    }

    /// Wallet handle for `owner` backed by this ledger
    pub fn wallet(&self, owner: ParticipantId) -> LedgerWallet {
        LedgerWallet {
            ledger: self.clone(),
            owner,
        }
    }

    /// Random participant address
    pub fn new_address() -> ParticipantId {
        ParticipantId::new(Uuid::new_v4().simple().to_string())
    }

    /// Latest envelope replicated for game `code`
    async fn replicated_state(&self, code: &str) -> Result<GameStateEnvelope, TransactionError> {
        let value = self
            .replicated
            .get(&state_key(code))
            .await
            .map_err(|e| TransactionError::Failed {
                message: format!("cannot read game state: {}", e),
            })?
            .ok_or_else(|| TransactionError::InvalidClaim {
                reason: "no replicated game state".to_string(),
            })?;
        GameStateEnvelope::from_json(&value).map_err(|e| TransactionError::InvalidClaim {
            reason: format!("replicated game state unreadable: {}", e),
        })
    }
}

#[async_trait]
impl CustodyProgram for LocalLedger {
    fn program_id(&self) -> String {
        self.program_id.clone()
    }

    async fn open_escrow(&self, code: &str) -> Result<EscrowAccount, TransactionError> {
        let account = EscrowAccount::new(format!("escrow-{}", Uuid::new_v4().simple()));
        self.inner.lock().await.escrows.insert(
            account.clone(),
            EscrowRecord {
                code: code.to_string(),
                ..EscrowRecord::default()
            },
        );
        debug!(escrow = %account, code = %code, "Escrow account opened");
        Ok(account)
    }

    async fn balance(&self, escrow: &EscrowAccount) -> Result<Amount, TransactionError> {
        self.escrow_balance(escrow)
            .await
            .ok_or_else(|| TransactionError::Failed {
                message: format!("unknown escrow account {}", escrow),
            })
    }

    async fn release(&self, claim: &PayoutClaim) -> Result<TxSignature, TransactionError> {
        let code = self
            .inner
            .lock()
            .await
            .escrows
            .get(&claim.escrow)
            .map(|record| record.code.clone())
            .ok_or_else(|| TransactionError::Failed {
                message: format!("unknown escrow account {}", claim.escrow),
            })?;
        let replicated = self.replicated_state(&code).await?;

        let mut inner = self.inner.lock().await;
        let record = inner
            .escrows
            .get(&claim.escrow)
            .ok_or_else(|| TransactionError::Failed {
                message: format!("unknown escrow account {}", claim.escrow),
            })?;

        if record.released {
            warn!(escrow = %claim.escrow, "Rejected second release");
            return Err(TransactionError::AlreadyReleased {
                escrow: claim.escrow.to_string(),
            });
        }
        for participant in [&claim.host, &claim.guest] {
            if !record.depositors.contains(participant) {
                return Err(TransactionError::InvalidClaim {
                    reason: format!("{} never deposited", participant.short()),
                });
            }
        }

        let payouts = verify_claim(claim, &replicated, &self.stakes)?;
        let total: Amount = payouts.iter().map(|(_, amount)| amount).sum();
        if total > record.balance {
            return Err(TransactionError::InsufficientFunds {
                required: total,
                available: record.balance,
            });
        }
        if let Some(record) = inner.escrows.get_mut(&claim.escrow) {
            record.balance -= total;
            record.released = true;
        }
        for (recipient, amount) in payouts {
            *inner.balances.entry(recipient).or_default() += amount;
        }

        let signature = new_signature();
        inner.confirmed.insert(signature.clone());
        info!(escrow = %claim.escrow, code = %code, total = total, "Escrow released");
        Ok(signature)
    }
}

/// Wallet of one participant on a [`LocalLedger`]
#[derive(Debug, Clone)]
pub struct LedgerWallet {
    ledger: LocalLedger,
    owner: ParticipantId,
}

impl LedgerWallet {
    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }
}

#[async_trait]
impl WalletCapability for LedgerWallet {
    async fn connect(&self) -> Result<ParticipantId, TransactionError> {
        Ok(self.owner.clone())
    }

    async fn balance(&self) -> Result<Amount, TransactionError> {
        Ok(self.ledger.balance_of(&self.owner).await)
    }

    async fn transfer(
        &self,
        to: &EscrowAccount,
        amount: Amount,
    ) -> Result<TxSignature, TransactionError> {
        let mut inner = self.ledger.inner.lock().await;
        if let Some(error) = inner.injected_failures.pop_front() {
            return Err(error);
        }

        let available = inner.balances.get(&self.owner).copied().unwrap_or(0);
        if available < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        if !inner.escrows.contains_key(to) {
            return Err(TransactionError::Failed {
                message: format!("unknown escrow account {}", to),
            });
        }

        inner.balances.insert(self.owner.clone(), available - amount);
        if let Some(record) = inner.escrows.get_mut(to) {
            record.balance += amount;
            record.depositors.insert(self.owner.clone());
        }

        let signature = new_signature();
        inner.confirmed.insert(signature.clone());
        debug!(from = %self.owner.short(), to = %to, amount = amount, "Transfer submitted");
        Ok(signature)
    }

    async fn confirm(&self, signature: &TxSignature) -> Result<(), TransactionError> {
        let (delay, known) = {
            let inner = self.ledger.inner.lock().await;
            (inner.confirmation_delay, inner.confirmed.contains(signature))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if known {
            Ok(())
        } else {
            Err(TransactionError::Failed {
                message: format!("unknown signature {}", signature),
            })
        }
    }
}
