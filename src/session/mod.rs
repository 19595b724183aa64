//! Matchmaking sessions: game codes, create/join and deposit bookkeeping

use std::sync::Arc;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::DurakConfig;
use crate::error::{GameProtocolError, GameResult, NetworkError};
use crate::escrow::{EscrowAccount, EscrowCoordinator};
use crate::game::Role;
use crate::identity::ParticipantId;
use crate::replication::{BroadcastStore, ChannelEvent, ReplicationChannel, RetryPolicy};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts at finding an unused game code before giving up
const CODE_ATTEMPTS: usize = 5;

/// Replicated matchmaking record stored under `games/{code}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub code: String,
    pub host_id: ParticipantId,
    pub guest_id: Option<ParticipantId>,
    pub escrow_address: EscrowAccount,
    /// Custody program holding the escrow account
    pub custody_program: String,
    pub host_deposited: bool,
    pub guest_deposited: bool,
    pub game_started: bool,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

impl GameSession {
    pub fn new(
        code: String,
        host_id: ParticipantId,
        escrow_address: EscrowAccount,
        custody_program: String,
    ) -> Self {
        Self {
            code,
            host_id,
            guest_id: None,
            escrow_address,
            custody_program,
            host_deposited: false,
            guest_deposited: false,
            game_started: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.guest_id.is_some()
    }

    pub fn both_deposited(&self) -> bool {
        self.host_deposited && self.guest_deposited
    }

    /// Seat of `participant` in this session
    pub fn role_of(&self, participant: &ParticipantId) -> Option<Role> {
        if *participant == self.host_id {
            Some(Role::A)
        } else if self.guest_id.as_ref() == Some(participant) {
            Some(Role::B)
        } else {
            None
        }
    }

    pub fn participant(&self, role: Role) -> Option<&ParticipantId> {
        match role {
            Role::A => Some(&self.host_id),
            Role::B => self.guest_id.as_ref(),
        }
    }
}

/// Random code of `length` characters from `[A-Z0-9]`
pub fn generate_game_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Trim and uppercase user input, then check it is a well-formed code
pub fn normalize_game_code(input: &str, length: usize) -> GameResult<String> {
    let code = input.trim().to_uppercase();
    let pattern = Regex::new(&format!("^[A-Z0-9]{{{}}}$", length)).map_err(|e| {
        GameProtocolError::Configuration {
            message: format!("Invalid game code pattern: {}", e),
            field: "game.game_code_length".to_string(),
        }
    })?;
    if !pattern.is_match(&code) {
        return Err(GameProtocolError::Validation {
            message: format!("Game code must be {} letters or digits", length),
            field: Some("code".to_string()),
        });
    }
    Ok(code)
}

/// A session this process takes part in
#[derive(Clone)]
pub struct JoinedSession {
    pub session: GameSession,
    pub channel: ReplicationChannel,
    pub role: Role,
    pub local_id: ParticipantId,
}

/// Creates, joins and tears down matchmaking sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn BroadcastStore>,
    escrow: EscrowCoordinator,
    config: DurakConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn BroadcastStore>, escrow: EscrowCoordinator, config: DurakConfig) -> Self {
        Self {
            store,
            escrow,
            config,
        }
    }

    pub fn escrow(&self) -> &EscrowCoordinator {
        &self.escrow
    }

    fn channel(&self, code: &str, local_id: ParticipantId) -> ReplicationChannel {
        ReplicationChannel::new(
            Arc::clone(&self.store),
            code,
            local_id,
            RetryPolicy::from_config(&self.config.network),
        )
    }

    async fn unused_code(&self, local_id: &ParticipantId) -> GameResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_game_code(&mut rand::thread_rng(), self.config.game.game_code_length);
            if self
                .channel(&code, local_id.clone())
                .fetch_session()
                .await?
                .is_none()
            {
                return Ok(code);
            }
        }
        Err(GameProtocolError::Session(
            "Could not allocate a free game code".to_string(),
        ))
    }

    /// Open an escrow account, publish a new session and deposit the host's
    /// stake. On deposit failure the record is removed again.
    #[instrument(skip(self))]
    pub async fn create_game(&self) -> GameResult<JoinedSession> {
        let host = self.escrow.connect().await?;
        let code = self.unused_code(&host).await?;
        let channel = self.channel(&code, host.clone());

        let escrow_address = self.escrow.open_escrow(&code).await?;
        let mut session = GameSession::new(
            code.clone(),
            host.clone(),
            escrow_address,
            self.escrow.custody_program_id(),
        );
        channel.publish_session(&session).await?;
        info!(code = %code, host = %host.short(), "Game created");

        if let Err(e) = self.escrow.deposit(&session.escrow_address).await {
            warn!(code = %code, error = %e, "Host deposit failed, removing session");
            if let Err(cleanup) = channel.remove_all().await {
                warn!(code = %code, error = %cleanup, "Failed to remove abandoned session");
            }
            return Err(e);
        }

        session.host_deposited = true;
        channel.publish_session(&session).await?;

        Ok(JoinedSession {
            session,
            channel,
            role: Role::A,
            local_id: host,
        })
    }

    /// Take the guest seat of `code_input` and deposit the guest's stake. On
    /// deposit failure the seat is released again.
    #[instrument(skip(self))]
    pub async fn join_game(&self, code_input: &str) -> GameResult<JoinedSession> {
        let code = normalize_game_code(code_input, self.config.game.game_code_length)?;
        let guest = self.escrow.connect().await?;
        let channel = self.channel(&code, guest.clone());

        let mut session = channel
            .fetch_session()
            .await?
            .ok_or_else(|| GameProtocolError::Session(format!("Game {} not found", code)))?;

        if session.host_id == guest {
            return Err(GameProtocolError::Validation {
                message: "Cannot join your own game".to_string(),
                field: Some("code".to_string()),
            });
        }
        if session.guest_id.as_ref().is_some_and(|existing| *existing != guest) {
            return Err(GameProtocolError::Session(format!("Game {} is full", code)));
        }
        if session.custody_program != self.escrow.custody_program_id() {
            return Err(GameProtocolError::Validation {
                message: format!(
                    "Game uses custody program {}, expected {}",
                    session.custody_program,
                    self.escrow.custody_program_id()
                ),
                field: Some("custody_program".to_string()),
            });
        }

        session.guest_id = Some(guest.clone());
        channel.publish_session(&session).await?;
        info!(code = %code, guest = %guest.short(), "Joined game");

        if let Err(e) = self.escrow.deposit(&session.escrow_address).await {
            warn!(code = %code, error = %e, "Guest deposit failed, releasing seat");
            session.guest_id = None;
            session.guest_deposited = false;
            if let Err(rollback) = channel.publish_session(&session).await {
                warn!(code = %code, error = %rollback, "Failed to release seat");
            }
            return Err(e);
        }

        session.guest_deposited = true;
        channel.publish_session(&session).await?;

        Ok(JoinedSession {
            session,
            channel,
            role: Role::B,
            local_id: guest,
        })
    }

    /// Wait until both deposits are recorded on the session record
    pub async fn wait_for_opponent(&self, channel: &ReplicationChannel) -> GameResult<GameSession> {
        let mut updates = channel.subscribe_session().await?;
        loop {
            match updates.next().await {
                Some(ChannelEvent::Updated(session)) if session.both_deposited() => {
                    info!(code = %session.code, "Opponent deposited");
                    return Ok(session);
                }
                Some(ChannelEvent::Updated(_)) => {}
                Some(ChannelEvent::Removed) => {
                    return Err(GameProtocolError::Session(format!(
                        "Game {} was cancelled",
                        channel.code()
                    )))
                }
                None => {
                    return Err(NetworkError::SubscriptionClosed {
                        key: crate::replication::session_key(channel.code()),
                    }
                    .into())
                }
            }
        }
    }

    pub async fn mark_started(
        &self,
        channel: &ReplicationChannel,
        session: &mut GameSession,
    ) -> GameResult<()> {
        session.game_started = true;
        channel.publish_session(session).await
    }

    /// Abandon the session and delete both records
    pub async fn cancel(&self, channel: &ReplicationChannel) -> GameResult<()> {
        info!(code = %channel.code(), "Cancelling game");
        channel.remove_all().await
    }
}
