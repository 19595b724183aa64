//! Error types for the Durak escrow protocol

use thiserror::Error;

use crate::game::{GamePhase, Role};

/// Main error type for the Durak protocol
#[derive(Debug, Clone, Error)]
pub enum GameProtocolError {
    #[error("Network error: {source}")]
    Network {
        source: NetworkError,
        context: String,
    },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Illegal move: {0}")]
    Rule(#[from] RuleViolation),

    #[error("Transaction error: {source}")]
    Transaction {
        source: TransactionError,
        context: String,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: String,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Stale state: local version {local_version} is behind remote version {remote_version}")]
    StaleState {
        local_version: u64,
        remote_version: u64,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Nostr error: {0}")]
    Nostr(String),

    #[error("Nostr SDK error: {0}")]
    NostrSdk(String),
}

/// Network-specific error types
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Publish failed for key {key}: {message}")]
    PublishFailed { key: String, message: String },

    #[error("Subscription closed for key {key}")]
    SubscriptionClosed { key: String },
}

/// Reasons a card engine operation is refused. None of them mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("the game is already over")]
    GameOver,

    #[error("cards have not been dealt yet")]
    NotDealt,

    #[error("cards have already been dealt")]
    AlreadyDealt,

    #[error("it's not your turn: {expected} must act")]
    OutOfTurn { expected: Role, actual: Role },

    #[error("wrong phase: expected {expected}, game is {actual}")]
    WrongPhase {
        expected: GamePhase,
        actual: GamePhase,
    },

    #[error("card {0} is not in hand")]
    CardNotInHand(String),

    #[error("invalid card selection: {0}")]
    IllegalCard(String),

    #[error("battle area is full")]
    BattleAreaFull,

    #[error("battle area is empty")]
    EmptyBattleArea,

    #[error("not every attack has been defended")]
    UndefendedAttacks,

    #[error("turn time has expired")]
    TurnExpired,
}

/// Deposit and payout failures, each with a distinct user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("signing rejected by user")]
    UserRejected,

    #[error("stale reference: {message}")]
    StaleReference { message: String },

    #[error("confirmation timed out after {timeout_ms}ms")]
    ConfirmationTimeout {
        signature: Option<String>,
        timeout_ms: u64,
    },

    #[error("escrow {escrow} has already been released")]
    AlreadyReleased { escrow: String },

    #[error("payout claim rejected: {reason}")]
    InvalidClaim { reason: String },

    #[error("transaction failed: {message}")]
    Failed { message: String },
}

impl TransactionError {
    /// Map a raw wallet or node error message onto a transaction error class
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
            TransactionError::InsufficientFunds {
                required: 0,
                available: 0,
            }
        } else if lower.contains("user rejected") {
            TransactionError::UserRejected
        } else if lower.contains("blockhash not found") || lower.contains("already been processed") {
            TransactionError::StaleReference {
                message: message.to_string(),
            }
        } else if lower.contains("confirmation timeout") {
            TransactionError::ConfirmationTimeout {
                signature: None,
                timeout_ms: 0,
            }
        } else {
            TransactionError::Failed {
                message: message.to_string(),
            }
        }
    }

    /// Message shown to the participant
    pub fn user_message(&self) -> String {
        match self {
            TransactionError::InsufficientFunds { .. } => "Insufficient balance".to_string(),
            TransactionError::UserRejected => "Transaction cancelled by user".to_string(),
            TransactionError::StaleReference { .. } => {
                "Network congestion. Please try again.".to_string()
            }
            TransactionError::ConfirmationTimeout { .. } => {
                "Transaction sent but confirmation timed out - check explorer".to_string()
            }
            TransactionError::AlreadyReleased { .. } => {
                "Escrow has already been paid out".to_string()
            }
            TransactionError::InvalidClaim { reason } => format!("Payout refused: {}", reason),
            TransactionError::Failed { message } => format!("Transaction failed: {}", message),
        }
    }

    /// Whether resubmitting the same transaction can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::StaleReference { .. })
    }
}

impl From<nostr::event::builder::Error> for GameProtocolError {
    fn from(err: nostr::event::builder::Error) -> Self {
        GameProtocolError::Nostr(err.to_string())
    }
}

impl From<nostr::key::Error> for GameProtocolError {
    fn from(err: nostr::key::Error) -> Self {
        GameProtocolError::Nostr(err.to_string())
    }
}

impl From<nostr_sdk::client::Error> for GameProtocolError {
    fn from(err: nostr_sdk::client::Error) -> Self {
        GameProtocolError::NostrSdk(err.to_string())
    }
}

impl From<NetworkError> for GameProtocolError {
    fn from(err: NetworkError) -> Self {
        GameProtocolError::Network {
            source: err,
            context: String::new(),
        }
    }
}

impl From<TransactionError> for GameProtocolError {
    fn from(err: TransactionError) -> Self {
        GameProtocolError::Transaction {
            source: err,
            context: String::new(),
        }
    }
}

impl From<serde_json::Error> for GameProtocolError {
    fn from(err: serde_json::Error) -> Self {
        GameProtocolError::Serialization {
            message: err.to_string(),
        }
    }
}

impl GameProtocolError {
    /// Attach context to network and transaction errors
    pub fn with_context(self, ctx: &str) -> Self {
        match self {
            GameProtocolError::Network { source, .. } => GameProtocolError::Network {
                source,
                context: ctx.to_string(),
            },
            GameProtocolError::Transaction { source, .. } => GameProtocolError::Transaction {
                source,
                context: ctx.to_string(),
            },
            other => other,
        }
    }

    /// Text suitable for the presentation sink's status line
    pub fn user_message(&self) -> String {
        match self {
            GameProtocolError::Rule(violation) => match violation {
                RuleViolation::OutOfTurn { .. } => "It's not your turn".to_string(),
                RuleViolation::IllegalCard(_) | RuleViolation::CardNotInHand(_) => {
                    "Invalid card selection".to_string()
                }
                RuleViolation::TurnExpired => "Time is up - forfeiting".to_string(),
                other => other.to_string(),
            },
            GameProtocolError::Transaction { source, .. } => source.user_message(),
            GameProtocolError::StaleState { .. } => {
                "Opponent moved first - board updated, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Utility functions for state digests
pub mod utils {
    use sha2::{Digest, Sha256};

    /// Compute SHA256 hash of input data
    pub fn sha256(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// Compute SHA256 hash and return as hex string
    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(sha256(data))
    }
}

/// Type alias for the main result type used throughout the library
pub type GameResult<T> = Result<T, GameProtocolError>;

/// Logging configuration and initialization
pub mod logging {
    use std::env;
    use tracing::Level;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    /// Logging output format
    #[derive(Debug, Clone)]
    pub enum LogFormat {
        Human,
        Json,
    }

    /// Logging output destination
    #[derive(Debug, Clone)]
    pub enum LogOutput {
        Stdout,
        Stderr,
    }

    /// Logging configuration
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        pub level: Level,
        pub format: LogFormat,
        pub output: LogOutput,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                format: LogFormat::Human,
                output: LogOutput::Stdout,
            }
        }
    }

    /// Initialize structured logging with the given configuration
    pub fn init_logging(
        config: LoggingConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let env_filter = EnvFilter::builder()
            .with_default_directive(config.level.into())
            .from_env_lossy()
            .add_directive("nostr_relay_pool=warn".parse()?)
            .add_directive("tokio=info".parse()?);

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format {
            LogFormat::Human => {
                let fmt_layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);

                match config.output {
                    LogOutput::Stdout => registry
                        .with(fmt_layer.with_writer(std::io::stdout))
                        .try_init()?,
                    LogOutput::Stderr => registry
                        .with(fmt_layer.with_writer(std::io::stderr))
                        .try_init()?,
                }
            }
            LogFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(fmt::format::FmtSpan::CLOSE);

                match config.output {
                    LogOutput::Stdout => registry
                        .with(fmt_layer.with_writer(std::io::stdout))
                        .try_init()?,
                    LogOutput::Stderr => registry
                        .with(fmt_layer.with_writer(std::io::stderr))
                        .try_init()?,
                }
            }
        }

        Ok(())
    }

    /// Initialize logging with environment-based configuration
    pub fn init_from_env() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        init_logging(config_from_env())
    }

    /// Read `DURAK_LOG_LEVEL`, `DURAK_LOG_FORMAT` and `DURAK_LOG_OUTPUT`
    pub fn config_from_env() -> LoggingConfig {
        let level = env::var("DURAK_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .parse::<Level>()
            .unwrap_or(Level::INFO);

        let format = match env::var("DURAK_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        let output = match env::var("DURAK_LOG_OUTPUT").as_deref() {
            Ok("stderr") => LogOutput::Stderr,
            _ => LogOutput::Stdout,
        };

        LoggingConfig {
            level,
            format,
            output,
        }
    }
}
