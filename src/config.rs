//! Configuration management for the Durak escrow protocol

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GameProtocolError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurakConfig {
    /// Broadcast store configuration
    pub network: NetworkConfig,
    /// Game rules configuration
    pub game: GameConfig,
    /// Entry stake and fee amounts
    pub stakes: StakeConfig,
    /// Custody and settlement configuration
    pub escrow: EscrowConfig,
}

/// Network-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Nostr relays backing the broadcast store
    pub relays: Vec<String>,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    /// Attempts for publishes on the session-creation path
    pub retry_attempts: u32,
    /// Initial backoff between attempts in milliseconds, doubled each retry
    pub retry_backoff_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://nos.lol".to_string(),
            ],
            connection_timeout: 10,
            retry_attempts: 3,
            retry_backoff_ms: 2000,
        }
    }
}

/// Game-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Seconds the active participant has to act
    pub turn_time_limit: u64,
    /// Length of shareable game codes
    pub game_code_length: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            turn_time_limit: 30,
            game_code_length: 6,
        }
    }
}

impl GameConfig {
    pub fn turn_duration(&self) -> Duration {
        Duration::from_secs(self.turn_time_limit)
    }
}

/// Stake amounts in base units (1 SOL = 1_000_000_000)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeConfig {
    /// Per-participant entry stake
    pub entry_stake: u64,
    /// Per-participant house fee
    pub house_fee: u64,
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            entry_stake: 100_000_000, // 0.1 SOL
            house_fee: 2_000_000,     // 0.002 SOL
        }
    }
}

impl StakeConfig {
    /// Amount each participant deposits into escrow
    pub fn deposit_amount(&self) -> u64 {
        self.entry_stake + self.house_fee
    }

    /// Amount released to the winner (both entry stakes)
    pub fn winner_payout(&self) -> u64 {
        self.entry_stake * 2
    }
}

/// Custody and settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Identifier of the custody program holding the stakes
    pub custody_program: String,
    /// Seconds to wait for a deposit or payout confirmation
    pub confirmation_timeout: u64,
    /// Seconds after termination before session records are removed
    pub cleanup_delay: u64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            custody_program: "H4Tj8wzHPScxsWuRcPP3jJ2T5GTZvBzXoz1eNFYwhBYP".to_string(),
            confirmation_timeout: 30,
            cleanup_delay: 10,
        }
    }
}

impl EscrowConfig {
    pub fn confirmation_duration(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout)
    }

    pub fn cleanup_duration(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay)
    }
}

impl DurakConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GameProtocolError> {
        let content = fs::read_to_string(path).map_err(|e| GameProtocolError::Configuration {
            message: format!("Failed to read config file: {}", e),
            field: "config_file".to_string(),
        })?;

        let config: DurakConfig =
            toml::from_str(&content).map_err(|e| GameProtocolError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                field: "config_format".to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GameProtocolError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GameProtocolError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                field: "config_serialization".to_string(),
            })?;

        fs::write(path, content).map_err(|e| GameProtocolError::Configuration {
            message: format!("Failed to write config file: {}", e),
            field: "config_write".to_string(),
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), GameProtocolError> {
        if self.network.connection_timeout == 0 {
            return Err(GameProtocolError::Configuration {
                message: "Connection timeout must be greater than 0".to_string(),
                field: "network.connection_timeout".to_string(),
            });
        }

        if self.network.retry_attempts == 0 {
            return Err(GameProtocolError::Configuration {
                message: "At least one publish attempt is required".to_string(),
                field: "network.retry_attempts".to_string(),
            });
        }

        if self.game.turn_time_limit == 0 {
            return Err(GameProtocolError::Configuration {
                message: "Turn time limit must be greater than 0".to_string(),
                field: "game.turn_time_limit".to_string(),
            });
        }

        if self.game.game_code_length == 0 {
            return Err(GameProtocolError::Configuration {
                message: "Game code length must be greater than 0".to_string(),
                field: "game.game_code_length".to_string(),
            });
        }

        if self.stakes.entry_stake == 0 {
            return Err(GameProtocolError::Configuration {
                message: "Entry stake must be greater than 0".to_string(),
                field: "stakes.entry_stake".to_string(),
            });
        }

        if self.stakes.entry_stake.checked_mul(2).is_none()
            || self.stakes.entry_stake.checked_add(self.stakes.house_fee).is_none()
        {
            return Err(GameProtocolError::Configuration {
                message: "Stake amounts overflow".to_string(),
                field: "stakes".to_string(),
            });
        }

        if self.escrow.custody_program.trim().is_empty() {
            return Err(GameProtocolError::Configuration {
                message: "Custody program must be set".to_string(),
                field: "escrow.custody_program".to_string(),
            });
        }

        if self.escrow.confirmation_timeout == 0 {
            return Err(GameProtocolError::Configuration {
                message: "Confirmation timeout must be greater than 0".to_string(),
                field: "escrow.confirmation_timeout".to_string(),
            });
        }

        Ok(())
    }

    /// Create a production-ready configuration
    pub fn production() -> Self {
        Self {
            network: NetworkConfig {
                relays: vec![
                    "wss://relay.damus.io".to_string(),
                    "wss://nos.lol".to_string(),
                    "wss://relay.snort.social".to_string(),
                ],
                connection_timeout: 5,
                retry_attempts: 3,
                retry_backoff_ms: 2000,
            },
            game: GameConfig::default(),
            stakes: StakeConfig::default(),
            escrow: EscrowConfig {
                confirmation_timeout: 60,
                ..EscrowConfig::default()
            },
        }
    }

    /// Create a development configuration with relaxed settings
    pub fn development() -> Self {
        Self {
            network: NetworkConfig {
                relays: vec!["ws://localhost:8080".to_string()],
                connection_timeout: 30,
                retry_attempts: 5,
                retry_backoff_ms: 100,
            },
            game: GameConfig {
                turn_time_limit: 120,
                ..GameConfig::default()
            },
            stakes: StakeConfig {
                entry_stake: 1_000,
                house_fee: 10,
            },
            escrow: EscrowConfig {
                confirmation_timeout: 10,
                cleanup_delay: 2,
                ..EscrowConfig::default()
            },
        }
    }
}
