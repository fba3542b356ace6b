//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The signing key is referenced by env-var name in the config and
//! resolved once at startup into a [`SecretString`].

use ethers::types::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::strategy::side::SideMode;

/// Fatal startup problems. Any of these stops the process before the
/// first round is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load config file {path}: {message}")]
    Load { path: String, message: String },

    #[error("The private key was not found in ${0}. Add it to .env and start the program again.")]
    MissingCredential(String),

    #[error("Unknown side-selection strategy '{0}' (expected contrarian, majority, bull or bear)")]
    UnknownStrategy(String),

    #[error("Invalid contract address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub betting: BettingConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub claims: ClaimsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Log decisions without sending transactions.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// Name of the environment variable holding the signing key.
    pub private_key_env: String,
    /// Average block time of the target chain.
    pub block_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    /// Upper bound on any single contract read.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_read_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct BettingConfig {
    /// Stake for a fresh martingale run, in whole currency units.
    pub base_stake: Decimal,
    /// Recovery stakes above this reset to `base_stake`.
    pub cap_stake: Decimal,
    /// Side-selection mode name; validated by [`AppConfig::side_mode`].
    pub strategy: String,
    /// Treasury share of each round's pool, used for payout estimates.
    #[serde(default = "default_treasury_fee")]
    pub treasury_fee: Decimal,
}

fn default_treasury_fee() -> Decimal {
    dec!(0.03)
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    /// Delay between round start and wager submission.
    pub wait_ms: u64,
    /// The wait never shrinks below this.
    pub min_wait_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClaimsConfig {
    pub lookback_epochs: u64,
    pub gap_tolerance: u64,
    /// Claims are submitted only when more epochs than this are pending.
    pub min_batch: usize,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            lookback_epochs: 12,
            gap_tolerance: 3,
            min_batch: 2,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let load_error = |message: String| ConfigError::Load {
            path: path.to_string(),
            message,
        };
        let contents = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        Self::from_toml_str(&contents).map_err(|e| load_error(e.to_string()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve the signing key. Empty values count as missing.
    pub fn private_key(&self) -> Result<SecretString, ConfigError> {
        let env_name = &self.chain.private_key_env;
        match std::env::var(env_name) {
            Ok(v) if !v.trim().is_empty() => Ok(SecretString::new(v.trim().to_string())),
            _ => Err(ConfigError::MissingCredential(env_name.clone())),
        }
    }

    pub fn side_mode(&self) -> Result<SideMode, ConfigError> {
        self.betting.strategy.parse()
    }

    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        self.chain
            .contract_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.chain.contract_address.clone()))
    }

    pub fn base_wait(&self) -> Duration {
        Duration::from_millis(self.timing.wait_ms)
    }

    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.timing.min_wait_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.chain.block_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.confirmation_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.read_timeout_secs)
    }

    /// Check every value the agent relies on before the loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.side_mode()?;
        self.contract_address()?;

        let b = &self.betting;
        if b.base_stake <= Decimal::ZERO {
            return Err(ConfigError::Invalid("base_stake must be positive".into()));
        }
        if b.cap_stake < b.base_stake {
            return Err(ConfigError::Invalid(format!(
                "cap_stake {} is below base_stake {}",
                b.cap_stake, b.base_stake
            )));
        }
        if b.treasury_fee < Decimal::ZERO || b.treasury_fee >= Decimal::ONE {
            return Err(ConfigError::Invalid("treasury_fee must be in [0, 1)".into()));
        }
        if self.chain.block_interval_ms == 0 {
            return Err(ConfigError::Invalid("block_interval_ms must be positive".into()));
        }
        if self.chain.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid("confirmation_timeout_secs must be positive".into()));
        }
        if self.chain.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read_timeout_secs must be positive".into()));
        }
        if self.timing.min_wait_ms == 0 || self.timing.min_wait_ms > self.timing.wait_ms {
            return Err(ConfigError::Invalid(format!(
                "min_wait_ms must be in 1..={}",
                self.timing.wait_ms
            )));
        }
        if self.claims.lookback_epochs == 0 {
            return Err(ConfigError::Invalid("lookback_epochs must be positive".into()));
        }
        Ok(())
    }
}

/// Redacted view of the key for logs.
pub fn redact(secret: &SecretString) -> String {
    let key = secret.expose_secret();
    if key.chars().count() <= 6 {
        return "***".to_string();
    }
    format!("{}***", key.chars().take(6).collect::<String>())
}
