//! Shared types for the ROUNDBOT agent.
//!
//! These types form the data model used across all modules: epochs,
//! sides, ledger entries, round pools, transaction receipts and the
//! domain error enums. Amounts are `Decimal` in whole currency units;
//! conversion to the ledger's native unit lives in [`units`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// A round identifier. Monotonically increasing.
pub type Epoch = u64;

/// Number of epochs between a round starting and its settlement.
pub const SETTLEMENT_LAG: Epoch = 2;

/// A round-start notification, stamped when the agent heard about it.
///
/// The pre-bet wait runs from `received`, so time spent queued behind a
/// slow cycle counts against the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundStart {
    pub epoch: Epoch,
    pub received: Instant,
}

impl RoundStart {
    pub fn now(epoch: Epoch) -> Self {
        Self {
            epoch,
            received: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Side / position
// ---------------------------------------------------------------------------

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bull,
    Bear,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bull => Side::Bear,
            Side::Bear => Side::Bull,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bull => write!(f, "BULL"),
            Side::Bear => write!(f, "BEAR"),
        }
    }
}

/// Position recorded on the ledger for a participant in one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    None,
    Taken(Side),
}

impl Position {
    /// Decode the contract's position byte (0 = Bull, 1 = Bear).
    /// The contract reports Bull for epochs without a bet, so the staked
    /// amount decides whether the position is real.
    pub fn from_ledger(raw: u8, staked: Decimal) -> Self {
        if staked.is_zero() {
            return Position::None;
        }
        match raw {
            0 => Position::Taken(Side::Bull),
            _ => Position::Taken(Side::Bear),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger reads
// ---------------------------------------------------------------------------

/// A participant's recorded bet for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub position: Position,
    /// Staked amount in whole currency units.
    pub staked: Decimal,
    pub claimed: bool,
}

impl LedgerEntry {
    /// Entry for an epoch where the participant placed nothing.
    pub fn empty() -> Self {
        Self {
            position: Position::None,
            staked: Decimal::ZERO,
            claimed: false,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position != Position::None && self.staked > Decimal::ZERO
    }
}

/// Prior-round snapshot consumed by bet sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorRound {
    pub epoch: Epoch,
    pub entry: LedgerEntry,
    /// Settled round with an unclaimed payout (won or refundable).
    pub claimable: bool,
}

/// Aggregate amounts staked on each side of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPools {
    pub bull: Decimal,
    pub bear: Decimal,
}

impl RoundPools {
    pub fn total(&self) -> Decimal {
        self.bull + self.bear
    }

    pub fn pool(&self, side: Side) -> Decimal {
        match side {
            Side::Bull => self.bull,
            Side::Bear => self.bear,
        }
    }

    /// Implied payout multiplier for a winning bet on `side`, after the
    /// treasury takes `treasury_fee` (0.03 = 3%) of the total pool.
    /// `None` when the side's pool is empty.
    pub fn payout_multiplier(&self, side: Side, treasury_fee: Decimal) -> Option<Decimal> {
        let own = self.pool(side);
        if own.is_zero() {
            return None;
        }
        let reward = self.total() * (Decimal::ONE - treasury_fee);
        Some((reward / own).round_dp(4))
    }
}

impl fmt::Display for RoundPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bull={} bear={}", self.bull, self.bear)
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Confirmation of a ledger write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl TxReceipt {
    /// Receipt for a write that was only logged (dry-run mode).
    pub fn dry_run() -> Self {
        Self {
            tx_hash: format!("dry-run-{}", uuid::Uuid::new_v4()),
            block_number: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.tx_hash.starts_with("dry-run-")
    }
}

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

/// Conversion between whole currency units and the ledger's native unit.
pub mod units {
    use anyhow::{anyhow, Result};
    use ethers::types::U256;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;

    /// Decimal places of the native unit (18: wei per BNB).
    pub const DECIMALS: u32 = 18;

    /// Native amount → whole units.
    pub fn from_wei(wei: U256) -> Result<Decimal> {
        if wei > U256::from(i128::MAX as u128) {
            return Err(anyhow!("amount {wei} wei is out of range"));
        }
        Decimal::try_from_i128_with_scale(wei.as_u128() as i128, DECIMALS)
            .map(|d| d.normalize())
            .map_err(|e| anyhow!("amount {wei} wei is out of range: {e}"))
    }

    /// Whole units → native amount, truncating below one wei.
    pub fn to_wei(amount: Decimal) -> Result<U256> {
        if amount.is_sign_negative() {
            return Err(anyhow!("negative amount {amount}"));
        }
        let scale = Decimal::from(10u64.pow(DECIMALS));
        let wei = amount
            .checked_mul(scale)
            .and_then(|w| w.trunc().to_u128())
            .ok_or_else(|| anyhow!("amount {amount} does not fit in wei"))?;
        Ok(U256::from(wei))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a ledger write did not land.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionFailure {
    #[error("confirmation timed out after {0}s")]
    Timeout(u64),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("transaction dropped before confirmation")]
    Dropped,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

impl SubmissionFailure {
    /// Classify a raw submission error message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
            SubmissionFailure::InsufficientFunds(message.to_string())
        } else if lower.contains("revert") || lower.contains("bettable") || lower.contains("too early") {
            SubmissionFailure::Reverted(message.to_string())
        } else if lower.contains("dropped") {
            SubmissionFailure::Dropped
        } else {
            SubmissionFailure::Rejected(message.to_string())
        }
    }

    /// Whether the failure suggests the wager landed after lock, so the
    /// pre-bet wait should shrink.
    pub fn is_timing_related(&self) -> bool {
        !matches!(self, SubmissionFailure::InsufficientFunds(_))
    }
}

/// Domain-specific error types for ROUNDBOT.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Ledger read failed ({call} for epoch {epoch}): {message}")]
    LedgerRead {
        call: &'static str,
        epoch: Epoch,
        message: String,
    },

    #[error("Ledger read {call} timed out after {secs}s")]
    ReadTimeout { call: String, secs: u64 },

    #[error("Epoch {0} is too early to have a settled prior round")]
    EpochTooEarly(Epoch),

    #[error("Event stream ended")]
    StreamEnded,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
