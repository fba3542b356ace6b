//! Martingale stake sizing.
//!
//! After a lost, unclaimed round the next stake is the previous stake
//! times a recovery multiplier. Past the cap the run is abandoned and
//! sizing restarts from the base stake.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::PriorRound;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Stake for a fresh run, in whole currency units.
    pub base_stake: Decimal,
    /// Largest recovery stake allowed; anything above resets to base.
    pub cap_stake: Decimal,
    /// Recovery multiplier applied to the lost stake.
    pub multiplier: Decimal,
    /// Prior stakes at or below this are treated as no bet.
    pub dust_threshold: Decimal,
    /// Cycles since start that always use the base stake.
    pub warmup_cycles: u64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_stake: dec!(0.004),
            cap_stake: dec!(0.3),
            multiplier: dec!(3),
            dust_threshold: dec!(0.000000000000000001), // one wei
            warmup_cycles: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

/// Why a particular stake was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeReason {
    Warmup,
    PriorWon,
    PriorClaimed,
    NoPriorStake,
    Recovery,
    CapExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeDecision {
    pub amount: Decimal,
    pub reason: StakeReason,
}

pub struct BetSizer {
    config: SizingConfig,
}

impl BetSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Stake for the round whose prior round is `prior`.
    ///
    /// `cycle_count` is the 1-based number of the cycle being decided.
    pub fn next_stake(&self, prior: &PriorRound, cycle_count: u64) -> StakeDecision {
        let base = self.config.base_stake;
        let entry = &prior.entry;

        let reset = |reason| StakeDecision { amount: base, reason };

        if cycle_count <= self.config.warmup_cycles {
            return reset(StakeReason::Warmup);
        }
        if entry.claimed {
            return reset(StakeReason::PriorClaimed);
        }
        if prior.claimable {
            return reset(StakeReason::PriorWon);
        }
        if entry.staked <= self.config.dust_threshold {
            return reset(StakeReason::NoPriorStake);
        }

        let recovery = entry.staked * self.config.multiplier;
        if recovery > self.config.cap_stake {
            debug!(
                epoch = prior.epoch,
                recovery = %recovery,
                cap = %self.config.cap_stake,
                "Recovery stake over cap, resetting"
            );
            return reset(StakeReason::CapExceeded);
        }

        debug!(
            epoch = prior.epoch,
            previous = %entry.staked,
            next = %recovery,
            "Recovering lost stake"
        );
        StakeDecision {
            amount: recovery,
            reason: StakeReason::Recovery,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
