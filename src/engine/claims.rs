//! Claim range resolution.
//!
//! Walks backward from the newest settled epoch over a bounded window and
//! collects the epochs where the participant still has a payout to
//! collect. The walk also stops after a run of epochs without a position,
//! which keeps ledger reads per cycle small once the agent has been idle.

use anyhow::Result;
use ethers::types::Address;
use std::time::Duration;
use tracing::debug;

use crate::ledger::{bounded_read, PredictionLedger};
use crate::types::Epoch;

#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Most epochs inspected per resolve, counting the reference epoch.
    pub lookback: u64,
    /// Consecutive epochs without a position tolerated before stopping.
    pub gap_tolerance: u64,
    /// Claims are worth a transaction only above this many epochs.
    pub min_batch: usize,
    /// Limit on each individual ledger read.
    pub read_timeout: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            lookback: 12,
            gap_tolerance: 3,
            min_batch: 2,
            read_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ClaimRangeResolver {
    config: ClaimConfig,
}

impl ClaimRangeResolver {
    pub fn new(config: ClaimConfig) -> Self {
        Self { config }
    }

    /// Epochs at or before `reference` that `participant` can still claim,
    /// oldest first. Any ledger read failure or timeout aborts the whole
    /// resolve.
    pub async fn resolve(
        &self,
        ledger: &dyn PredictionLedger,
        reference: Epoch,
        participant: Address,
    ) -> Result<Vec<Epoch>> {
        let mut pending = Vec::new();
        if reference == 0 {
            return Ok(pending);
        }

        let mut gap = 0u64;
        let oldest = reference
            .saturating_sub(self.config.lookback.saturating_sub(1))
            .max(1);

        let limit = self.config.read_timeout;
        for epoch in (oldest..=reference).rev() {
            let entry = bounded_read(
                limit,
                &format!("ledger({epoch})"),
                ledger.ledger(epoch, participant),
            )
            .await?;
            if !entry.has_position() {
                gap += 1;
                if gap > self.config.gap_tolerance {
                    debug!(epoch, gap, "Stopping claim scan after empty epochs");
                    break;
                }
                continue;
            }
            gap = 0;

            if entry.claimed {
                continue;
            }

            let eligible = bounded_read(
                limit,
                &format!("claimable({epoch})"),
                ledger.claimable(epoch, participant),
            )
            .await?
                || bounded_read(
                    limit,
                    &format!("refundable({epoch})"),
                    ledger.refundable(epoch, participant),
                )
                .await?;
            if eligible {
                pending.push(epoch);
            }
        }

        pending.reverse();
        debug!(reference, pending = ?pending, "Claim scan complete");
        Ok(pending)
    }

    /// Whether `pending` is large enough to submit now.
    pub fn should_submit(&self, pending: &[Epoch]) -> bool {
        pending.len() > self.config.min_batch
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
