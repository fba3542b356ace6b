//! Transaction executor.
//!
//! The single write path to the ledger. Every wager and claim goes
//! through here so submissions stay sequential, each confirmation is
//! bounded by a timeout, and failures come back classified. In dry-run
//! mode nothing is sent and a synthetic receipt is returned.

use anyhow::Result;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::ledger::PredictionLedger;
use crate::types::{Epoch, Side, SubmissionFailure, TxReceipt};

pub struct TxExecutor {
    ledger: Arc<dyn PredictionLedger>,
    confirmation_timeout: Duration,
    dry_run: bool,
}

impl TxExecutor {
    pub fn new(ledger: Arc<dyn PredictionLedger>, confirmation_timeout: Duration, dry_run: bool) -> Self {
        Self {
            ledger,
            confirmation_timeout,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Stake `amount` on `side` for `epoch` and wait for confirmation.
    pub async fn place_wager(
        &self,
        epoch: Epoch,
        side: Side,
        amount: Decimal,
    ) -> Result<TxReceipt, SubmissionFailure> {
        if self.dry_run {
            info!(epoch, side = %side, amount = %amount, "[DRY RUN] Would place wager");
            return Ok(TxReceipt::dry_run());
        }
        debug!(epoch, side = %side, amount = %amount, "Submitting wager");
        self.submit(self.ledger.place_wager(epoch, side, amount)).await
    }

    /// Claim every epoch in `epochs` with one transaction.
    pub async fn claim(&self, epochs: &[Epoch]) -> Result<TxReceipt, SubmissionFailure> {
        if self.dry_run {
            info!(epochs = ?epochs, "[DRY RUN] Would claim");
            return Ok(TxReceipt::dry_run());
        }
        debug!(epochs = ?epochs, "Submitting claim");
        self.submit(self.ledger.claim(epochs.to_vec())).await
    }

    async fn submit<F>(&self, write: F) -> Result<TxReceipt, SubmissionFailure>
    where
        F: Future<Output = Result<TxReceipt>>,
    {
        match tokio::time::timeout(self.confirmation_timeout, write).await {
            Err(_) => Err(SubmissionFailure::Timeout(self.confirmation_timeout.as_secs())),
            Ok(Err(e)) => Err(SubmissionFailure::classify(&format!("{e:#}"))),
            Ok(Ok(receipt)) => Ok(receipt),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
