//! Prediction contract integration.
//!
//! Defines the `PredictionLedger` trait the round controller drives, and
//! the ethers-backed implementation for PancakeSwap Prediction V2.

pub mod bsc;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::{AgentError, Epoch, LedgerEntry, RoundPools, RoundStart, Side, TxReceipt};

/// Abstraction over the on-chain prediction game.
///
/// Writes return once the transaction is confirmed (or fail). Callers
/// impose their own confirmation timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionLedger: Send + Sync {
    /// Forward every round start into `sink`, stamped on receipt, until
    /// the event stream ends or the receiver is dropped.
    async fn watch_round_starts(&self, sink: mpsc::Sender<RoundStart>) -> Result<()>;

    /// Epoch the contract is currently running.
    async fn current_epoch(&self) -> Result<Epoch>;

    /// Whether `participant` won `epoch` and has not claimed yet.
    async fn claimable(&self, epoch: Epoch, participant: Address) -> Result<bool>;

    /// Whether `epoch` was cancelled and `participant` can reclaim the stake.
    async fn refundable(&self, epoch: Epoch, participant: Address) -> Result<bool>;

    async fn ledger(&self, epoch: Epoch, participant: Address) -> Result<LedgerEntry>;

    async fn rounds(&self, epoch: Epoch) -> Result<RoundPools>;

    /// Stake `amount` (whole units) on `side` for `epoch`.
    async fn place_wager(&self, epoch: Epoch, side: Side, amount: Decimal) -> Result<TxReceipt>;

    /// Claim payouts for all `epochs` in one transaction.
    async fn claim(&self, epochs: Vec<Epoch>) -> Result<TxReceipt>;

    /// Address wagers are placed from.
    fn participant(&self) -> Address;
}

/// Run a ledger read, failing it once `limit` elapses.
///
/// The HTTP transport sets no request timeout of its own.
pub async fn bounded_read<T, F>(limit: Duration, call: &str, read: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, read).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::ReadTimeout {
            call: call.to_string(),
            secs: limit.as_secs(),
        }
        .into()),
    }
}
