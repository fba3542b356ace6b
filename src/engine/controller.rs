//! Round controller. One decision cycle per round-start notification.
//!
//! Cycle: FetchingPriorState → Deciding → Waiting → Submitting →
//! Claiming → Idle. Cycles run one at a time on a single worker that
//! owns all cross-cycle state (stake, wait, cycle counter), so nothing
//! is shared with the event listener except the round channel. The
//! pre-bet wait is measured from when a round start was received.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::claims::{ClaimConfig, ClaimRangeResolver};
use super::executor::TxExecutor;
use super::scheduler::WaitScheduler;
use crate::config::{AppConfig, ConfigError};
use crate::ledger::{bounded_read, PredictionLedger};
use crate::strategy::side::{choose_side_for, SideMode};
use crate::strategy::sizing::{BetSizer, SizingConfig, StakeDecision};
use crate::types::{
    AgentError, Epoch, PriorRound, RoundStart, Side, SubmissionFailure, SETTLEMENT_LAG,
};

/// Read limit used until [`RoundController::with_read_timeout`] overrides it.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Cycle state & outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchingPriorState,
    Deciding,
    Waiting,
    Submitting,
    Claiming,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::FetchingPriorState => "fetching-prior-state",
            CycleState::Deciding => "deciding",
            CycleState::Waiting => "waiting",
            CycleState::Submitting => "submitting",
            CycleState::Claiming => "claiming",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WagerOutcome {
    Placed {
        side: Side,
        tx_hash: String,
    },
    /// The wager window had already passed when the round was picked up.
    Skipped(String),
    Failed {
        side: Side,
        failure: SubmissionFailure,
    },
}

impl WagerOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, WagerOutcome::Placed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    NothingPending,
    /// Too few epochs pending to justify a transaction.
    Deferred(Vec<Epoch>),
    Claimed {
        epochs: Vec<Epoch>,
        tx_hash: String,
    },
    Failed {
        epochs: Vec<Epoch>,
        failure: SubmissionFailure,
    },
    /// The claim scan itself failed.
    ScanFailed(String),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub epoch: Epoch,
    pub stake: StakeDecision,
    pub wager: WagerOutcome,
    pub claim: ClaimOutcome,
    pub wait_after: Duration,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wager = match &self.wager {
            WagerOutcome::Placed { side, .. } => format!("{side} placed"),
            WagerOutcome::Skipped(_) => "skipped".to_string(),
            WagerOutcome::Failed { side, .. } => format!("{side} failed"),
        };
        let claim = match &self.claim {
            ClaimOutcome::NothingPending => "none".to_string(),
            ClaimOutcome::Deferred(e) => format!("{} deferred", e.len()),
            ClaimOutcome::Claimed { epochs, .. } => format!("{} claimed", epochs.len()),
            ClaimOutcome::Failed { epochs, .. } => format!("{} failed", epochs.len()),
            ClaimOutcome::ScanFailed(_) => "scan failed".to_string(),
        };
        write!(
            f,
            "Cycle #{} epoch {}: stake={} wager={} claim={} wait={}ms",
            self.cycle_number,
            self.epoch,
            self.stake.amount,
            wager,
            claim,
            self.wait_after.as_millis(),
        )
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct RoundController {
    ledger: Arc<dyn PredictionLedger>,
    executor: TxExecutor,
    sizer: BetSizer,
    claims: ClaimRangeResolver,
    scheduler: WaitScheduler,
    side_mode: SideMode,
    treasury_fee: Decimal,
    read_timeout: Duration,
    participant: Address,
    cycle_count: u64,
    stake: Decimal,
    state: CycleState,
    last_epoch: Option<Epoch>,
}

impl RoundController {
    pub fn new(
        ledger: Arc<dyn PredictionLedger>,
        executor: TxExecutor,
        sizer: BetSizer,
        claims: ClaimRangeResolver,
        scheduler: WaitScheduler,
        side_mode: SideMode,
        treasury_fee: Decimal,
    ) -> Self {
        let participant = ledger.participant();
        let stake = sizer.config().base_stake;
        Self {
            ledger,
            executor,
            sizer,
            claims,
            scheduler,
            side_mode,
            treasury_fee,
            read_timeout: DEFAULT_READ_TIMEOUT,
            participant,
            cycle_count: 0,
            stake,
            state: CycleState::Idle,
            last_epoch: None,
        }
    }

    /// Wire every component from validated configuration.
    pub fn from_config(cfg: &AppConfig, ledger: Arc<dyn PredictionLedger>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let executor = TxExecutor::new(ledger.clone(), cfg.confirmation_timeout(), cfg.agent.dry_run);
        let sizer = BetSizer::new(SizingConfig {
            base_stake: cfg.betting.base_stake,
            cap_stake: cfg.betting.cap_stake,
            ..SizingConfig::default()
        });
        let claims = ClaimRangeResolver::new(ClaimConfig {
            lookback: cfg.claims.lookback_epochs,
            gap_tolerance: cfg.claims.gap_tolerance,
            min_batch: cfg.claims.min_batch,
            read_timeout: cfg.read_timeout(),
        });
        let scheduler = WaitScheduler::new(cfg.base_wait(), cfg.block_interval(), cfg.min_wait());
        Ok(Self::new(
            ledger,
            executor,
            sizer,
            claims,
            scheduler,
            cfg.side_mode()?,
            cfg.betting.treasury_fee,
        )
        .with_read_timeout(cfg.read_timeout()))
    }

    /// Limit on each contract read made while fetching round state.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn current_stake(&self) -> Decimal {
        self.stake
    }

    pub fn current_wait(&self) -> Duration {
        self.scheduler.current_wait()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Consume round starts until the channel closes.
    ///
    /// Rounds that queued up while a cycle was running are collapsed to
    /// the newest one; older rounds have already locked.
    pub async fn run(&mut self, mut rounds: mpsc::Receiver<RoundStart>) -> Result<()> {
        info!(
            participant = %format!("{:#x}", self.participant),
            mode = %self.side_mode,
            dry_run = self.executor.is_dry_run(),
            "Waiting for new rounds"
        );

        while let Some(mut round) = rounds.recv().await {
            while let Ok(newer) = rounds.try_recv() {
                if newer.epoch > round.epoch {
                    warn!(skipped = round.epoch, newer = newer.epoch, "Skipping stale round");
                    round = newer;
                }
            }

            if let Some(last) = self.last_epoch {
                if round.epoch <= last {
                    debug!(epoch = round.epoch, last, "Ignoring already processed round");
                    continue;
                }
            }

            let epoch = round.epoch;
            match self.run_round(round).await {
                Ok(report) => log_cycle_report(&report),
                Err(e) => error!(epoch, error = %format!("{e:#}"), "Cycle aborted, waiting for next round"),
            }
        }

        info!("Round stream closed");
        Ok(())
    }

    /// Drive one full cycle for a round that starts now.
    pub async fn run_cycle(&mut self, epoch: Epoch) -> Result<CycleReport> {
        self.run_round(RoundStart::now(epoch)).await
    }

    /// Drive one full cycle for `round`.
    ///
    /// The wager goes out `current_wait()` after the round was received.
    /// If that moment has already passed the wager is skipped.
    pub async fn run_round(&mut self, round: RoundStart) -> Result<CycleReport> {
        let epoch = round.epoch;
        self.cycle_count += 1;
        self.last_epoch = Some(epoch);
        let cycle = self.cycle_count;
        info!(cycle, epoch, "Started epoch");

        if epoch <= SETTLEMENT_LAG {
            self.transition(CycleState::Idle);
            return Err(AgentError::EpochTooEarly(epoch).into());
        }
        let prior_epoch = epoch - SETTLEMENT_LAG;

        self.transition(CycleState::FetchingPriorState);
        let prior = match self.fetch_prior(prior_epoch).await {
            Ok(p) => p,
            Err(e) => {
                self.transition(CycleState::Idle);
                return Err(e);
            }
        };

        self.transition(CycleState::Deciding);
        let stake = self.sizer.next_stake(&prior, cycle);
        self.stake = stake.amount;
        let wait = self.scheduler.current_wait();
        info!(
            cycle,
            epoch,
            stake = %stake.amount,
            reason = ?stake.reason,
            wait_ms = wait.as_millis() as u64,
            "Stake decided"
        );

        self.transition(CycleState::Waiting);
        let deadline = round.received + wait;
        let now = Instant::now();
        let wager = if now > deadline {
            let late = now - deadline;
            warn!(
                epoch,
                late_ms = late.as_millis() as u64,
                "Wager window passed while the round was queued, skipping wager"
            );
            WagerOutcome::Skipped(format!("picked up {}ms past the wager time", late.as_millis()))
        } else {
            tokio::time::sleep_until(deadline).await;
            self.transition(CycleState::Submitting);
            match self.submit_wager(epoch, stake.amount).await {
                Ok(wager) => wager,
                Err(e) => {
                    self.transition(CycleState::Idle);
                    return Err(e);
                }
            }
        };

        self.transition(CycleState::Claiming);
        let claim = self.claim_pending(prior_epoch.saturating_sub(1)).await;

        self.transition(CycleState::Idle);
        Ok(CycleReport {
            cycle_number: cycle,
            epoch,
            stake,
            wager,
            claim,
            wait_after: self.scheduler.current_wait(),
            timestamp: Utc::now(),
        })
    }

    fn transition(&mut self, next: CycleState) {
        debug!(from = %self.state, to = %next, "Cycle state");
        self.state = next;
    }

    async fn fetch_prior(&self, epoch: Epoch) -> Result<PriorRound> {
        let claimable = bounded_read(
            self.read_timeout,
            &format!("claimable({epoch})"),
            self.ledger.claimable(epoch, self.participant),
        )
        .await
        .map_err(|e| read_error("claimable", epoch, e))?;
        let entry = bounded_read(
            self.read_timeout,
            &format!("ledger({epoch})"),
            self.ledger.ledger(epoch, self.participant),
        )
        .await
        .map_err(|e| read_error("ledger", epoch, e))?;
        debug!(epoch, claimable, entry = ?entry, "Prior round fetched");
        Ok(PriorRound { epoch, entry, claimable })
    }

    /// Read the pools and place the wager. Only the pool read can fail
    /// the cycle; submission failures come back as an outcome.
    async fn submit_wager(&mut self, epoch: Epoch, amount: Decimal) -> Result<WagerOutcome> {
        let pools = bounded_read(
            self.read_timeout,
            &format!("rounds({epoch})"),
            self.ledger.rounds(epoch),
        )
        .await
        .map_err(|e| read_error("rounds", epoch, e))?;

        let side = choose_side_for(&pools, self.side_mode);
        info!(
            epoch,
            bull = %pools.bull,
            bear = %pools.bear,
            side = %side,
            payout = ?pools.payout_multiplier(side, self.treasury_fee),
            "Side chosen"
        );

        match self.executor.place_wager(epoch, side, amount).await {
            Ok(receipt) => {
                self.scheduler.on_submission_success();
                info!(epoch, side = %side, amount = %amount, tx_hash = %receipt.tx_hash, "Wager confirmed");
                Ok(WagerOutcome::Placed {
                    side,
                    tx_hash: receipt.tx_hash,
                })
            }
            Err(failure) => {
                error!(epoch, side = %side, error = %failure, "Wager failed");
                if failure.is_timing_related() {
                    self.scheduler.on_submission_failure();
                }
                Ok(WagerOutcome::Failed { side, failure })
            }
        }
    }

    async fn claim_pending(&self, reference: Epoch) -> ClaimOutcome {
        let pending = match self
            .claims
            .resolve(self.ledger.as_ref(), reference, self.participant)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                let message = format!("{e:#}");
                error!(reference, error = %message, "Claim scan failed");
                return ClaimOutcome::ScanFailed(message);
            }
        };

        if pending.is_empty() {
            return ClaimOutcome::NothingPending;
        }
        if !self.claims.should_submit(&pending) {
            debug!(pending = ?pending, "Deferring claim until more rounds are pending");
            return ClaimOutcome::Deferred(pending);
        }

        match self.executor.claim(&pending).await {
            Ok(receipt) => {
                info!(epochs = ?pending, tx_hash = %receipt.tx_hash, "Claim confirmed");
                ClaimOutcome::Claimed {
                    epochs: pending,
                    tx_hash: receipt.tx_hash,
                }
            }
            Err(failure) => {
                error!(epochs = ?pending, error = %failure, "Claim failed");
                ClaimOutcome::Failed {
                    epochs: pending,
                    failure,
                }
            }
        }
    }
}

fn read_error(call: &'static str, epoch: Epoch, e: anyhow::Error) -> anyhow::Error {
    AgentError::LedgerRead {
        call,
        epoch,
        message: format!("{e:#}"),
    }
    .into()
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        epoch = report.epoch,
        placed = report.wager.is_placed(),
        "{report}"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
