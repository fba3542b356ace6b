//! End-to-end round cycles against the in-memory ledger.
//!
//! Every test runs with a paused clock, so the pre-bet wait and the
//! confirmation timeout elapse instantly.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use roundbot::config::AppConfig;
use roundbot::engine::{ClaimOutcome, RoundController, WagerOutcome};
use roundbot::ledger::PredictionLedger;
use roundbot::strategy::StakeReason;
use roundbot::types::{RoundStart, Side, SubmissionFailure};

use crate::mock_ledger::MockLedger;

const CONFIG: &str = r#"
    [agent]
    name = "ROUNDBOT-TEST"

    [chain]
    rpc_url = "http://127.0.0.1:8545"
    contract_address = "0x18B2A687610328590Bc8F2e5fEdDe3b582A49cdA"
    chain_id = 56
    private_key_env = "ROUNDBOT_TEST_KEY_UNSET"
    block_interval_ms = 3000
    confirmation_timeout_secs = 60

    [betting]
    base_stake = 0.004
    cap_stake = 0.3
    strategy = "contrarian"

    [timing]
    wait_ms = 270000
    min_wait_ms = 30000
"#;

fn config() -> AppConfig {
    AppConfig::from_toml_str(CONFIG).unwrap()
}

fn controller(ledger: &Arc<MockLedger>, cfg: &AppConfig) -> RoundController {
    let ledger: Arc<dyn PredictionLedger> = ledger.clone();
    RoundController::from_config(cfg, ledger).unwrap()
}

/// Run cycles for `epochs` and return the last report.
async fn run_epochs(
    c: &mut RoundController,
    epochs: std::ops::RangeInclusive<u64>,
) -> roundbot::engine::CycleReport {
    let mut last = None;
    for epoch in epochs {
        last = Some(c.run_cycle(epoch).await.unwrap());
    }
    last.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_lost_prior_round_triples_stake() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_entry(12, Side::Bear, dec!(0.004), false);

    let mut c = controller(&ledger, &config());
    let report = run_epochs(&mut c, 10..=14).await;

    assert_eq!(report.cycle_number, 5);
    assert_eq!(report.stake.amount, dec!(0.012));
    assert_eq!(report.stake.reason, StakeReason::Recovery);
    assert_eq!(c.current_stake(), dec!(0.012));
    assert_eq!(ledger.wagers().last().unwrap().amount, dec!(0.012));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_over_cap_resets_to_base() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_entry(12, Side::Bear, dec!(0.12), false);

    let mut c = controller(&ledger, &config());
    let report = run_epochs(&mut c, 10..=14).await;

    assert_eq!(report.stake.amount, dec!(0.004));
    assert_eq!(report.stake.reason, StakeReason::CapExceeded);
}

#[tokio::test(start_paused = true)]
async fn test_won_prior_round_resets_to_base() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_won(12, dec!(0.036));

    let mut c = controller(&ledger, &config());
    let report = run_epochs(&mut c, 10..=14).await;

    assert_eq!(report.stake.amount, dec!(0.004));
    assert_eq!(report.stake.reason, StakeReason::PriorWon);
}

#[tokio::test(start_paused = true)]
async fn test_warmup_ignores_lost_prior_round() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_entry(9, Side::Bull, dec!(0.004), false);

    let mut c = controller(&ledger, &config());
    let report = run_epochs(&mut c, 10..=11).await;

    assert_eq!(report.cycle_number, 2);
    assert_eq!(report.stake.reason, StakeReason::Warmup);
    assert_eq!(report.stake.amount, dec!(0.004));
}

#[tokio::test(start_paused = true)]
async fn test_contrarian_backs_smaller_pool() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_pools(10, dec!(10), dec!(2));

    let mut c = controller(&ledger, &config());
    let report = c.run_cycle(10).await.unwrap();

    assert!(matches!(report.wager, WagerOutcome::Placed { side: Side::Bear, .. }));
    let wagers = ledger.wagers();
    assert_eq!(wagers.len(), 1);
    assert_eq!(wagers[0].epoch, 10);
    assert_eq!(wagers[0].side, Side::Bear);
    assert_eq!(wagers[0].amount, dec!(0.004));
}

#[tokio::test(start_paused = true)]
async fn test_majority_mode_backs_larger_pool() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_pools(10, dec!(10), dec!(2));

    let mut cfg = config();
    cfg.betting.strategy = "majority".into();
    let mut c = controller(&ledger, &cfg);
    c.run_cycle(10).await.unwrap();

    assert_eq!(ledger.wagers()[0].side, Side::Bull);
}

#[tokio::test(start_paused = true)]
async fn test_three_failed_wagers_shrink_wait() {
    let ledger = Arc::new(MockLedger::new());
    ledger.fail_wagers("execution reverted: Round not bettable");

    let mut c = controller(&ledger, &config());
    for epoch in 10..=12 {
        let report = c.run_cycle(epoch).await.unwrap();
        assert!(matches!(
            report.wager,
            WagerOutcome::Failed { failure: SubmissionFailure::Reverted(_), .. }
        ));
    }

    assert_eq!(c.current_wait(), Duration::from_millis(252_000));
    assert!(ledger.wagers().is_empty());

    // A later success leaves the shortened wait in place.
    ledger.clear_errors();
    let report = c.run_cycle(13).await.unwrap();
    assert!(report.wager.is_placed());
    assert_eq!(report.wait_after, Duration::from_millis(252_000));
}

#[tokio::test(start_paused = true)]
async fn test_wait_never_drops_below_floor() {
    let ledger = Arc::new(MockLedger::new());
    ledger.fail_wagers("nonce too low");

    let mut cfg = config();
    cfg.timing.wait_ms = 40_000;
    cfg.timing.min_wait_ms = 30_000;
    let mut c = controller(&ledger, &cfg);
    run_epochs(&mut c, 10..=14).await;

    assert_eq!(c.current_wait(), Duration::from_millis(30_000));
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_is_a_failure() {
    let ledger = Arc::new(MockLedger::new());
    ledger.hang_wagers();

    let mut c = controller(&ledger, &config());
    let report = c.run_cycle(10).await.unwrap();

    assert!(matches!(
        report.wager,
        WagerOutcome::Failed { failure: SubmissionFailure::Timeout(60), .. }
    ));
    assert_eq!(c.current_wait(), Duration::from_millis(264_000));
}

#[tokio::test(start_paused = true)]
async fn test_claims_batched_above_threshold() {
    let ledger = Arc::new(MockLedger::new());
    for epoch in 14..=17 {
        ledger.set_won(epoch, dec!(0.004));
    }

    // prior = 18, claim reference = 17
    let mut c = controller(&ledger, &config());
    let report = c.run_cycle(20).await.unwrap();

    assert!(matches!(report.claim, ClaimOutcome::Claimed { .. }));
    assert_eq!(ledger.claims(), vec![vec![14, 15, 16, 17]]);

    // Claimed rounds are not picked up again.
    let report = c.run_cycle(21).await.unwrap();
    assert_eq!(report.claim, ClaimOutcome::NothingPending);
    assert_eq!(ledger.claims().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_claims_deferred_at_threshold() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_won(16, dec!(0.004));
    ledger.set_won(17, dec!(0.004));

    let mut c = controller(&ledger, &config());
    let report = c.run_cycle(20).await.unwrap();

    assert_eq!(report.claim, ClaimOutcome::Deferred(vec![16, 17]));
    assert!(ledger.claims().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refunds_are_claimed_with_winnings() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_won(15, dec!(0.004));
    ledger.set_refundable(16, dec!(0.012));
    ledger.set_won(17, dec!(0.004));

    let mut c = controller(&ledger, &config());
    c.run_cycle(20).await.unwrap();

    assert_eq!(ledger.claims(), vec![vec![15, 16, 17]]);
}

#[tokio::test(start_paused = true)]
async fn test_prior_read_failure_aborts_cycle() {
    let ledger = Arc::new(MockLedger::new());
    ledger.fail_reads("connection refused");

    let mut c = controller(&ledger, &config());
    assert!(c.run_cycle(10).await.is_err());
    assert!(ledger.wagers().is_empty());
    assert_eq!(c.current_wait(), Duration::from_millis(270_000));

    // The next round recovers once reads succeed again.
    ledger.clear_errors();
    let report = c.run_cycle(11).await.unwrap();
    assert_eq!(report.cycle_number, 2);
    assert!(report.wager.is_placed());
}

#[tokio::test(start_paused = true)]
async fn test_hung_prior_read_times_out() {
    let ledger = Arc::new(MockLedger::new());
    ledger.hang_reads_for(8);

    let mut c = controller(&ledger, &config());
    let started = Instant::now();
    let err = c.run_cycle(10).await.unwrap_err();

    assert!(format!("{err:#}").contains("timed out after 10s"));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
    assert!(ledger.wagers().is_empty());

    // The next round is not held up by the hung one.
    let report = c.run_cycle(11).await.unwrap();
    assert!(report.wager.is_placed());
}

#[tokio::test(start_paused = true)]
async fn test_hung_claim_scan_still_wagers() {
    let ledger = Arc::new(MockLedger::new());
    ledger.hang_reads_for(17);

    let mut c = controller(&ledger, &config());
    let report = c.run_cycle(20).await.unwrap();

    assert!(report.wager.is_placed());
    assert!(matches!(report.claim, ClaimOutcome::ScanFailed(ref m) if m.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn test_pool_read_failure_aborts_before_claiming() {
    let ledger = Arc::new(MockLedger::new());
    for epoch in 14..=17 {
        ledger.set_won(epoch, dec!(0.004));
    }
    ledger.hang_reads_for(20);

    let mut c = controller(&ledger, &config());
    let err = c.run_cycle(20).await.unwrap_err();

    assert!(format!("{err:#}").contains("rounds"));
    assert!(ledger.wagers().is_empty());
    assert!(ledger.claims().is_empty());
    assert_eq!(c.current_wait(), Duration::from_millis(270_000));
}

#[tokio::test(start_paused = true)]
async fn test_queued_round_keeps_its_own_wager_time() {
    let ledger = Arc::new(MockLedger::new());
    ledger.hang_wagers();

    let mut c = controller(&ledger, &config());
    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(async move {
        c.run(rx).await.unwrap();
        c
    });

    let t0 = Instant::now();
    tx.send(RoundStart::now(10)).await.unwrap();

    // Round 10 is still waiting on its confirmation when round 11 starts.
    tokio::time::sleep(Duration::from_secs(300)).await;
    ledger.clear_errors();
    tx.send(RoundStart::now(11)).await.unwrap();
    drop(tx);
    let c = worker.await.unwrap();

    // Round 10 timed out at t=330 and shrank the wait to 264s, so round
    // 11 goes out at 300 + 264 regardless of when it was dequeued.
    let wagers = ledger.wagers();
    assert_eq!(wagers.len(), 1);
    assert_eq!(wagers[0].epoch, 11);
    let sent = wagers[0].sent_at.duration_since(t0);
    assert!(sent >= Duration::from_secs(564) && sent < Duration::from_secs(565));
    assert_eq!(c.cycle_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_round_queued_past_its_wager_time_is_skipped() {
    let ledger = Arc::new(MockLedger::new());
    ledger.hang_wagers();

    let mut c = controller(&ledger, &config());
    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(async move {
        c.run(rx).await.unwrap();
        c
    });

    tx.send(RoundStart::now(10)).await.unwrap();

    // Round 11 would be due at 50 + 264 = 314, before round 10 finishes at 330.
    tokio::time::sleep(Duration::from_secs(50)).await;
    ledger.clear_errors();
    tx.send(RoundStart::now(11)).await.unwrap();
    drop(tx);
    let c = worker.await.unwrap();

    assert_eq!(c.cycle_count(), 2);
    assert!(ledger.wagers().is_empty());
    // Skipping is not a submission failure.
    assert_eq!(c.current_wait(), Duration::from_millis(264_000));
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_sends_nothing() {
    let ledger = Arc::new(MockLedger::new());
    for epoch in 14..=17 {
        ledger.set_won(epoch, dec!(0.004));
    }

    let mut cfg = config();
    cfg.agent.dry_run = true;
    let mut c = controller(&ledger, &cfg);
    let report = c.run_cycle(20).await.unwrap();

    assert!(report.wager.is_placed());
    assert!(matches!(report.claim, ClaimOutcome::Claimed { .. }));
    assert!(ledger.wagers().is_empty());
    assert!(ledger.claims().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watch_and_run_process_newest_round() {
    let ledger = Arc::new(MockLedger::new());
    ledger.queue_round_starts(&[10, 11, 12]);

    let (tx, rx) = mpsc::channel(8);
    ledger.watch_round_starts(tx).await.unwrap();

    let mut c = controller(&ledger, &config());
    c.run(rx).await.unwrap();

    assert_eq!(c.cycle_count(), 1);
    assert_eq!(ledger.wagers().len(), 1);
    assert_eq!(ledger.wagers()[0].epoch, 12);
}

#[test]
fn test_unknown_strategy_rejected() {
    let ledger: Arc<dyn PredictionLedger> = Arc::new(MockLedger::new());
    let mut cfg = config();
    cfg.betting.strategy = "random".into();
    assert!(RoundController::from_config(&cfg, ledger).is_err());
}
