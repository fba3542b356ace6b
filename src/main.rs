//! ROUNDBOT — Autonomous epoch-based prediction market agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! checks the signing key, connects to the prediction contract and runs
//! the round loop until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use roundbot::config::{self, AppConfig, ConfigError};
use roundbot::engine::RoundController;
use roundbot::ledger::bsc::BscLedger;
use roundbot::ledger::{bounded_read, PredictionLedger};
use roundbot::types::RoundStart;

const BANNER: &str = r#"
 ____   ___  _   _ _   _ ____  ____   ___ _____
|  _ \ / _ \| | | | \ | |  _ \| __ ) / _ \_   _|
| |_) | | | | | | |  \| | | | |  _ \| | | || |
|  _ <| |_| | |_| | |\  | |_| | |_) | |_| || |
|_| \_\\___/ \___/|_| \_|____/|____/ \___/ |_|

  Epoch-based prediction market agent
  v0.1.0
"#;

/// Exit code for fatal configuration problems.
const EXIT_CONFIG: i32 = 2;

/// Round-start epochs buffered while a cycle is running.
const ROUND_QUEUE_DEPTH: usize = 16;

/// Delay before re-subscribing after the event stream fails.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "roundbot")]
#[command(about = "Autonomous agent for epoch-based prediction markets")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Side-selection strategy (contrarian, majority, bull, bear)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Log wagers and claims without sending transactions
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let mut cfg = match AppConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => exit_config(e),
    };
    if let Some(strategy) = cli.strategy {
        cfg.betting.strategy = strategy;
    }
    if cli.dry_run {
        cfg.agent.dry_run = true;
    }

    init_logging();
    println!("{BANNER}");

    let private_key = match startup_checks(&cfg) {
        Ok(key) => key,
        Err(e) => exit_config(e),
    };

    info!(
        agent_name = %cfg.agent.name,
        base_stake = %cfg.betting.base_stake,
        cap_stake = %cfg.betting.cap_stake,
        strategy = %cfg.betting.strategy,
        wait_ms = cfg.timing.wait_ms,
        dry_run = cfg.agent.dry_run,
        key = %config::redact(&private_key),
        "ROUNDBOT starting up"
    );

    let contract = match cfg.contract_address() {
        Ok(c) => c,
        Err(e) => exit_config(e),
    };
    let ledger: Arc<dyn PredictionLedger> = Arc::new(BscLedger::connect(
        &cfg.chain.rpc_url,
        contract,
        cfg.chain.chain_id,
        &private_key,
        cfg.block_interval(),
    )?);

    match bounded_read(cfg.read_timeout(), "currentEpoch", ledger.current_epoch()).await {
        Ok(epoch) => info!(epoch, "Contract is live. New rounds can take up to 5 min."),
        Err(e) => warn!(error = %format!("{e:#}"), "Could not read current epoch"),
    }

    let mut controller = match RoundController::from_config(&cfg, ledger.clone()) {
        Ok(c) => c,
        Err(e) => exit_config(e),
    };

    let (tx, rx) = mpsc::channel(ROUND_QUEUE_DEPTH);
    let watcher = tokio::spawn(watch_rounds(ledger, tx));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        result = controller.run(rx) => {
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "Round loop failed");
            }
        }
        _ = &mut shutdown => {
            info!("Shutdown signal received.");
        }
    }

    watcher.abort();
    info!(cycles = controller.cycle_count(), "ROUNDBOT shut down cleanly.");
    Ok(())
}

/// Report a configuration problem and stop with [`EXIT_CONFIG`].
fn exit_config(e: ConfigError) -> ! {
    error!(error = %e, "Configuration rejected");
    eprintln!("{e}");
    std::process::exit(EXIT_CONFIG);
}

/// Fail fast on anything that would make every cycle fail.
fn startup_checks(cfg: &AppConfig) -> Result<secrecy::SecretString, ConfigError> {
    let key = cfg.private_key()?;
    cfg.validate()?;
    Ok(key)
}

/// Keep the round-start subscription alive, re-subscribing on errors.
async fn watch_rounds(ledger: Arc<dyn PredictionLedger>, tx: mpsc::Sender<RoundStart>) {
    loop {
        match ledger.watch_round_starts(tx.clone()).await {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Round watch failed, re-subscribing");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        }
        if tx.is_closed() {
            return;
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roundbot=info"));

    if std::env::var("ROUNDBOT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
