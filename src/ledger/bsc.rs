//! PancakeSwap Prediction V2 on BNB Smart Chain.
//!
//! Reads go straight to the contract. Writes are signed locally by a
//! `LocalWallet`; the nonce manager wraps the signer so it assigns every
//! nonce before signing, and a claim sent while a wager is still pending
//! takes the next nonce instead of replacing it. Round starts are
//! followed by polling the `StartRound` event filter over HTTP.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use ethers::contract::{abigen, ContractCall};
use ethers::middleware::{NonceManagerMiddleware, SignerMiddleware};
use ethers::providers::{Http, JsonRpcClient, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256, U64};
use futures::StreamExt;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::PredictionLedger;
use crate::types::{
    units, AgentError, Epoch, LedgerEntry, Position, RoundPools, RoundStart, Side, TxReceipt,
};

abigen!(
    PredictionV2,
    r#"[
        event StartRound(uint256 indexed epoch)
        function currentEpoch() external view returns (uint256)
        function claimable(uint256 epoch, address user) external view returns (bool)
        function refundable(uint256 epoch, address user) external view returns (bool)
        function ledger(uint256 epoch, address user) external view returns (uint8 position, uint256 amount, bool claimed)
        function rounds(uint256 epoch) external view returns (uint256 epoch, uint256 startTimestamp, uint256 lockTimestamp, uint256 closeTimestamp, int256 lockPrice, int256 closePrice, uint256 lockOracleId, uint256 closeOracleId, uint256 totalAmount, uint256 bullAmount, uint256 bearAmount, uint256 rewardBaseCalAmount, uint256 rewardAmount, bool oracleCalled)
        function betBull(uint256 epoch) external payable
        function betBear(uint256 epoch) external payable
        function claim(uint256[] epochs) external
    ]"#
);

type Signing<P> = NonceManagerMiddleware<SignerMiddleware<Provider<P>, LocalWallet>>;
type Client = Signing<Http>;

/// Layer the signer and nonce manager over `provider`.
fn signing_client<P: JsonRpcClient>(provider: Provider<P>, wallet: LocalWallet) -> Signing<P> {
    let participant = wallet.address();
    NonceManagerMiddleware::new(SignerMiddleware::new(provider, wallet), participant)
}

pub struct BscLedger {
    contract: PredictionV2<Client>,
    participant: Address,
}

impl BscLedger {
    /// Build a signing client for `contract` on `rpc_url`.
    ///
    /// `poll_interval` controls how often the event filter is polled.
    pub fn connect(
        rpc_url: &str,
        contract: Address,
        chain_id: u64,
        private_key: &SecretString,
        poll_interval: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC URL '{rpc_url}'"))?
            .interval(poll_interval);

        let wallet: LocalWallet = private_key
            .expose_secret()
            .parse()
            .context("Invalid private key")?;
        let wallet = wallet.with_chain_id(chain_id);
        let participant = wallet.address();

        let client = Arc::new(signing_client(provider, wallet));

        info!(
            contract = %format!("{contract:#x}"),
            participant = %format!("{participant:#x}"),
            chain_id,
            "Prediction contract client ready"
        );

        Ok(Self {
            contract: PredictionV2::new(contract, client),
            participant,
        })
    }

    /// Send a write call and wait for it to be mined.
    async fn confirm(call: ContractCall<Client, ()>, what: &'static str) -> Result<TxReceipt> {
        let pending = call
            .send()
            .await
            .with_context(|| format!("Failed to submit {what} transaction"))?;
        let tx_hash = pending.tx_hash();
        debug!(tx_hash = %format!("{tx_hash:#x}"), what, "Transaction submitted");

        let receipt = pending
            .await
            .with_context(|| format!("{what} transaction failed to confirm"))?
            .ok_or_else(|| anyhow!("{what} transaction dropped before confirmation"))?;

        if receipt.status == Some(U64::zero()) {
            bail!("{what} transaction reverted ({tx_hash:#x})");
        }

        Ok(TxReceipt {
            tx_hash: format!("{tx_hash:#x}"),
            block_number: receipt.block_number.map(|b| b.as_u64()),
            timestamp: Utc::now(),
        })
    }
}

fn to_epoch(raw: U256) -> Result<Epoch> {
    if raw > U256::from(u64::MAX) {
        bail!("epoch {raw} does not fit in u64");
    }
    Ok(raw.as_u64())
}

#[async_trait]
impl PredictionLedger for BscLedger {
    async fn watch_round_starts(&self, sink: mpsc::Sender<RoundStart>) -> Result<()> {
        let event = self.contract.start_round_filter();
        let mut stream = event
            .stream()
            .await
            .context("Failed to subscribe to StartRound events")?;

        info!("Subscribed to StartRound events");

        while let Some(item) = stream.next().await {
            match item {
                Ok(StartRoundFilter { epoch }) => {
                    let epoch = to_epoch(epoch)?;
                    debug!(epoch, "StartRound received");
                    if sink.send(RoundStart::now(epoch)).await.is_err() {
                        info!("Round receiver closed, stopping event watch");
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "Error receiving StartRound event"),
            }
        }

        Err(AgentError::StreamEnded.into())
    }

    async fn current_epoch(&self) -> Result<Epoch> {
        let raw = self
            .contract
            .current_epoch()
            .call()
            .await
            .context("currentEpoch call failed")?;
        to_epoch(raw)
    }

    async fn claimable(&self, epoch: Epoch, participant: Address) -> Result<bool> {
        self.contract
            .claimable(U256::from(epoch), participant)
            .call()
            .await
            .with_context(|| format!("claimable({epoch}) call failed"))
    }

    async fn refundable(&self, epoch: Epoch, participant: Address) -> Result<bool> {
        self.contract
            .refundable(U256::from(epoch), participant)
            .call()
            .await
            .with_context(|| format!("refundable({epoch}) call failed"))
    }

    async fn ledger(&self, epoch: Epoch, participant: Address) -> Result<LedgerEntry> {
        let (position, amount, claimed) = self
            .contract
            .ledger(U256::from(epoch), participant)
            .call()
            .await
            .with_context(|| format!("ledger({epoch}) call failed"))?;
        let staked = units::from_wei(amount)?;
        Ok(LedgerEntry {
            position: Position::from_ledger(position, staked),
            staked,
            claimed,
        })
    }

    async fn rounds(&self, epoch: Epoch) -> Result<RoundPools> {
        let round = self
            .contract
            .rounds(U256::from(epoch))
            .call()
            .await
            .with_context(|| format!("rounds({epoch}) call failed"))?;
        Ok(RoundPools {
            bull: units::from_wei(round.9)?,
            bear: units::from_wei(round.10)?,
        })
    }

    async fn place_wager(&self, epoch: Epoch, side: Side, amount: Decimal) -> Result<TxReceipt> {
        let value = units::to_wei(amount)?;
        let call = match side {
            Side::Bull => self.contract.bet_bull(U256::from(epoch)),
            Side::Bear => self.contract.bet_bear(U256::from(epoch)),
        }
        .value(value);
        Self::confirm(call, "wager").await
    }

    async fn claim(&self, epochs: Vec<Epoch>) -> Result<TxReceipt> {
        let epochs = epochs.into_iter().map(U256::from).collect();
        Self::confirm(self.contract.claim(epochs), "claim").await
    }

    fn participant(&self) -> Address {
        self.participant
    }
}
