//! Thin wrapper around the L1 JSON-RPC endpoint.
//!
//! Read requests get three in-call attempts with a short backoff; the caller
//! decides what a persistent failure means. Filter polling is the exception,
//! see [`L1Client::filter_changes`].

use crate::{abi::SystemConfig, well_known::TRANSACTION_DEPOSITED_SIG};
use alloy::{
    eips::BlockNumberOrTag,
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Block, Filter, Log},
};
use alloy_primitives::{Address, TxHash, U256};
use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    time::Duration,
};
use tokio::time::sleep;
use tracing::debug;

const RPC_ATTEMPTS: u32 = 3;
const RPC_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Trailing block span used to estimate the L1 block cadence.
const CADENCE_WINDOW: u64 = 100;

#[derive(Clone)]
pub struct L1Client {
    provider: RootProvider,
}

impl L1Client {
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .context("failed to connect to the L1 RPC endpoint")?;

        Ok(Self {
            provider: provider.root().clone(),
        })
    }

    /// Reads `(optimismPortal, startBlock)` from the SystemConfig contract.
    pub async fn system_config_params(&self, system_config: Address) -> Result<(Address, u64)> {
        let contract = SystemConfig::new(system_config, self.provider.clone());

        let portal = with_retries(|| async { contract.optimismPortal().call().await })
            .await
            .context("failed to read optimismPortal() from SystemConfig")?;
        let start_block = with_retries(|| async { contract.startBlock().call().await })
            .await
            .context("failed to read startBlock() from SystemConfig")?;
        let start_block = u64::try_from(start_block)
            .map_err(|_| anyhow!("SystemConfig start block {start_block} overflows u64"))?;

        Ok((portal, start_block))
    }

    /// Current L1 safe head number.
    pub async fn safe_block_number(&self) -> Result<u64> {
        let block = with_retries(|| async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Safe)
                .await
        })
        .await
        .context("failed to fetch the L1 safe block")?
        .ok_or_else(|| anyhow!("L1 node returned no safe block"))?;

        Ok(block.header.number)
    }

    /// `TransactionDeposited` logs in the inclusive `[from_block, to_block]`
    /// range.
    pub async fn deposit_logs_in_range(
        &self,
        portal: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = deposit_filter(portal, from_block).to_block(to_block);
        with_retries(|| self.provider.get_logs(&filter))
            .await
            .with_context(|| format!("failed to fetch deposit logs in [{from_block}, {to_block}]"))
    }

    /// `TransactionDeposited` logs from `from_block` up to the chain head.
    pub async fn deposit_logs_from(&self, portal: Address, from_block: u64) -> Result<Vec<Log>> {
        let filter = deposit_filter(portal, from_block).to_block(BlockNumberOrTag::Latest);
        with_retries(|| self.provider.get_logs(&filter))
            .await
            .with_context(|| format!("failed to fetch deposit logs from {from_block}"))
    }

    pub async fn transaction_exists(&self, hash: TxHash) -> Result<bool> {
        let transaction = with_retries(|| self.provider.get_transaction_by_hash(hash))
            .await
            .with_context(|| format!("failed to look up L1 transaction {hash}"))?;

        Ok(transaction.is_some())
    }

    /// Installs a server-side log filter for `TransactionDeposited` events
    /// from `from_block` onwards.
    pub async fn install_deposit_filter(&self, portal: Address, from_block: u64) -> Result<U256> {
        let filter = deposit_filter(portal, from_block).to_block(BlockNumberOrTag::Latest);
        with_retries(|| self.provider.new_filter(&filter))
            .await
            .context("failed to install the deposit log filter")
    }

    /// One poll of `eth_getFilterChanges`. Not retried in-call: a failure here
    /// means the filter must be rebuilt from the persisted resume point, and a
    /// filter-not-found response would never heal by retrying.
    pub async fn filter_changes(&self, filter_id: U256) -> Result<Vec<Log>> {
        self.provider
            .get_filter_changes::<Log>(filter_id)
            .await
            .context("failed to poll the deposit log filter")
    }

    pub async fn uninstall_filter(&self, filter_id: U256) -> Result<bool> {
        self.provider
            .uninstall_filter(filter_id)
            .await
            .context("failed to uninstall the deposit log filter")
    }

    /// Timestamps for the given block numbers, resolved in one batched
    /// `eth_getBlockByNumber` request.
    pub async fn block_timestamps(
        &self,
        numbers: &BTreeSet<u64>,
    ) -> Result<HashMap<u64, DateTime<Utc>>> {
        if numbers.is_empty() {
            return Ok(HashMap::new());
        }
        with_retries(|| self.fetch_block_timestamps(numbers)).await
    }

    async fn fetch_block_timestamps(
        &self,
        numbers: &BTreeSet<u64>,
    ) -> Result<HashMap<u64, DateTime<Utc>>> {
        let client = self.provider.client();
        let mut batch = alloy::rpc::client::BatchRequest::new(&client);

        let mut waiters = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let waiter = batch
                .add_call::<_, Option<Block>>(
                    "eth_getBlockByNumber",
                    &(BlockNumberOrTag::Number(number), false),
                )
                .context("failed to build the block timestamp batch")?;
            waiters.push((number, waiter));
        }
        batch
            .send()
            .await
            .context("failed to send the block timestamp batch")?;

        let mut timestamps = HashMap::with_capacity(waiters.len());
        for (number, waiter) in waiters {
            let block = waiter
                .await
                .with_context(|| format!("failed to fetch block {number}"))?
                .ok_or_else(|| anyhow!("L1 node returned no block {number}"))?;
            if let Some(timestamp) = DateTime::from_timestamp(block.header.timestamp as i64, 0) {
                timestamps.insert(number, timestamp);
            }
        }

        Ok(timestamps)
    }

    /// Polling interval estimated from the recent L1 block cadence, halved so
    /// a poll lands at least once per new block.
    pub async fn block_interval(&self, safe_block: u64) -> Result<Duration> {
        let span = CADENCE_WINDOW.min(safe_block);
        ensure!(span > 0, "not enough chain history to estimate the cadence");

        let newer = self.block_by_number(safe_block).await?;
        let older = self.block_by_number(safe_block - span).await?;
        let elapsed = newer.header.timestamp.saturating_sub(older.header.timestamp);
        ensure!(elapsed > 0, "zero elapsed time across the cadence window");

        Ok(Duration::from_millis((elapsed * 1000 / span / 2).max(1_000)))
    }

    async fn block_by_number(&self, number: u64) -> Result<Block> {
        with_retries(|| async { self.provider.get_block_by_number(number.into()).await })
            .await
            .with_context(|| format!("failed to fetch block {number}"))?
            .ok_or_else(|| anyhow!("L1 node returned no block {number}"))
    }
}

fn deposit_filter(portal: Address, from_block: u64) -> Filter {
    Filter::new()
        .address(portal)
        .event_signature(TRANSACTION_DEPOSITED_SIG)
        .from_block(from_block)
}

async fn with_retries<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RPC_ATTEMPTS => {
                debug!(%err, attempt, "L1 RPC request failed, backing off");
                sleep(RPC_RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
