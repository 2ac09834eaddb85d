//! The deposit fetcher: a single task that catches up from its start block to
//! the L1 safe head in bounded windows, then polls an installed log filter,
//! reconciling reorged blocks as they surface.

use crate::{
    client::L1Client,
    deposit, repository,
    types::{DepositRecord, Mode, NewDeposits},
    well_known::SECS_PER_L1_BLOCK,
    FetcherSettings, LAST_L1_BLOCK_GAUGE,
};
use alloy::rpc::types::Log;
use alloy_primitives::{Address, U256};
use anyhow::{ensure, Result};
use sea_orm::DatabaseConnection;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Ingests `TransactionDeposited` events emitted by the OptimismPortal
/// contract and keeps the `optimism_deposits` table consistent across L1
/// reorgs.
///
/// All state lives on this struct and is only touched from [`Fetcher::run`];
/// there is no shared mutation.
pub struct Fetcher {
    db: Arc<DatabaseConnection>,
    client: L1Client,
    settings: FetcherSettings,
    events: broadcast::Sender<NewDeposits>,

    mode: Mode,
    start_block: u64,
    from_block: u64,
    safe_block: u64,
    optimism_portal: Address,
    filter_id: Option<U256>,
    check_interval: Duration,
}

impl Fetcher {
    pub async fn new(
        db: Arc<DatabaseConnection>,
        settings: FetcherSettings,
        events: broadcast::Sender<NewDeposits>,
    ) -> Result<Self> {
        ensure!(
            !settings.l1_rpc_url.is_empty(),
            "L1 RPC URL is not configured"
        );
        ensure!(
            settings.l1_system_config != Address::ZERO,
            "SystemConfig contract address is not configured"
        );
        ensure!(settings.batch_size > 0, "batch size must be positive");

        let client = L1Client::connect(&settings.l1_rpc_url).await?;

        Ok(Self {
            db,
            client,
            settings,
            events,
            mode: Mode::CatchUp,
            start_block: 0,
            from_block: 0,
            safe_block: 0,
            optimism_portal: Address::ZERO,
            filter_id: None,
            check_interval: Duration::from_secs(SECS_PER_L1_BLOCK),
        })
    }

    /// Drives the fetcher until cancelled. Only configuration and consistency
    /// errors detected during bootstrap propagate; everything after that is
    /// absorbed with delayed re-entries.
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancellation.cancelled() => return Ok(()),
            res = self.bootstrap() => res?,
        }

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = self.step() => {}
            }
        }

        self.terminate().await;
        Ok(())
    }

    async fn step(&mut self) {
        match self.mode {
            Mode::CatchUp => self.catch_up_step().await,
            Mode::Realtime => self.poll_step().await,
        }
    }

    /// Reads the SystemConfig contract, validates the persisted state against
    /// the chain and computes the resume point.
    #[instrument(skip_all)]
    async fn bootstrap(&mut self) -> Result<()> {
        let (portal, start_block) = self
            .client
            .system_config_params(self.settings.l1_system_config)
            .await?;
        ensure!(start_block > 0, "SystemConfig reports a zero start block");

        let (last_block, last_tx_hash) =
            repository::deposits::last_l1_block_number(&*self.db).await?;
        if let Some(hash) = last_tx_hash {
            ensure!(
                self.client.transaction_exists(hash).await?,
                "last indexed L1 transaction {hash} is no longer on chain, manual intervention required"
            );
        }
        ensure!(
            last_block == 0 || start_block <= last_block,
            "SystemConfig start block {start_block} is ahead of the indexed state ({last_block})"
        );

        let safe_block = self.client.safe_block_number().await?;
        ensure!(
            start_block <= safe_block,
            "SystemConfig start block {start_block} is ahead of the L1 safe head ({safe_block})"
        );

        self.optimism_portal = portal;
        self.start_block = start_block;
        self.from_block = start_block.max(last_block);
        self.safe_block = safe_block;
        self.mode = Mode::CatchUp;

        info!(
            portal = %portal,
            start_block,
            from_block = self.from_block,
            safe_block,
            "bootstrapped the deposit fetcher"
        );
        Ok(())
    }

    /// One catch-up window: fetch, derive, import, publish, advance.
    async fn catch_up_step(&mut self) {
        if self.from_block > self.safe_block {
            self.enter_realtime().await;
            return;
        }

        let (from_block, to_block) =
            catch_up_window(self.from_block, self.safe_block, self.settings.batch_size);
        let logs = match self
            .client
            .deposit_logs_in_range(self.optimism_portal, from_block, to_block)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                warn!(?err, from_block, to_block, "failed to fetch deposit logs, will retry");
                self.pause().await;
                return;
            }
        };

        let records = self.derive_records(&logs).await;
        if let Err(err) = repository::deposits::upsert_deposits(&*self.db, &records).await {
            warn!(?err, from_block, to_block, "failed to import deposits, will retry");
            self.pause().await;
            return;
        }
        debug!(from_block, to_block, deposits = records.len(), "imported a catch-up window");
        LAST_L1_BLOCK_GAUGE.set(to_block as f64);
        self.publish(records);

        if to_block == self.safe_block {
            self.enter_realtime().await;
        } else {
            self.from_block = to_block + 1;
        }
    }

    /// Transition out of catch-up: close the gap to the head, install the log
    /// filter and start polling. Falls back to catch-up when the safe head has
    /// moved more than one batch ahead during the switch.
    async fn enter_realtime(&mut self) {
        let new_safe = loop {
            match self.client.safe_block_number().await {
                Ok(safe) => break safe,
                Err(err) => {
                    warn!(?err, "failed to refresh the safe head, will retry");
                    self.pause().await;
                }
            }
        };

        if fell_behind(self.safe_block, new_safe, self.settings.batch_size) {
            info!(
                safe_block = self.safe_block,
                new_safe, "fell behind during the mode switch, staying in catch-up"
            );
            self.safe_block = new_safe;
            return;
        }

        let gap_start = self.safe_block.max(self.from_block);
        let gap_logs = loop {
            match self
                .client
                .deposit_logs_from(self.optimism_portal, gap_start)
                .await
            {
                Ok(logs) => break logs,
                Err(err) => {
                    warn!(?err, gap_start, "failed to fetch gap logs, will retry");
                    self.pause().await;
                }
            }
        };
        let filter_id = loop {
            match self
                .client
                .install_deposit_filter(self.optimism_portal, gap_start)
                .await
            {
                Ok(id) => break id,
                Err(err) => {
                    warn!(?err, "failed to install the deposit log filter, will retry");
                    self.pause().await;
                }
            }
        };
        self.check_interval = match self.client.block_interval(new_safe).await {
            Ok(interval) => interval,
            Err(err) => {
                warn!(?err, "failed to estimate the L1 block cadence, using the default");
                Duration::from_secs(SECS_PER_L1_BLOCK / 2)
            }
        };

        self.safe_block = new_safe;
        self.filter_id = Some(filter_id);
        self.mode = Mode::Realtime;
        info!(%filter_id, check_interval = ?self.check_interval, "switched to realtime mode");

        self.handle_logs(gap_logs).await;
    }

    /// One realtime poll of the installed filter.
    async fn poll_step(&mut self) {
        sleep(self.check_interval).await;

        let Some(filter_id) = self.filter_id else {
            self.update_filter().await;
            return;
        };
        match self.client.filter_changes(filter_id).await {
            Ok(logs) => self.handle_logs(logs).await,
            Err(err) => {
                warn!(?err, %filter_id, "deposit log filter poll failed, rebuilding the filter");
                self.filter_id = None;
                self.pause().await;
                self.update_filter().await;
            }
        }
    }

    /// Rebuilds the log filter from the persisted resume point. The in-memory
    /// position is deliberately ignored here: the database is the source of
    /// truth for what survived an import.
    async fn update_filter(&mut self) {
        loop {
            let (last_block, _) = match repository::deposits::last_l1_block_number(&*self.db).await
            {
                Ok(last) => last,
                Err(err) => {
                    warn!(?err, "failed to read the resume point, will retry");
                    self.pause().await;
                    continue;
                }
            };
            let from_block = if last_block == 0 {
                self.start_block
            } else {
                last_block + 1
            };

            match self
                .client
                .install_deposit_filter(self.optimism_portal, from_block)
                .await
            {
                Ok(id) => {
                    info!(filter_id = %id, from_block, "installed a fresh deposit log filter");
                    self.filter_id = Some(id);
                    return;
                }
                Err(err) => {
                    warn!(?err, "failed to install the deposit log filter, will retry");
                    self.pause().await;
                }
            }
        }
    }

    /// Shared log-processing path for gap fetches and filter polls: reconcile
    /// reorged blocks first, then derive and import the surviving logs.
    async fn handle_logs(&mut self, logs: Vec<Log>) {
        let (reorged, kept) = split_removed(logs);

        if !reorged.is_empty() {
            loop {
                match repository::deposits::delete_by_l1_blocks(&*self.db, &reorged).await {
                    Ok(deleted) => {
                        info!(deleted, blocks = ?reorged, "removed deposits from reorged L1 blocks");
                        break;
                    }
                    Err(err) => {
                        warn!(?err, "failed to delete reorged deposits, will retry");
                        self.pause().await;
                    }
                }
            }
        }

        if kept.is_empty() {
            return;
        }
        let records = self.derive_records(&kept).await;
        if records.is_empty() {
            return;
        }

        loop {
            match repository::deposits::upsert_deposits(&*self.db, &records).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(?err, "failed to import deposits, will retry");
                    self.pause().await;
                }
            }
        }
        if let Some(max_block) = records.iter().map(|r| r.l1_block_number).max() {
            LAST_L1_BLOCK_GAUGE.set(max_block as f64);
        }
        debug!(deposits = records.len(), "imported realtime deposits");
        self.publish(records);
    }

    /// Derives records for a batch of logs, resolving block timestamps in one
    /// batched lookup. Timestamp failures degrade to null timestamps and
    /// undecodable logs are skipped, neither blocks the import.
    async fn derive_records(&self, logs: &[Log]) -> Vec<DepositRecord> {
        if logs.is_empty() {
            return Vec::new();
        }

        let numbers: BTreeSet<u64> = logs.iter().filter_map(|log| log.block_number).collect();
        let timestamps = match self.client.block_timestamps(&numbers).await {
            Ok(timestamps) => timestamps,
            Err(err) => {
                warn!(?err, "failed to resolve block timestamps, importing deposits without them");
                Default::default()
            }
        };

        logs.iter()
            .filter_map(|log| {
                deposit::record_from_log(log, self.settings.transaction_type, &timestamps)
                    .inspect_err(|err| warn!(%err, ?log, "skipping an undecodable deposit log"))
                    .ok()
            })
            .collect()
    }

    fn publish(&self, records: Vec<DepositRecord>) {
        if records.is_empty() {
            return;
        }
        // Best effort: nobody listening is fine.
        let _ = self.events.send(NewDeposits {
            records: Arc::new(records),
        });
    }

    async fn pause(&self) {
        sleep(self.settings.retry_interval).await;
    }

    /// Termination path: release the server-side filter if one is installed.
    async fn terminate(&mut self) {
        if let Some(filter_id) = self.filter_id.take() {
            if let Err(err) = self.client.uninstall_filter(filter_id).await {
                warn!(?err, %filter_id, "failed to uninstall the deposit log filter on shutdown");
            }
        }
    }
}

/// Inclusive catch-up window starting at `from_block`, capped by the batch
/// size and the safe head.
fn catch_up_window(from_block: u64, safe_block: u64, batch_size: u64) -> (u64, u64) {
    (from_block, (from_block + batch_size).min(safe_block))
}

/// True when the safe head moved more than one batch ahead while the fetcher
/// was preparing the switch to realtime mode.
fn fell_behind(safe_block: u64, new_safe: u64, batch_size: u64) -> bool {
    new_safe.saturating_sub(safe_block) + 1 > batch_size
}

/// Splits a filter response into the set of reorged block numbers and the
/// logs that are still canonical.
fn split_removed(logs: Vec<Log>) -> (BTreeSet<u64>, Vec<Log>) {
    let mut reorged = BTreeSet::new();
    let mut kept = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed {
            if let Some(number) = log.block_number {
                reorged.insert(number);
            }
        } else {
            kept.push(log);
        }
    }
    (reorged, kept)
}
