use alloy_primitives::Address;
use anyhow::Result;
use clap::Parser;
use optimism_deposit_indexer_logic::{types::NewDeposits, Fetcher, FetcherSettings};
use optimism_deposit_indexer_migration::{Migrator, MigratorTrait};
use std::sync::Arc;
use tokio::{sync::broadcast, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Capacity of the new-deposits broadcast channel; slow subscribers lag
/// rather than block the fetcher.
const EVENTS_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(about = "Indexes OptimismPortal deposits from L1 into Postgres")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    db: String,

    #[arg(long, env = "INDEXER__OPTIMISM_L1_RPC")]
    l1_rpc_url: String,

    #[arg(long, env = "INDEXER__OPTIMISM_L1_SYSTEM_CONFIG")]
    l1_system_config: Address,

    /// Maximum number of L1 blocks per catch-up window.
    #[arg(long)]
    batch_size: Option<u64>,

    /// EIP-2718 type byte for derived L2 deposit transactions.
    #[arg(long)]
    transaction_type: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let cli = Cli::parse();

    let db = sea_orm::Database::connect(cli.db.as_str()).await?;
    Migrator::up(&db, None).await?;
    let db = Arc::new(db);

    let mut settings = FetcherSettings::new(cli.l1_rpc_url, cli.l1_system_config);
    if let Some(batch_size) = cli.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(transaction_type) = cli.transaction_type {
        settings.transaction_type = transaction_type;
    }

    let (events, _) = broadcast::channel::<NewDeposits>(EVENTS_CHANNEL_CAPACITY);

    let cancellation = CancellationToken::new();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            cancellation.cancel();
        }
    });

    let delay = settings.restart_delay;
    loop {
        let result = match Fetcher::new(db.clone(), settings.clone(), events.clone()).await {
            Ok(fetcher) => fetcher.run(cancellation.clone()).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => break,
            Err(err) => {
                error!(?err, ?delay, "deposit fetcher stopped with an error, retrying");
            }
        }
        if cancellation.is_cancelled() {
            break;
        }
        sleep(delay).await;
    }

    Ok(())
}
