use alloy_primitives::Address;
use lazy_static::lazy_static;
use prometheus::{opts, register_gauge, Gauge};
use serde::Deserialize;
use serde_with::serde_as;
use std::time::Duration;

pub mod abi;
pub mod client;
pub mod deposit;
pub mod fetcher;
pub mod repository;
pub mod types;
pub mod well_known;

pub use fetcher::Fetcher;

lazy_static! {
    static ref LAST_L1_BLOCK_GAUGE: Gauge = register_gauge!(opts!(
        "optimism_deposits_last_l1_block",
        "Highest L1 block with imported deposits.",
    ))
    .unwrap();
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FetcherSettings {
    /// L1 JSON-RPC endpoint.
    pub l1_rpc_url: String,

    /// Address of the L1 SystemConfig contract.
    pub l1_system_config: Address,

    /// Maximum number of L1 blocks per catch-up window.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// EIP-2718 type byte used when hashing derived L2 deposit transactions.
    #[serde(default = "default_transaction_type")]
    pub transaction_type: u8,

    /// Delay before a failed step is re-entered.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Delay before the supervision loop restarts a stopped fetcher.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_restart_delay")]
    pub restart_delay: Duration,
}

impl FetcherSettings {
    pub fn new(l1_rpc_url: String, l1_system_config: Address) -> Self {
        Self {
            l1_rpc_url,
            l1_system_config,
            batch_size: default_batch_size(),
            transaction_type: default_transaction_type(),
            retry_interval: default_retry_interval(),
            restart_delay: default_restart_delay(),
        }
    }
}

fn default_batch_size() -> u64 {
    500
}

fn default_transaction_type() -> u8 {
    well_known::DEPOSIT_TX_TYPE
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(180)
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(60)
}
