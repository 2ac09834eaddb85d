use alloy_primitives::{Address, TxHash};
use anyhow::Result;
use chrono::{DateTime, Utc};
use optimism_deposit_indexer_entity::optimism_deposits;
use sea_orm::Set;
use std::sync::Arc;

/// Ingestion mode of the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Pulling historical logs in bounded windows up to the safe head.
    CatchUp,
    /// Polling an installed log filter for new and removed logs.
    Realtime,
}

/// A deposit row derived from one `TransactionDeposited` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    pub l1_block_number: u64,
    pub l1_block_timestamp: Option<DateTime<Utc>>,
    pub l1_transaction_hash: TxHash,
    pub l1_transaction_origin: Address,
    pub l2_transaction_hash: TxHash,
}

impl From<DepositRecord> for optimism_deposits::ActiveModel {
    fn from(v: DepositRecord) -> Self {
        Self {
            l1_block_number: Set(v.l1_block_number as i64),
            l1_block_timestamp: Set(v.l1_block_timestamp.map(|t| t.naive_utc())),
            l1_transaction_hash: Set(v.l1_transaction_hash.as_slice().into()),
            l1_transaction_origin: Set(v.l1_transaction_origin.as_slice().into()),
            l2_transaction_hash: Set(v.l2_transaction_hash.as_slice().into()),
            inserted_at: Default::default(),
        }
    }
}

impl TryFrom<optimism_deposits::Model> for DepositRecord {
    type Error = anyhow::Error;

    fn try_from(value: optimism_deposits::Model) -> Result<Self> {
        Ok(Self {
            l1_block_number: value.l1_block_number.try_into()?,
            l1_block_timestamp: value.l1_block_timestamp.map(|t| t.and_utc()),
            l1_transaction_hash: value.l1_transaction_hash.as_slice().try_into()?,
            l1_transaction_origin: value.l1_transaction_origin.as_slice().try_into()?,
            l2_transaction_hash: value.l2_transaction_hash.as_slice().try_into()?,
        })
    }
}

/// Batch notification published to subscribers after each successful import.
#[derive(Debug, Clone)]
pub struct NewDeposits {
    pub records: Arc<Vec<DepositRecord>>,
}
