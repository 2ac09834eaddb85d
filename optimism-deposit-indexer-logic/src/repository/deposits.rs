use crate::types::DepositRecord;
use alloy_primitives::TxHash;
use anyhow::{Context, Result};
use optimism_deposit_indexer_entity::optimism_deposits;
use sea_orm::{prelude::*, sea_query::OnConflict, QueryOrder};
use std::collections::BTreeSet;
use tracing::instrument;

/// Imports a batch of deposits in one statement, idempotent on the composite
/// primary key.
#[instrument(skip_all, fields(deposits = records.len()))]
pub async fn upsert_deposits<T: ConnectionTrait>(db: &T, records: &[DepositRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let models: Vec<optimism_deposits::ActiveModel> =
        records.iter().cloned().map(Into::into).collect();

    optimism_deposits::Entity::insert_many(models)
        .on_conflict(
            OnConflict::columns([
                optimism_deposits::Column::L1TransactionHash,
                optimism_deposits::Column::L1TransactionOrigin,
                optimism_deposits::Column::L2TransactionHash,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .context("failed to insert deposits")?;

    Ok(())
}

/// Deletes every deposit whose L1 block is in `blocks`; returns the count.
#[instrument(skip(db))]
pub async fn delete_by_l1_blocks<T: ConnectionTrait>(db: &T, blocks: &BTreeSet<u64>) -> Result<u64> {
    if blocks.is_empty() {
        return Ok(0);
    }

    let blocks: Vec<i64> = blocks.iter().map(|&b| b as i64).collect();
    let result = optimism_deposits::Entity::delete_many()
        .filter(optimism_deposits::Column::L1BlockNumber.is_in(blocks))
        .exec(db)
        .await
        .context("failed to delete reorged deposits")?;

    Ok(result.rows_affected)
}

/// Highest indexed L1 block and its transaction hash, `(0, None)` when the
/// table is empty.
#[instrument(skip(db))]
pub async fn last_l1_block_number<T: ConnectionTrait>(db: &T) -> Result<(u64, Option<TxHash>)> {
    let row = optimism_deposits::Entity::find()
        .order_by_desc(optimism_deposits::Column::L1BlockNumber)
        .one(db)
        .await
        .context("failed to read the deposit resume point")?;

    match row {
        Some(row) => Ok((
            row.l1_block_number.try_into()?,
            Some(row.l1_transaction_hash.as_slice().try_into()?),
        )),
        None => Ok((0, None)),
    }
}
