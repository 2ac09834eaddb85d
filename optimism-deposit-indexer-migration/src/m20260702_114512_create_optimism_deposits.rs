use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(
            "
        CREATE TABLE optimism_deposits (
            l1_transaction_hash BYTEA NOT NULL,
            l1_transaction_origin BYTEA NOT NULL,
            l2_transaction_hash BYTEA NOT NULL,
            l1_block_number BIGINT NOT NULL,
            l1_block_timestamp TIMESTAMP,
            inserted_at TIMESTAMP NOT NULL DEFAULT NOW(),
            PRIMARY KEY (l1_transaction_hash, l1_transaction_origin, l2_transaction_hash)
        );

        CREATE INDEX idx_optimism_deposits_l1_block_number ON optimism_deposits(l1_block_number);
        CREATE INDEX idx_optimism_deposits_l1_tx_hash ON optimism_deposits(l1_transaction_hash);
        ",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE optimism_deposits")
            .await?;

        Ok(())
    }
}
