pub use sea_orm_migration::prelude::*;

mod m20260702_114512_create_optimism_deposits;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(
            m20260702_114512_create_optimism_deposits::Migration,
        )]
    }

    fn migration_table_name() -> DynIden {
        Alias::new("optimism_deposit_indexer_migrations").into_iden()
    }
}
