use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SweepLease::Table)
                    .if_not_exists()
                    .col(string_len(SweepLease::Name, 50).primary_key())
                    .col(uuid_null(SweepLease::Holder))
                    .col(timestamp_with_time_zone_null(SweepLease::LockedUntil))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SweepLease::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum SweepLease {
    Table,
    Name,
    Holder,
    LockedUntil,
}
