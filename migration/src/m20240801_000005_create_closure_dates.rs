use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClosureDate::Table)
                    .if_not_exists()
                    .col(date(ClosureDate::Date).primary_key())
                    .col(string_len(ClosureDate::Reason, 255).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClosureDate::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ClosureDate {
    Table,
    Date,
    Reason,
}
