use sea_orm_migration::{prelude::*, schema::*};

use super::m20240801_000002_create_routes::Route;
use super::m20240801_000003_create_bookings::PlanType;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PricingRule::Table)
                    .if_not_exists()
                    .col(uuid(PricingRule::Id).primary_key())
                    .col(ColumnDef::new(PricingRule::PlanType).custom(PlanType::Enum).not_null())
                    .col(uuid_null(PricingRule::RouteId))
                    .col(string_len_null(PricingRule::VehicleType, 50))
                    .col(decimal_len(PricingRule::Amount, 12, 2).not_null())
                    .col(string_len(PricingRule::Currency, 3).not_null())
                    .col(boolean(PricingRule::Active).not_null().default(true))
                    .col(
                        timestamp_with_time_zone(PricingRule::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::col(PricingRule::Amount).gte(0))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pricing_rule_route")
                            .from(PricingRule::Table, PricingRule::RouteId)
                            .to(Route::Table, Route::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pricing_rule_plan_type")
                    .table(PricingRule::Table)
                    .col(PricingRule::PlanType)
                    .col(PricingRule::Active)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PricingRule::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PricingRule {
    Table,
    Id,
    PlanType,
    RouteId,
    VehicleType,
    Amount,
    Currency,
    Active,
    CreatedAt,
}
