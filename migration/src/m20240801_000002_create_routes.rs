use sea_orm_migration::{prelude::*, schema::*};

use super::m20240801_000001_create_vehicles::Vehicle;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Route::Table)
                    .if_not_exists()
                    .col(uuid(Route::Id).primary_key())
                    .col(string_len(Route::Name, 100).not_null())
                    .col(uuid_null(Route::VehicleId).unique_key())
                    .col(string_len_null(Route::VehicleType, 50))
                    // Copied from the vehicle on assignment
                    .col(integer(Route::Capacity).not_null().default(0))
                    .col(boolean(Route::Active).not_null().default(true))
                    .col(boolean(Route::RequiresPickup).not_null().default(false))
                    .col(
                        timestamp_with_time_zone(Route::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::col(Route::Capacity).gte(0))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_route_vehicle")
                            .from(Route::Table, Route::VehicleId)
                            .to(Vehicle::Table, Vehicle::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Route::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Route {
    Table,
    Id,
    Name,
    VehicleId,
    VehicleType,
    Capacity,
    Active,
    RequiresPickup,
    CreatedAt,
}
