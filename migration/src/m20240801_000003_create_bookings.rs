use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20240801_000002_create_routes::Route;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(PlanType::Enum)
                    .values([
                        PlanType::Weekly,
                        PlanType::BiWeekly,
                        PlanType::Monthly,
                        PlanType::Semester,
                        PlanType::Annual,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(BookingStatus::Enum)
                    .values([
                        BookingStatus::Pending,
                        BookingStatus::AwaitingApproval,
                        BookingStatus::Active,
                        BookingStatus::Cancelled,
                        BookingStatus::Expired,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Booking::Table)
                    .if_not_exists()
                    .col(uuid(Booking::Id).primary_key())
                    .col(uuid(Booking::StudentId).not_null())
                    .col(uuid(Booking::RouteId).not_null())
                    .col(uuid_null(Booking::PickupPointId))
                    .col(uuid_null(Booking::DropoffPointId))
                    .col(uuid(Booking::BookedBy).not_null())
                    .col(ColumnDef::new(Booking::PlanType).custom(PlanType::Enum).not_null())
                    .col(ColumnDef::new(Booking::Status).custom(BookingStatus::Enum).not_null())
                    .col(date(Booking::StartDate).not_null())
                    .col(date_null(Booking::EndDate))
                    .col(decimal_len(Booking::PriceAmount, 12, 2).not_null())
                    .col(string_len(Booking::Currency, 3).not_null())
                    .col(string_len_null(Booking::ExternalPaymentRef, 255))
                    .col(
                        timestamp_with_time_zone(Booking::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Booking::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Booking::DeletedAt))
                    .check(
                        Expr::col(Booking::EndDate)
                            .is_null()
                            .or(Expr::col(Booking::EndDate).gte(Expr::col(Booking::StartDate))),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_route")
                            .from(Booking::Table, Booking::RouteId)
                            .to(Route::Table, Route::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Capacity counts and sweeps both filter on these
        manager
            .create_index(
                Index::create()
                    .name("idx_booking_route_status")
                    .table(Booking::Table)
                    .col(Booking::RouteId)
                    .col(Booking::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_student")
                    .table(Booking::Table)
                    .col(Booking::StudentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Booking::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(BookingStatus::Enum).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(PlanType::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Booking {
    Table,
    Id,
    StudentId,
    RouteId,
    PickupPointId,
    DropoffPointId,
    BookedBy,
    PlanType,
    Status,
    StartDate,
    EndDate,
    PriceAmount,
    Currency,
    ExternalPaymentRef,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
pub enum PlanType {
    #[sea_orm(iden = "plan_type")]
    Enum,
    #[sea_orm(iden = "weekly")]
    Weekly,
    #[sea_orm(iden = "bi_weekly")]
    BiWeekly,
    #[sea_orm(iden = "monthly")]
    Monthly,
    #[sea_orm(iden = "semester")]
    Semester,
    #[sea_orm(iden = "annual")]
    Annual,
}

#[derive(DeriveIden)]
pub enum BookingStatus {
    #[sea_orm(iden = "booking_status")]
    Enum,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "awaiting_approval")]
    AwaitingApproval,
    #[sea_orm(iden = "active")]
    Active,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
    #[sea_orm(iden = "expired")]
    Expired,
}
