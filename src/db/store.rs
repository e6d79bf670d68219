use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    sqlx, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RuntimeErr, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::engine::store::{Admission, BookingStore, NewBooking, StatusChange};
use crate::engine::StoreError;
use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::entities::{pricing_rule, route, sweep_lease};

const SWEEP_LEASE: &str = "status_sweep";

/// SQLSTATE `lock_not_available`, raised when `lock_timeout` elapses.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Postgres-backed booking store.
///
/// Admission takes `SELECT ... FOR UPDATE` on the route row, so concurrent
/// admissions for one route queue on that row while other routes proceed.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e))) => {
            e.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

fn is_lock_timeout(err: &DbErr) -> bool {
    sqlstate(err).as_deref() == Some(LOCK_NOT_AVAILABLE)
}

/// Postgres reads `lock_timeout = 0` as "wait forever", so anything below a
/// millisecond is rounded up.
fn lock_timeout_statement(timeout: Duration) -> String {
    format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1))
}

#[async_trait]
impl BookingStore for SeaOrmStore {
    async fn find_route(&self, route_id: Uuid) -> Result<Option<route::Model>, StoreError> {
        Ok(route::Entity::find_by_id(route_id).one(&self.db).await?)
    }

    async fn active_routes(&self) -> Result<Vec<route::Model>, StoreError> {
        Ok(route::Entity::find()
            .filter(route::Column::Active.eq(true))
            .order_by_asc(route::Column::Name)
            .all(&self.db)
            .await?)
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<booking::Model>, StoreError> {
        Ok(booking::Entity::find_by_id(booking_id).one(&self.db).await?)
    }

    async fn bookings_by(&self, booked_by: Uuid) -> Result<Vec<booking::Model>, StoreError> {
        Ok(booking::Entity::find()
            .filter(booking::Column::BookedBy.eq(booked_by))
            .filter(booking::Column::DeletedAt.is_null())
            .order_by_desc(booking::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn count_occupying(&self, route_id: Uuid) -> Result<i64, StoreError> {
        let count = booking::Entity::find()
            .filter(booking::Column::RouteId.eq(route_id))
            .filter(booking::Column::Status.is_in(BookingStatus::OCCUPYING))
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }

    async fn insert_within_capacity(
        &self,
        new_booking: NewBooking,
        lock_timeout: Duration,
    ) -> Result<Admission, StoreError> {
        let txn = self.db.begin().await?;
        txn.execute_unprepared(&lock_timeout_statement(lock_timeout))
            .await?;

        let locked = route::Entity::find_by_id(new_booking.route_id)
            .lock_exclusive()
            .one(&txn)
            .await;
        let route = match locked {
            Ok(route) => route,
            Err(e) if is_lock_timeout(&e) => {
                txn.rollback().await?;
                return Ok(Admission::Busy);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(route) = route.filter(|r| r.active) else {
            txn.rollback().await?;
            return Ok(Admission::RouteUnavailable);
        };

        let duplicates = booking::Entity::find()
            .filter(booking::Column::RouteId.eq(route.id))
            .filter(booking::Column::StudentId.eq(new_booking.student_id))
            .filter(booking::Column::Status.is_in(BookingStatus::OCCUPYING))
            .count(&txn)
            .await?;
        if duplicates > 0 {
            txn.rollback().await?;
            return Ok(Admission::Duplicate);
        }

        let occupied = booking::Entity::find()
            .filter(booking::Column::RouteId.eq(route.id))
            .filter(booking::Column::Status.is_in(BookingStatus::OCCUPYING))
            .count(&txn)
            .await? as i64;
        let available = i64::from(route.capacity) - occupied;
        if available < 1 {
            txn.rollback().await?;
            return Ok(Admission::Full {
                available: available.max(0),
            });
        }

        let inserted = new_booking.into_active_model().insert(&txn).await?;
        txn.commit().await?;

        Ok(Admission::Admitted(inserted))
    }

    async fn apply_status_change(
        &self,
        change: StatusChange<'_>,
    ) -> Result<Option<booking::Model>, StoreError> {
        let mut update = booking::ActiveModel {
            status: Set(change.to),
            updated_at: Set(change.at.into()),
            ..Default::default()
        };
        if let Some(payment_ref) = change.payment_ref {
            update.external_payment_ref = Set(Some(payment_ref.to_string()));
        }

        let updated = booking::Entity::update_many()
            .set(update)
            .filter(booking::Column::Id.eq(change.booking_id))
            .filter(booking::Column::Status.is_in(change.from.iter().copied()))
            .exec_with_returning(&self.db)
            .await?;

        Ok(updated.into_iter().next())
    }

    async fn record_payment_ref(
        &self,
        booking_id: Uuid,
        payment_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = booking::Entity::update_many()
            .set(booking::ActiveModel {
                external_payment_ref: Set(Some(payment_ref.to_string())),
                updated_at: Set(at.into()),
                ..Default::default()
            })
            .filter(booking::Column::Id.eq(booking_id))
            .filter(booking::Column::ExternalPaymentRef.is_null())
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn pricing_rules(
        &self,
        plan_type: PlanType,
    ) -> Result<Vec<pricing_rule::Model>, StoreError> {
        Ok(pricing_rule::Entity::find()
            .filter(pricing_rule::Column::PlanType.eq(plan_type))
            .filter(pricing_rule::Column::Active.eq(true))
            .all(&self.db)
            .await?)
    }

    async fn non_terminal_bookings(&self) -> Result<Vec<booking::Model>, StoreError> {
        Ok(booking::Entity::find()
            .filter(booking::Column::Status.is_in(BookingStatus::OCCUPYING))
            .order_by_asc(booking::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn acquire_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        sweep_lease::Entity::insert(sweep_lease::ActiveModel {
            name: Set(SWEEP_LEASE.to_string()),
            holder: Set(None),
            locked_until: Set(None),
        })
        .on_conflict(
            OnConflict::column(sweep_lease::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.db)
        .await?;

        let result = sweep_lease::Entity::update_many()
            .set(sweep_lease::ActiveModel {
                holder: Set(Some(holder)),
                locked_until: Set(Some((now + ttl).into())),
                ..Default::default()
            })
            .filter(sweep_lease::Column::Name.eq(SWEEP_LEASE))
            .filter(
                Condition::any()
                    .add(sweep_lease::Column::LockedUntil.is_null())
                    .add(sweep_lease::Column::LockedUntil.lt(now)),
            )
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn renew_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sweep_lease::Entity::update_many()
            .set(sweep_lease::ActiveModel {
                locked_until: Set(Some((now + ttl).into())),
                ..Default::default()
            })
            .filter(sweep_lease::Column::Name.eq(SWEEP_LEASE))
            .filter(sweep_lease::Column::Holder.eq(holder))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn release_sweep_lease(&self, holder: Uuid) -> Result<(), StoreError> {
        sweep_lease::Entity::update_many()
            .set(sweep_lease::ActiveModel {
                holder: Set(None),
                locked_until: Set(None),
                ..Default::default()
            })
            .filter(sweep_lease::Column::Name.eq(SWEEP_LEASE))
            .filter(sweep_lease::Column::Holder.eq(holder))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_never_renders_as_zero() {
        assert_eq!(
            lock_timeout_statement(Duration::ZERO),
            "SET LOCAL lock_timeout = '1ms'"
        );
        assert_eq!(
            lock_timeout_statement(Duration::from_micros(500)),
            "SET LOCAL lock_timeout = '1ms'"
        );
        assert_eq!(
            lock_timeout_statement(Duration::from_secs(2)),
            "SET LOCAL lock_timeout = '2000ms'"
        );
    }

    #[test]
    fn test_lock_timeout_is_detected_by_sqlstate_not_message() {
        let english = DbErr::Custom("canceling statement due to lock timeout".to_string());
        assert!(!is_lock_timeout(&english));
        assert!(!is_lock_timeout(&DbErr::RecordNotFound("route".to_string())));
    }
}
