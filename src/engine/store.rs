use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::Set;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::entities::{pricing_rule, route};

use super::error::StoreError;
use super::pricing::Money;

/// A fully validated and priced booking, ready to be admitted.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub pickup_point_id: Option<Uuid>,
    pub dropoff_point_id: Option<Uuid>,
    pub booked_by: Uuid,
    pub plan_type: PlanType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price: Money,
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn into_model(self) -> booking::Model {
        booking::Model {
            id: self.id,
            student_id: self.student_id,
            route_id: self.route_id,
            pickup_point_id: self.pickup_point_id,
            dropoff_point_id: self.dropoff_point_id,
            booked_by: self.booked_by,
            plan_type: self.plan_type,
            status: BookingStatus::Pending,
            start_date: self.start_date,
            end_date: Some(self.end_date),
            price_amount: self.price.amount,
            currency: self.price.currency,
            external_payment_ref: None,
            created_at: self.created_at.into(),
            updated_at: self.created_at.into(),
            deleted_at: None,
        }
    }

    pub fn into_active_model(self) -> booking::ActiveModel {
        let model = self.into_model();
        booking::ActiveModel {
            id: Set(model.id),
            student_id: Set(model.student_id),
            route_id: Set(model.route_id),
            pickup_point_id: Set(model.pickup_point_id),
            dropoff_point_id: Set(model.dropoff_point_id),
            booked_by: Set(model.booked_by),
            plan_type: Set(model.plan_type),
            status: Set(model.status),
            start_date: Set(model.start_date),
            end_date: Set(model.end_date),
            price_amount: Set(model.price_amount),
            currency: Set(model.currency),
            external_payment_ref: Set(None),
            created_at: Set(model.created_at),
            updated_at: Set(model.updated_at),
            deleted_at: Set(None),
        }
    }
}

/// Result of an atomic count-and-insert attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(booking::Model),
    /// No seat left; nothing was written.
    Full { available: i64 },
    /// The student already occupies a seat on this route.
    Duplicate,
    /// Route vanished or was deactivated before the lock was taken.
    RouteUnavailable,
    /// The per-route lock was not acquired within the timeout.
    Busy,
}

/// Conditional status write: applied only while the booking is in one of `from`.
#[derive(Debug, Clone, Copy)]
pub struct StatusChange<'a> {
    pub booking_id: Uuid,
    pub from: &'a [BookingStatus],
    pub to: BookingStatus,
    pub payment_ref: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// Persistence seam of the booking engine.
///
/// Implementations must make [`BookingStore::insert_within_capacity`] atomic
/// per route: no interleaving of two calls may let the number of occupying
/// bookings exceed the route capacity.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find_route(&self, route_id: Uuid) -> Result<Option<route::Model>, StoreError>;

    async fn active_routes(&self) -> Result<Vec<route::Model>, StoreError>;

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<booking::Model>, StoreError>;

    async fn bookings_by(&self, booked_by: Uuid) -> Result<Vec<booking::Model>, StoreError>;

    /// Bookings holding a seat on the route, soft-deleted ones included.
    async fn count_occupying(&self, route_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_within_capacity(
        &self,
        booking: NewBooking,
        lock_timeout: Duration,
    ) -> Result<Admission, StoreError>;

    /// Returns the updated booking, or `None` when the status precondition no
    /// longer holds.
    async fn apply_status_change(
        &self,
        change: StatusChange<'_>,
    ) -> Result<Option<booking::Model>, StoreError>;

    /// Stores the payment reference if none is recorded yet. Returns whether
    /// a write happened.
    async fn record_payment_ref(
        &self,
        booking_id: Uuid,
        payment_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Active pricing rules for one plan type.
    async fn pricing_rules(
        &self,
        plan_type: PlanType,
    ) -> Result<Vec<pricing_rule::Model>, StoreError>;

    async fn non_terminal_bookings(&self) -> Result<Vec<booking::Model>, StoreError>;

    async fn acquire_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Pushes the lease expiry to `now + ttl` if `holder` still owns it.
    async fn renew_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release_sweep_lease(&self, holder: Uuid) -> Result<(), StoreError>;
}

/// External operational calendar.
#[async_trait]
pub trait BookingCalendar: Send + Sync {
    /// `false` for holidays and declared closures.
    async fn is_bookable(&self, date: NaiveDate) -> Result<bool, StoreError>;
}
