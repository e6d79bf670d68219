use chrono::NaiveDate;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::booking::{BookingStatus, PlanType};

/// Failure inside a booking store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} is not a bookable date")]
    NotBookableDate(NaiveDate),

    #[error("route {0} not found")]
    RouteNotFound(Uuid),

    #[error("route {0} is not accepting bookings")]
    RouteInactive(Uuid),

    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("student {student_id} already holds a seat on route {route_id}")]
    DuplicateBooking { student_id: Uuid, route_id: Uuid },

    #[error("route {route_id} has {available} seat(s) available, {requested} requested")]
    CapacityExceeded {
        route_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("no {plan_type} price configured for route {route_id}")]
    PricingNotConfigured { plan_type: PlanType, route_id: Uuid },

    #[error("route {route_id} is busy after {attempts} attempt(s), please retry")]
    ConcurrencyConflict { route_id: Uuid, attempts: u32 },

    #[error("booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("booking {booking_id} is already paid under a different reference")]
    PaymentRefMismatch { booking_id: Uuid },

    #[error("a status sweep is already running")]
    SweepAlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Transient failures; the whole request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::ConcurrencyConflict { .. } | BookingError::Store(_)
        )
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

impl From<DbErr> for BookingError {
    fn from(err: DbErr) -> Self {
        BookingError::Store(StoreError::Database(err))
    }
}
