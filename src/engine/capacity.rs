use std::sync::Arc;
use std::time::Duration;

use crate::entities::{booking, route};

use super::error::{BookingError, BookingResult};
use super::store::{Admission, BookingStore, NewBooking};

/// Seat-capacity enforcement for routes.
///
/// The count-then-insert sequence is delegated to
/// [`BookingStore::insert_within_capacity`], which runs it under a per-route
/// lock. A lock that cannot be taken in time is retried a bounded number of
/// times and then reported as [`BookingError::ConcurrencyConflict`].
pub struct CapacityGuard {
    store: Arc<dyn BookingStore>,
    lock_timeout: Duration,
    max_attempts: u32,
}

impl CapacityGuard {
    pub fn new(store: Arc<dyn BookingStore>, lock_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            lock_timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Seats left on the route. Never negative, even if the capacity was
    /// lowered below current occupancy.
    pub async fn available_seats(&self, route: &route::Model) -> BookingResult<i64> {
        let occupied = self.store.count_occupying(route.id).await?;
        Ok((i64::from(route.capacity) - occupied).max(0))
    }

    /// Reserve one seat by inserting `booking` as pending, or fail without
    /// writing anything.
    pub async fn admit(&self, booking: NewBooking) -> BookingResult<booking::Model> {
        let route_id = booking.route_id;
        let student_id = booking.student_id;

        for attempt in 1..=self.max_attempts {
            match self
                .store
                .insert_within_capacity(booking.clone(), self.lock_timeout)
                .await?
            {
                Admission::Admitted(model) => return Ok(model),
                Admission::Full { available } => {
                    tracing::info!(%route_id, available, "Route is full");
                    return Err(BookingError::CapacityExceeded {
                        route_id,
                        requested: 1,
                        available,
                    });
                }
                Admission::Duplicate => {
                    return Err(BookingError::DuplicateBooking {
                        student_id,
                        route_id,
                    });
                }
                Admission::RouteUnavailable => return Err(BookingError::RouteInactive(route_id)),
                Admission::Busy => {
                    tracing::warn!(%route_id, attempt, "Route lock busy");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        Err(BookingError::ConcurrencyConflict {
            route_id,
            attempts: self.max_attempts,
        })
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(25 * u64::from(attempt))
}
