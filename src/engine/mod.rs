//! Booking domain engine: pricing, capacity, lifecycle and the status sweep.
//!
//! [`BookingEngine`] is the single entry point used by HTTP handlers and the
//! scheduler. Storage, the operational calendar, the clock and the event sink
//! are injected through [`EngineParts`].

pub mod capacity;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod pricing;
pub mod store;
pub mod sweeper;
pub mod terms;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::entities::booking::{self, PlanType};
use crate::entities::route;
use crate::utils::clock::Clock;

pub use error::{BookingError, BookingResult, StoreError};
pub use events::{DomainEvent, EventSink};
pub use lifecycle::{BookingLifecycle, CreateBooking, Transitioned};
pub use pricing::{Money, Quote};
pub use store::{BookingCalendar, BookingStore};
pub use sweeper::{StatusSweeper, SweepReport};
pub use terms::TermCalendar;

/// Collaborators the engine runs against.
#[derive(Clone)]
pub struct EngineParts {
    pub store: Arc<dyn BookingStore>,
    pub calendar: Arc<dyn BookingCalendar>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a pending or awaiting-approval booking may stay unpaid.
    pub abandonment_grace: Duration,
    /// Bound on waiting for a route's admission lock, per attempt.
    pub admit_lock_timeout: StdDuration,
    pub admit_max_attempts: u32,
    /// Lease length for the cross-instance sweep lock.
    pub sweep_lease_ttl: Duration,
    pub terms: TermCalendar,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            abandonment_grace: Duration::hours(24),
            admit_lock_timeout: StdDuration::from_secs(2),
            admit_max_attempts: 3,
            sweep_lease_ttl: Duration::minutes(30),
            terms: TermCalendar::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            abandonment_grace: Duration::hours(config.abandonment_grace_hours),
            admit_lock_timeout: StdDuration::from_millis(config.admit_lock_timeout_ms.max(1)),
            admit_max_attempts: config.admit_max_attempts,
            sweep_lease_ttl: Duration::minutes(config.sweep_lease_minutes),
            terms: TermCalendar::new(config.semester_terms.clone(), config.annual_terms.clone()),
        }
    }
}

pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<BookingLifecycle>,
    sweeper: Arc<StatusSweeper>,
}

impl BookingEngine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        let lifecycle = Arc::new(BookingLifecycle::new(&parts, &settings));
        let sweeper = Arc::new(StatusSweeper::new(
            lifecycle.clone(),
            parts.store.clone(),
            parts.clock.clone(),
            settings.sweep_lease_ttl,
        ));

        Self {
            store: parts.store,
            clock: parts.clock,
            lifecycle,
            sweeper,
        }
    }

    /// The engine's notion of now. Timestamps written outside the engine
    /// should come from here so they agree with sweeps and expiry checks.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn sweeper(&self) -> Arc<StatusSweeper> {
        self.sweeper.clone()
    }

    pub async fn create(&self, req: CreateBooking) -> BookingResult<booking::Model> {
        self.lifecycle.create(req).await
    }

    pub async fn cancel(&self, booking_id: Uuid) -> BookingResult<Transitioned> {
        self.lifecycle.cancel(booking_id).await
    }

    pub async fn activate(&self, booking_id: Uuid, payment_ref: &str) -> BookingResult<Transitioned> {
        self.lifecycle.activate(booking_id, payment_ref).await
    }

    pub async fn require_approval(&self, booking_id: Uuid) -> BookingResult<Transitioned> {
        self.lifecycle.require_approval(booking_id).await
    }

    pub async fn payment_failed(&self, booking_id: Uuid) -> BookingResult<booking::Model> {
        self.lifecycle.payment_failed(booking_id).await
    }

    pub async fn available_seats(&self, route_id: Uuid) -> BookingResult<i64> {
        let route = self.route(route_id).await?;
        self.lifecycle.guard().available_seats(&route).await
    }

    pub async fn quote(&self, plan_type: PlanType, route_id: Uuid) -> BookingResult<Quote> {
        self.lifecycle.quote(plan_type, route_id).await
    }

    pub async fn run_status_sweep(&self, as_of: DateTime<Utc>) -> BookingResult<SweepReport> {
        self.sweeper.run(as_of).await
    }

    pub async fn route(&self, route_id: Uuid) -> BookingResult<route::Model> {
        self.store
            .find_route(route_id)
            .await?
            .ok_or(BookingError::RouteNotFound(route_id))
    }

    /// Active routes with their free seat counts.
    pub async fn routes_with_availability(&self) -> BookingResult<Vec<(route::Model, i64)>> {
        let routes = self.store.active_routes().await?;
        let mut out = Vec::with_capacity(routes.len());
        for route in routes {
            let available = self.lifecycle.guard().available_seats(&route).await?;
            out.push((route, available));
        }
        Ok(out)
    }

    pub async fn booking(&self, booking_id: Uuid) -> BookingResult<booking::Model> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))
    }

    pub async fn bookings_by(&self, booked_by: Uuid) -> BookingResult<Vec<booking::Model>> {
        Ok(self.store.bookings_by(booked_by).await?)
    }
}
