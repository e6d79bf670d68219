//! The booking state machine.
//!
//! ```text
//! pending ──► awaiting_approval ──► active ──► expired
//!    │               │                │
//!    └───────────────┴────────────────┴──────► cancelled
//! ```
//!
//! `pending` and `awaiting_approval` may also expire (abandoned checkout).
//! This is the only code that writes `booking.status`. Every write is a
//! compare-and-set against the status the decision was made on, so a
//! concurrent writer forces a re-read instead of being overwritten.

use std::slice;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::utils::clock::Clock;

use super::capacity::CapacityGuard;
use super::error::{BookingError, BookingResult, StoreError};
use super::events::{DomainEvent, EventSink, ExpiryReason};
use super::pricing::{PricingResolver, Quote};
use super::store::{BookingCalendar, BookingStore, NewBooking, StatusChange};
use super::terms::TermCalendar;
use super::{EngineParts, EngineSettings};

/// Bounded because each lost race moves the booking strictly forward.
const MAX_STATUS_RACES: usize = 4;

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub plan_type: PlanType,
    pub start_date: NaiveDate,
    pub pickup_point_id: Option<Uuid>,
    pub dropoff_point_id: Option<Uuid>,
    pub booked_by: Uuid,
}

/// Result of a transition request.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub booking: booking::Model,
    pub previous: BookingStatus,
    /// `false` when the request was a no-op (already applied or not due).
    pub changed: bool,
}

enum Step {
    Apply,
    Done,
    NotDue,
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;

    matches!(
        (from, to),
        (Pending, AwaitingApproval | Active | Expired | Cancelled)
            | (AwaitingApproval, Active | Expired | Cancelled)
            | (Active, Expired | Cancelled)
    )
}

/// Why `booking` should expire as of `as_of`, if it should.
pub fn expiry_reason(
    booking: &booking::Model,
    as_of: DateTime<Utc>,
    abandonment_grace: Duration,
) -> Option<ExpiryReason> {
    match booking.status {
        BookingStatus::Active => booking
            .end_date
            .filter(|end| *end < as_of.date_naive())
            .map(|_| ExpiryReason::PeriodEnded),
        BookingStatus::Pending | BookingStatus::AwaitingApproval => {
            // A recorded payment is waiting for activation, not abandoned
            if booking.external_payment_ref.is_some() {
                return None;
            }
            let created = booking.created_at.with_timezone(&Utc);
            (created + abandonment_grace <= as_of).then_some(ExpiryReason::Abandoned)
        }
        BookingStatus::Cancelled | BookingStatus::Expired => None,
    }
}

fn activation_step(booking: &booking::Model, payment_ref: &str) -> BookingResult<Step> {
    let recorded = booking.external_payment_ref.as_deref();
    match booking.status {
        BookingStatus::Active if recorded == Some(payment_ref) => Ok(Step::Done),
        BookingStatus::Active => Err(BookingError::PaymentRefMismatch {
            booking_id: booking.id,
        }),
        BookingStatus::Pending | BookingStatus::AwaitingApproval => match recorded {
            Some(existing) if existing != payment_ref => Err(BookingError::PaymentRefMismatch {
                booking_id: booking.id,
            }),
            _ => Ok(Step::Apply),
        },
        from @ (BookingStatus::Cancelled | BookingStatus::Expired) => {
            Err(BookingError::InvalidTransition {
                booking_id: booking.id,
                from,
                to: BookingStatus::Active,
            })
        }
    }
}

pub struct BookingLifecycle {
    store: Arc<dyn BookingStore>,
    calendar: Arc<dyn BookingCalendar>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    guard: CapacityGuard,
    terms: TermCalendar,
    abandonment_grace: Duration,
}

impl BookingLifecycle {
    pub fn new(parts: &EngineParts, settings: &EngineSettings) -> Self {
        Self {
            store: parts.store.clone(),
            calendar: parts.calendar.clone(),
            events: parts.events.clone(),
            clock: parts.clock.clone(),
            guard: CapacityGuard::new(
                parts.store.clone(),
                settings.admit_lock_timeout,
                settings.admit_max_attempts,
            ),
            terms: settings.terms.clone(),
            abandonment_grace: settings.abandonment_grace,
        }
    }

    pub fn guard(&self) -> &CapacityGuard {
        &self.guard
    }

    /// Validate, price and admit a new booking. Either a pending booking is
    /// persisted or nothing is.
    pub async fn create(&self, req: CreateBooking) -> BookingResult<booking::Model> {
        let route = self
            .store
            .find_route(req.route_id)
            .await?
            .ok_or(BookingError::RouteNotFound(req.route_id))?;

        if !route.active {
            return Err(BookingError::RouteInactive(route.id));
        }
        if route.requires_pickup && req.pickup_point_id.is_none() {
            return Err(BookingError::Validation(format!(
                "route {} requires a pickup point",
                route.name
            )));
        }
        if req.start_date < self.clock.today() {
            return Err(BookingError::Validation(format!(
                "start date {} is in the past",
                req.start_date
            )));
        }
        if !self.calendar.is_bookable(req.start_date).await? {
            return Err(BookingError::NotBookableDate(req.start_date));
        }

        let end_date = self.terms.end_date(req.plan_type, req.start_date)?;
        let rules = self.store.pricing_rules(req.plan_type).await?;
        let quote = PricingResolver::resolve(req.plan_type, &route, &rules)?;

        let booking = self
            .guard
            .admit(NewBooking {
                id: Uuid::new_v4(),
                student_id: req.student_id,
                route_id: route.id,
                pickup_point_id: req.pickup_point_id,
                dropoff_point_id: req.dropoff_point_id,
                booked_by: req.booked_by,
                plan_type: req.plan_type,
                start_date: req.start_date,
                end_date,
                price: quote.price.clone(),
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            route_id = %route.id,
            student_id = %booking.student_id,
            plan_type = %booking.plan_type,
            amount = %booking.price_amount,
            currency = %booking.currency,
            "Booking created"
        );
        self.events.publish(DomainEvent::BookingCreated {
            booking_id: booking.id,
            student_id: booking.student_id,
            route_id: booking.route_id,
            plan_type: booking.plan_type,
            amount: booking.price_amount,
            currency: booking.currency.clone(),
        });

        Ok(booking)
    }

    pub async fn quote(&self, plan_type: PlanType, route_id: Uuid) -> BookingResult<Quote> {
        let route = self
            .store
            .find_route(route_id)
            .await?
            .ok_or(BookingError::RouteNotFound(route_id))?;
        let rules = self.store.pricing_rules(plan_type).await?;
        PricingResolver::resolve(plan_type, &route, &rules)
    }

    /// Payment succeeded. Same reference twice is a no-op.
    pub async fn activate(&self, booking_id: Uuid, payment_ref: &str) -> BookingResult<Transitioned> {
        let payment_ref = payment_ref.trim();
        if payment_ref.is_empty() {
            return Err(BookingError::Validation(
                "payment reference must not be empty".to_string(),
            ));
        }

        // Record the signal first so the sweeper can finish an interrupted
        // activation
        let current = self.load(booking_id).await?;
        if matches!(activation_step(&current, payment_ref)?, Step::Apply)
            && current.external_payment_ref.is_none()
        {
            self.store
                .record_payment_ref(booking_id, payment_ref, self.clock.now())
                .await?;
        }

        let outcome = self
            .drive(booking_id, BookingStatus::Active, Some(payment_ref), |b| {
                activation_step(b, payment_ref)
            })
            .await?;

        if outcome.changed {
            tracing::info!(%booking_id, payment_ref, "Booking activated");
            self.events.publish(DomainEvent::BookingActivated {
                booking_id,
                external_payment_ref: payment_ref.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Hold a pending booking for manual review. It keeps its seat.
    pub async fn require_approval(&self, booking_id: Uuid) -> BookingResult<Transitioned> {
        let outcome = self
            .drive(booking_id, BookingStatus::AwaitingApproval, None, |b| {
                match b.status {
                    BookingStatus::AwaitingApproval => Ok(Step::Done),
                    BookingStatus::Pending => Ok(Step::Apply),
                    from => Err(BookingError::InvalidTransition {
                        booking_id,
                        from,
                        to: BookingStatus::AwaitingApproval,
                    }),
                }
            })
            .await?;

        if outcome.changed {
            tracing::info!(%booking_id, "Booking awaiting approval");
            self.events
                .publish(DomainEvent::BookingAwaitingApproval { booking_id });
        }
        Ok(outcome)
    }

    /// Expire the booking if its period ended or its checkout was abandoned
    /// as of `as_of`. Not-yet-due and already-expired bookings are left alone.
    pub async fn expire_if_due(
        &self,
        booking_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> BookingResult<Transitioned> {
        let grace = self.abandonment_grace;
        let outcome = self
            .drive(booking_id, BookingStatus::Expired, None, |b| match b.status {
                BookingStatus::Expired => Ok(Step::Done),
                BookingStatus::Cancelled => Err(BookingError::InvalidTransition {
                    booking_id,
                    from: b.status,
                    to: BookingStatus::Expired,
                }),
                _ if expiry_reason(b, as_of, grace).is_some() => Ok(Step::Apply),
                _ => Ok(Step::NotDue),
            })
            .await?;

        if outcome.changed {
            let reason = match outcome.previous {
                BookingStatus::Active => ExpiryReason::PeriodEnded,
                _ => ExpiryReason::Abandoned,
            };
            tracing::info!(%booking_id, ?reason, "Booking expired");
            self.events.publish(DomainEvent::BookingExpired {
                booking_id,
                route_id: outcome.booking.route_id,
                reason,
            });
        }
        Ok(outcome)
    }

    /// Cancel any non-terminal booking and free its seat.
    pub async fn cancel(&self, booking_id: Uuid) -> BookingResult<Transitioned> {
        let outcome = self
            .drive(booking_id, BookingStatus::Cancelled, None, |b| match b.status {
                BookingStatus::Cancelled => Ok(Step::Done),
                BookingStatus::Expired => Err(BookingError::InvalidTransition {
                    booking_id,
                    from: b.status,
                    to: BookingStatus::Cancelled,
                }),
                _ => Ok(Step::Apply),
            })
            .await?;

        if outcome.changed {
            tracing::info!(%booking_id, previous = %outcome.previous, "Booking cancelled");
            self.events.publish(DomainEvent::BookingCancelled {
                booking_id,
                route_id: outcome.booking.route_id,
            });
        }
        Ok(outcome)
    }

    /// Payment failed. Status is left as is; only a notification goes out.
    pub async fn payment_failed(&self, booking_id: Uuid) -> BookingResult<booking::Model> {
        let booking = self.load(booking_id).await?;
        tracing::warn!(%booking_id, status = %booking.status, "Payment failed");
        self.events
            .publish(DomainEvent::BookingPaymentFailed { booking_id });
        Ok(booking)
    }

    async fn load(&self, booking_id: Uuid) -> BookingResult<booking::Model> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))
    }

    async fn drive<F>(
        &self,
        booking_id: Uuid,
        to: BookingStatus,
        payment_ref: Option<&str>,
        decide: F,
    ) -> BookingResult<Transitioned>
    where
        F: Fn(&booking::Model) -> BookingResult<Step> + Send + Sync,
    {
        for _ in 0..MAX_STATUS_RACES {
            let current = self.load(booking_id).await?;
            match decide(&current)? {
                Step::Done | Step::NotDue => {
                    return Ok(Transitioned {
                        previous: current.status,
                        changed: false,
                        booking: current,
                    });
                }
                Step::Apply if can_transition(current.status, to) => {}
                Step::Apply => {
                    return Err(BookingError::InvalidTransition {
                        booking_id,
                        from: current.status,
                        to,
                    });
                }
            }

            let change = StatusChange {
                booking_id,
                from: slice::from_ref(&current.status),
                to,
                payment_ref,
                at: self.clock.now(),
            };
            if let Some(updated) = self.store.apply_status_change(change).await? {
                return Ok(Transitioned {
                    booking: updated,
                    previous: current.status,
                    changed: true,
                });
            }

            tracing::debug!(%booking_id, "Booking changed concurrently, re-evaluating");
        }

        Err(StoreError::Unavailable(format!("booking {booking_id} kept changing")).into())
    }
}
