use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::entities::{pricing_rule, route};
use crate::utils::clock::{Clock, FixedClock};

use super::events::{ChannelEventSink, ExpiryReason};
use super::memory::{FixedCalendar, InMemoryStore};
use super::store::{Admission, NewBooking, StatusChange};
use super::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn route_with_capacity(capacity: i32) -> route::Model {
    route::Model {
        id: Uuid::new_v4(),
        name: format!("Route {capacity}"),
        vehicle_id: None,
        vehicle_type: Some("bus".to_string()),
        capacity,
        active: true,
        requires_pickup: false,
        created_at: t0().into(),
    }
}

fn price_rule(plan_type: PlanType, route_id: Option<Uuid>, cents: i64) -> pricing_rule::Model {
    pricing_rule::Model {
        id: Uuid::new_v4(),
        plan_type,
        route_id,
        vehicle_type: None,
        amount: Decimal::new(cents, 2),
        currency: "USD".to_string(),
        active: true,
        created_at: t0().into(),
    }
}

fn request(route_id: Uuid, plan_type: PlanType) -> CreateBooking {
    CreateBooking {
        student_id: Uuid::new_v4(),
        route_id,
        plan_type,
        start_date: date(2024, 1, 15),
        pickup_point_id: None,
        dropoff_point_id: None,
        booked_by: Uuid::new_v4(),
    }
}

fn stored_booking(route_id: Uuid, status: BookingStatus, created_at: DateTime<Utc>) -> booking::Model {
    let mut model = NewBooking {
        id: Uuid::new_v4(),
        student_id: Uuid::new_v4(),
        route_id,
        pickup_point_id: None,
        dropoff_point_id: None,
        booked_by: Uuid::new_v4(),
        plan_type: PlanType::Weekly,
        start_date: date(2024, 1, 15),
        end_date: date(2024, 1, 22),
        price: Money {
            amount: Decimal::new(5000, 2),
            currency: "USD".to_string(),
        },
        created_at,
    }
    .into_model();
    model.status = status;
    model
}

fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

struct Harness {
    engine: Arc<BookingEngine>,
    store: Arc<InMemoryStore>,
    calendar: Arc<FixedCalendar>,
    clock: Arc<FixedClock>,
    events: broadcast::Receiver<DomainEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    fn with_settings(settings: EngineSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        Self::over(store.clone(), store, clock, settings)
    }

    /// Engine running against `engine_store`, with `store` kept for seeding.
    fn over(
        store: Arc<InMemoryStore>,
        engine_store: Arc<dyn BookingStore>,
        clock: Arc<FixedClock>,
        settings: EngineSettings,
    ) -> Self {
        let calendar = Arc::new(FixedCalendar::default());
        let sink = ChannelEventSink::new(256);
        let events = sink.subscribe();

        let engine = BookingEngine::new(
            EngineParts {
                store: engine_store,
                calendar: calendar.clone(),
                events: Arc::new(sink),
                clock: clock.clone(),
            },
            settings,
        );

        Self {
            engine: Arc::new(engine),
            store,
            calendar,
            clock,
            events,
        }
    }

    async fn route(&self, capacity: i32) -> route::Model {
        let route = route_with_capacity(capacity);
        self.store.put_route(route.clone()).await;
        for plan_type in [PlanType::Weekly, PlanType::BiWeekly, PlanType::Monthly] {
            self.store
                .put_pricing_rule(price_rule(plan_type, None, 6000))
                .await;
        }
        route
    }
}

#[tokio::test]
async fn test_create_prices_and_dates_a_pending_booking() {
    let h = Harness::new();
    let route = h.route(10).await;
    h.store
        .put_pricing_rule(price_rule(PlanType::Monthly, Some(route.id), 5000))
        .await;

    let booking = h
        .engine
        .create(request(route.id, PlanType::Monthly))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.start_date, date(2024, 1, 15));
    assert_eq!(booking.end_date, Some(date(2024, 2, 15)));
    assert_eq!(booking.price_amount, Decimal::new(5000, 2));
    assert_eq!(booking.currency, "USD");
    assert_eq!(h.engine.available_seats(route.id).await.unwrap(), 9);
}

#[tokio::test]
async fn test_create_emits_booking_created_once() {
    let mut h = Harness::new();
    let route = h.route(10).await;

    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        DomainEvent::BookingCreated { booking_id, .. } if *booking_id == booking.id
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_never_exceed_capacity() {
    let h = Harness::new();
    let route = h.route(5).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = h.engine.clone();
            let req = request(route.id, PlanType::Weekly);
            tokio::spawn(async move { engine.create(req).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(BookingError::CapacityExceeded { available, .. }) => {
                assert_eq!(available, 0);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(admitted, 5);
    assert_eq!(rejected, 15);
    assert_eq!(h.store.count_occupying(route.id).await.unwrap(), 5);
    assert_eq!(h.engine.available_seats(route.id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_seat_goes_to_exactly_one_request() {
    let h = Harness::new();
    let route = h.route(1).await;

    let a = {
        let engine = h.engine.clone();
        let req = request(route.id, PlanType::Weekly);
        tokio::spawn(async move { engine.create(req).await })
    };
    let b = {
        let engine = h.engine.clone();
        let req = request(route.id, PlanType::Weekly);
        tokio::spawn(async move { engine.create(req).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(BookingError::CapacityExceeded { .. })))
    );
}

#[tokio::test]
async fn test_full_route_reports_capacity_exceeded() {
    let h = Harness::new();
    let route = h.route(1).await;
    h.engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();

    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::CapacityExceeded {
            requested: 1,
            available: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn test_busy_route_lock_yields_concurrency_conflict() {
    let settings = EngineSettings {
        admit_lock_timeout: StdDuration::from_millis(20),
        admit_max_attempts: 2,
        ..EngineSettings::default()
    };
    let h = Harness::with_settings(settings);
    let route = h.route(5).await;

    let _held = h.store.lock_route(route.id).await;
    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::ConcurrencyConflict { attempts: 2, .. }
    ));
    assert!(err.is_retryable());
    assert_eq!(h.store.count_occupying(route.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_price_leaves_no_booking() {
    let h = Harness::new();
    let route = route_with_capacity(5);
    h.store.put_route(route.clone()).await;

    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::PricingNotConfigured {
            plan_type: PlanType::Weekly,
            ..
        }
    ));
    assert_eq!(h.store.count_occupying(route.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_semester_plan_needs_a_configured_term() {
    let h = Harness::new();
    let route = h.route(5).await;
    h.store
        .put_pricing_rule(price_rule(PlanType::Semester, None, 90000))
        .await;

    let err = h
        .engine
        .create(request(route.id, PlanType::Semester))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let settings = EngineSettings {
        terms: TermCalendar::new(
            vec![terms::Term {
                start: date(2024, 1, 8),
                end: date(2024, 6, 14),
            }],
            Vec::new(),
        ),
        ..EngineSettings::default()
    };
    let h = Harness::with_settings(settings);
    let route = h.route(5).await;
    h.store
        .put_pricing_rule(price_rule(PlanType::Semester, None, 90000))
        .await;

    let booking = h
        .engine
        .create(request(route.id, PlanType::Semester))
        .await
        .unwrap();
    assert_eq!(booking.end_date, Some(date(2024, 6, 14)));
}

#[tokio::test]
async fn test_closed_start_date_is_rejected() {
    let h = Harness::new();
    let route = h.route(5).await;
    h.calendar.close(date(2024, 1, 15));

    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::NotBookableDate(d) if d == date(2024, 1, 15)));
    assert_eq!(h.store.count_occupying(route.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_past_start_date_is_rejected() {
    let h = Harness::new();
    let route = h.route(5).await;

    let err = h
        .engine
        .create(CreateBooking {
            start_date: date(2024, 1, 9),
            ..request(route.id, PlanType::Weekly)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Validation(_)));
}

#[tokio::test]
async fn test_same_student_cannot_hold_two_seats_on_a_route() {
    let h = Harness::new();
    let route = h.route(5).await;
    let req = request(route.id, PlanType::Weekly);

    h.engine.create(req.clone()).await.unwrap();
    let err = h.engine.create(req.clone()).await.unwrap_err();

    assert!(matches!(err, BookingError::DuplicateBooking { student_id, .. } if student_id == req.student_id));
}

#[tokio::test]
async fn test_pickup_required_routes_need_a_pickup_point() {
    let h = Harness::new();
    let mut route = h.route(5).await;
    route.requires_pickup = true;
    h.store.put_route(route.clone()).await;

    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let booking = h
        .engine
        .create(CreateBooking {
            pickup_point_id: Some(Uuid::new_v4()),
            ..request(route.id, PlanType::Weekly)
        })
        .await
        .unwrap();
    assert!(booking.pickup_point_id.is_some());
}

#[tokio::test]
async fn test_inactive_route_is_not_bookable() {
    let h = Harness::new();
    let mut route = h.route(5).await;
    route.active = false;
    h.store.put_route(route.clone()).await;

    let err = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::RouteInactive(id) if id == route.id));

    let err = h
        .engine
        .create(request(Uuid::new_v4(), PlanType::Weekly))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::RouteNotFound(_)));
}

#[tokio::test]
async fn test_activate_is_idempotent_for_the_same_reference() {
    let mut h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    drain(&mut h.events);

    let first = h.engine.activate(booking.id, "pay_123").await.unwrap();
    let second = h.engine.activate(booking.id, "pay_123").await.unwrap();

    assert!(first.changed);
    assert_eq!(first.previous, BookingStatus::Pending);
    assert_eq!(first.booking.status, BookingStatus::Active);
    assert_eq!(first.booking.external_payment_ref.as_deref(), Some("pay_123"));
    assert!(!second.changed);
    assert_eq!(second.booking.status, BookingStatus::Active);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DomainEvent::BookingActivated { .. }));
}

#[tokio::test]
async fn test_activate_with_other_reference_is_rejected() {
    let h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    h.engine.activate(booking.id, "pay_1").await.unwrap();

    let err = h.engine.activate(booking.id, "pay_2").await.unwrap_err();

    assert!(matches!(err, BookingError::PaymentRefMismatch { booking_id } if booking_id == booking.id));
    let stored = h.engine.booking(booking.id).await.unwrap();
    assert_eq!(stored.external_payment_ref.as_deref(), Some("pay_1"));
}

#[tokio::test]
async fn test_awaiting_approval_keeps_seat_and_can_activate() {
    let h = Harness::new();
    let route = h.route(1).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();

    let held = h.engine.require_approval(booking.id).await.unwrap();
    assert_eq!(held.booking.status, BookingStatus::AwaitingApproval);
    assert_eq!(h.engine.available_seats(route.id).await.unwrap(), 0);

    let active = h.engine.activate(booking.id, "pay_9").await.unwrap();
    assert_eq!(active.previous, BookingStatus::AwaitingApproval);
    assert_eq!(active.booking.status, BookingStatus::Active);

    let err = h.engine.require_approval(booking.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InvalidTransition {
            from: BookingStatus::Active,
            to: BookingStatus::AwaitingApproval,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_frees_the_seat() {
    let mut h = Harness::new();
    let route = h.route(1).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    drain(&mut h.events);

    let cancelled = h.engine.cancel(booking.id).await.unwrap();
    assert!(cancelled.changed);
    assert_eq!(h.engine.available_seats(route.id).await.unwrap(), 1);

    let again = h.engine.cancel(booking.id).await.unwrap();
    assert!(!again.changed);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DomainEvent::BookingCancelled { route_id, .. } if *route_id == route.id));

    h.engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_terminal_bookings_reject_reactivation() {
    let h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    h.engine.cancel(booking.id).await.unwrap();

    let err = h.engine.activate(booking.id, "pay_1").await.unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Active,
            ..
        }
    ));
}

#[tokio::test]
async fn test_payment_failure_only_notifies() {
    let mut h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    drain(&mut h.events);

    let after = h.engine.payment_failed(booking.id).await.unwrap();

    assert_eq!(after.status, BookingStatus::Pending);
    let events = drain(&mut h.events);
    assert_eq!(events, vec![DomainEvent::BookingPaymentFailed {
        booking_id: booking.id
    }]);
}

#[tokio::test]
async fn test_sweep_expires_ended_bookings_and_frees_seats() {
    let mut h = Harness::new();
    let route = h.route(1).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Monthly))
        .await
        .unwrap();
    h.engine.activate(booking.id, "pay_1").await.unwrap();
    drain(&mut h.events);

    // Last covered day: still active
    let on_end = Utc.with_ymd_and_hms(2024, 2, 15, 12, 0, 0).unwrap();
    let report = h.engine.run_status_sweep(on_end).await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.unchanged, 1);

    let after_end = Utc.with_ymd_and_hms(2024, 2, 16, 0, 0, 0).unwrap();
    let report = h.engine.run_status_sweep(after_end).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);

    let stored = h.engine.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Expired);
    assert_eq!(h.engine.available_seats(route.id).await.unwrap(), 1);

    let events = drain(&mut h.events);
    assert_eq!(events, vec![DomainEvent::BookingExpired {
        booking_id: booking.id,
        route_id: route.id,
        reason: ExpiryReason::PeriodEnded,
    }]);
}

#[tokio::test]
async fn test_unpaid_booking_is_abandoned_after_grace() {
    let h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();

    let report = h
        .engine
        .run_status_sweep(t0() + Duration::hours(23))
        .await
        .unwrap();
    assert_eq!(report.expired, 0);

    h.clock.advance(Duration::hours(25));
    let report = h.engine.run_status_sweep(h.clock.now()).await.unwrap();
    assert_eq!(report.expired, 1);

    let stored = h.engine.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Expired);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let mut h = Harness::new();
    let route = h.route(5).await;
    h.engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    drain(&mut h.events);

    let as_of = t0() + Duration::hours(30);
    let first = h.engine.run_status_sweep(as_of).await.unwrap();
    let second = h.engine.run_status_sweep(as_of).await.unwrap();

    assert_eq!(first.expired, 1);
    assert_eq!(second.expired, 0);
    assert_eq!(second.activated, 0);
    assert_eq!(drain(&mut h.events).len(), 1);
}

#[tokio::test]
async fn test_sweep_finishes_recorded_payments() {
    let h = Harness::new();
    let route = h.route(5).await;
    let mut paid = stored_booking(route.id, BookingStatus::Pending, t0() - Duration::hours(48));
    paid.external_payment_ref = Some("pay_late".to_string());
    h.store.put_booking(paid.clone()).await;

    let report = h.engine.run_status_sweep(t0()).await.unwrap();

    assert_eq!(report.activated, 1);
    assert_eq!(report.expired, 0);
    let stored = h.engine.booking(paid.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Active);
}

#[tokio::test]
async fn test_sweep_refuses_overlapping_runs() {
    let h = Harness::new();
    let other_instance = Uuid::new_v4();
    assert!(
        h.store
            .acquire_sweep_lease(other_instance, Duration::minutes(30), t0())
            .await
            .unwrap()
    );

    let err = h.engine.run_status_sweep(t0()).await.unwrap_err();
    assert!(matches!(err, BookingError::SweepAlreadyRunning));

    h.store.release_sweep_lease(other_instance).await.unwrap();
    h.engine.run_status_sweep(t0()).await.unwrap();
}

/// In-memory store with scripted misbehaviour around the sweep.
#[derive(Default)]
struct ScriptedStore {
    inner: Arc<InMemoryStore>,
    /// Status writes for this booking fail.
    broken: Option<Uuid>,
    /// Returned as sweep candidates instead of the live table.
    stale_candidates: Option<Vec<booking::Model>>,
    /// Advanced after every successful status write.
    slow_writes: Option<(Arc<FixedClock>, Duration)>,
    /// Another instance trying to take the sweep lease after each write.
    rival: Option<Uuid>,
    rival_wins: std::sync::Mutex<Vec<bool>>,
}

impl ScriptedStore {
    fn over(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }
}

#[async_trait]
impl BookingStore for ScriptedStore {
    async fn find_route(&self, route_id: Uuid) -> Result<Option<route::Model>, StoreError> {
        self.inner.find_route(route_id).await
    }

    async fn active_routes(&self) -> Result<Vec<route::Model>, StoreError> {
        self.inner.active_routes().await
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<booking::Model>, StoreError> {
        self.inner.find_booking(booking_id).await
    }

    async fn bookings_by(&self, booked_by: Uuid) -> Result<Vec<booking::Model>, StoreError> {
        self.inner.bookings_by(booked_by).await
    }

    async fn count_occupying(&self, route_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_occupying(route_id).await
    }

    async fn insert_within_capacity(
        &self,
        booking: NewBooking,
        lock_timeout: StdDuration,
    ) -> Result<Admission, StoreError> {
        self.inner.insert_within_capacity(booking, lock_timeout).await
    }

    async fn apply_status_change(
        &self,
        change: StatusChange<'_>,
    ) -> Result<Option<booking::Model>, StoreError> {
        if self.broken == Some(change.booking_id) {
            return Err(StoreError::Unavailable("disk on fire".to_string()));
        }
        let applied = self.inner.apply_status_change(change).await?;

        if let Some((clock, step)) = &self.slow_writes {
            clock.advance(*step);
            if let Some(rival) = self.rival {
                let won = self
                    .inner
                    .acquire_sweep_lease(rival, Duration::minutes(10), clock.now())
                    .await?;
                self.rival_wins.lock().unwrap().push(won);
            }
        }
        Ok(applied)
    }

    async fn record_payment_ref(
        &self,
        booking_id: Uuid,
        payment_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.record_payment_ref(booking_id, payment_ref, at).await
    }

    async fn pricing_rules(
        &self,
        plan_type: PlanType,
    ) -> Result<Vec<pricing_rule::Model>, StoreError> {
        self.inner.pricing_rules(plan_type).await
    }

    async fn non_terminal_bookings(&self) -> Result<Vec<booking::Model>, StoreError> {
        match &self.stale_candidates {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.inner.non_terminal_bookings().await,
        }
    }

    async fn acquire_sweep_lease(
        &self,
        holder: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.acquire_sweep_lease(holder, ttl, now).await
    }

    async fn renew_sweep_lease(
        &self,
        holder: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.renew_sweep_lease(holder, ttl, now).await
    }

    async fn release_sweep_lease(&self, holder: Uuid) -> Result<(), StoreError> {
        self.inner.release_sweep_lease(holder).await
    }
}

#[tokio::test]
async fn test_one_failing_booking_does_not_stop_the_sweep() {
    let store = Arc::new(InMemoryStore::new());
    let route = route_with_capacity(5);
    store.put_route(route.clone()).await;

    let stale = t0() - Duration::hours(48);
    let broken = stored_booking(route.id, BookingStatus::Pending, stale);
    let healthy = stored_booking(route.id, BookingStatus::Pending, stale + Duration::minutes(1));
    store.put_booking(broken.clone()).await;
    store.put_booking(healthy.clone()).await;

    let failing = Arc::new(ScriptedStore {
        broken: Some(broken.id),
        ..ScriptedStore::over(store.clone())
    });
    let clock = Arc::new(FixedClock::new(t0()));
    let h = Harness::over(store, failing, clock, EngineSettings::default());

    let report = h.engine.run_status_sweep(t0()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(
        h.engine.booking(healthy.id).await.unwrap().status,
        BookingStatus::Expired
    );
    assert_eq!(
        h.engine.booking(broken.id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn test_sweep_skips_payment_cancelled_after_candidates_were_read() {
    let store = Arc::new(InMemoryStore::new());
    let route = route_with_capacity(5);
    store.put_route(route.clone()).await;

    let mut paid = stored_booking(route.id, BookingStatus::Pending, t0() - Duration::hours(2));
    paid.external_payment_ref = Some("pay_raced".to_string());
    let mut cancelled = paid.clone();
    cancelled.status = BookingStatus::Cancelled;
    store.put_booking(cancelled).await;

    let stale = Arc::new(ScriptedStore {
        stale_candidates: Some(vec![paid.clone()]),
        ..ScriptedStore::over(store.clone())
    });
    let clock = Arc::new(FixedClock::new(t0()));
    let h = Harness::over(store, stale, clock, EngineSettings::default());

    let report = h.engine.run_status_sweep(t0()).await.unwrap();

    assert_eq!(report.failed, 0);
    assert_eq!(report.activated, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(
        h.engine.booking(paid.id).await.unwrap().status,
        BookingStatus::Cancelled
    );
}

#[tokio::test]
async fn test_long_sweep_keeps_its_lease() {
    let store = Arc::new(InMemoryStore::new());
    let route = route_with_capacity(5);
    store.put_route(route.clone()).await;
    let abandoned = t0() - Duration::hours(48);
    for i in 0..3 {
        store
            .put_booking(stored_booking(
                route.id,
                BookingStatus::Pending,
                abandoned + Duration::minutes(i),
            ))
            .await;
    }

    // Each write takes 4 minutes against a 10 minute lease
    let clock = Arc::new(FixedClock::new(t0()));
    let slow = Arc::new(ScriptedStore {
        slow_writes: Some((clock.clone(), Duration::minutes(4))),
        rival: Some(Uuid::new_v4()),
        ..ScriptedStore::over(store.clone())
    });
    let settings = EngineSettings {
        sweep_lease_ttl: Duration::minutes(10),
        ..EngineSettings::default()
    };
    let h = Harness::over(store, slow.clone(), clock, settings);

    let report = h.engine.run_status_sweep(t0()).await.unwrap();

    assert_eq!(report.expired, 3);
    assert_eq!(*slow.rival_wins.lock().unwrap(), vec![false, false, false]);
}

#[tokio::test]
async fn test_sweep_stops_when_its_lease_is_taken_over() {
    let store = Arc::new(InMemoryStore::new());
    let route = route_with_capacity(5);
    store.put_route(route.clone()).await;
    let abandoned = t0() - Duration::hours(48);
    for i in 0..4 {
        store
            .put_booking(stored_booking(
                route.id,
                BookingStatus::Pending,
                abandoned + Duration::minutes(i),
            ))
            .await;
    }

    // Writes stall past the whole lease, so the rival wins it before renewal
    let clock = Arc::new(FixedClock::new(t0()));
    let slow = Arc::new(ScriptedStore {
        slow_writes: Some((clock.clone(), Duration::minutes(11))),
        rival: Some(Uuid::new_v4()),
        ..ScriptedStore::over(store.clone())
    });
    let settings = EngineSettings {
        sweep_lease_ttl: Duration::minutes(10),
        ..EngineSettings::default()
    };
    let h = Harness::over(store, slow.clone(), clock, settings);

    let report = h.engine.run_status_sweep(t0()).await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(*slow.rival_wins.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_sweep_lease_renewal_is_holder_only() {
    let store = InMemoryStore::new();
    let holder = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let ttl = Duration::minutes(10);

    assert!(store.acquire_sweep_lease(holder, ttl, t0()).await.unwrap());
    assert!(!store.renew_sweep_lease(stranger, ttl, t0()).await.unwrap());
    assert!(
        store
            .renew_sweep_lease(holder, ttl, t0() + Duration::minutes(8))
            .await
            .unwrap()
    );
    // Renewed until t0 + 18m
    assert!(
        !store
            .acquire_sweep_lease(stranger, ttl, t0() + Duration::minutes(15))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_cancel_of_expired_booking_is_invalid() {
    let h = Harness::new();
    let route = h.route(5).await;
    let booking = h
        .engine
        .create(request(route.id, PlanType::Weekly))
        .await
        .unwrap();
    h.engine
        .run_status_sweep(t0() + Duration::days(2))
        .await
        .unwrap();

    let err = h.engine.cancel(booking.id).await.unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidTransition {
            from: BookingStatus::Expired,
            to: BookingStatus::Cancelled,
            ..
        }
    ));
}

#[test]
fn test_transition_table() {
    use BookingStatus::*;

    assert!(lifecycle::can_transition(Pending, Active));
    assert!(lifecycle::can_transition(AwaitingApproval, Cancelled));
    assert!(lifecycle::can_transition(Active, Expired));
    assert!(!lifecycle::can_transition(Active, Pending));
    assert!(!lifecycle::can_transition(Expired, Active));
    assert!(!lifecycle::can_transition(Cancelled, Cancelled));
}
