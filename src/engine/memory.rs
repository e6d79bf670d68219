//! Process-local store and calendar.
//!
//! Backs the engine and router tests, and embedders that do not need
//! durability.
//! Admission is serialized per route with an async mutex, mirroring the row
//! lock taken by the database store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::entities::booking::{self, PlanType};
use crate::entities::{pricing_rule, route};

use super::error::StoreError;
use super::store::{Admission, BookingCalendar, BookingStore, NewBooking, StatusChange};

#[derive(Debug, Default)]
struct Tables {
    routes: HashMap<Uuid, route::Model>,
    bookings: HashMap<Uuid, booking::Model>,
    rules: Vec<pricing_rule::Model>,
    lease: Option<(Uuid, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    route_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_route(&self, route: route::Model) {
        self.tables.lock().await.routes.insert(route.id, route);
    }

    pub async fn put_pricing_rule(&self, rule: pricing_rule::Model) {
        let mut tables = self.tables.lock().await;
        tables.rules.retain(|r| r.id != rule.id);
        tables.rules.push(rule);
    }

    /// Insert or overwrite a booking without any capacity check.
    pub async fn put_booking(&self, booking: booking::Model) {
        self.tables.lock().await.bookings.insert(booking.id, booking);
    }

    /// Hold the admission lock of a route until the guard is dropped.
    pub async fn lock_route(&self, route_id: Uuid) -> OwnedMutexGuard<()> {
        self.route_lock(route_id).await.lock_owned().await
    }

    async fn route_lock(&self, route_id: Uuid) -> Arc<Mutex<()>> {
        self.route_locks
            .lock()
            .await
            .entry(route_id)
            .or_default()
            .clone()
    }

    fn occupying<'a>(
        tables: &'a Tables,
        route_id: Uuid,
    ) -> impl Iterator<Item = &'a booking::Model> + 'a {
        tables
            .bookings
            .values()
            .filter(move |b| b.route_id == route_id && b.status.occupies_seat())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find_route(&self, route_id: Uuid) -> Result<Option<route::Model>, StoreError> {
        Ok(self.tables.lock().await.routes.get(&route_id).cloned())
    }

    async fn active_routes(&self) -> Result<Vec<route::Model>, StoreError> {
        let tables = self.tables.lock().await;
        let mut routes: Vec<_> = tables.routes.values().filter(|r| r.active).cloned().collect();
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(routes)
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<booking::Model>, StoreError> {
        Ok(self.tables.lock().await.bookings.get(&booking_id).cloned())
    }

    async fn bookings_by(&self, booked_by: Uuid) -> Result<Vec<booking::Model>, StoreError> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<_> = tables
            .bookings
            .values()
            .filter(|b| b.booked_by == booked_by && b.deleted_at.is_none())
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn count_occupying(&self, route_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(Self::occupying(&tables, route_id).count() as i64)
    }

    async fn insert_within_capacity(
        &self,
        booking: NewBooking,
        lock_timeout: Duration,
    ) -> Result<Admission, StoreError> {
        let lock = self.route_lock(booking.route_id).await;
        let Ok(_route_guard) = tokio::time::timeout(lock_timeout, lock.lock_owned()).await else {
            return Ok(Admission::Busy);
        };

        let available = {
            let tables = self.tables.lock().await;
            let Some(route) = tables.routes.get(&booking.route_id).filter(|r| r.active) else {
                return Ok(Admission::RouteUnavailable);
            };
            if Self::occupying(&tables, booking.route_id)
                .any(|b| b.student_id == booking.student_id)
            {
                return Ok(Admission::Duplicate);
            }
            let occupied = Self::occupying(&tables, booking.route_id).count() as i64;
            i64::from(route.capacity) - occupied
        };

        if available < 1 {
            return Ok(Admission::Full {
                available: available.max(0),
            });
        }

        // Count and insert are separate critical sections; only the route lock
        // keeps a concurrent admission out of this window.
        tokio::task::yield_now().await;

        let model = booking.into_model();
        self.tables
            .lock()
            .await
            .bookings
            .insert(model.id, model.clone());
        Ok(Admission::Admitted(model))
    }

    async fn apply_status_change(
        &self,
        change: StatusChange<'_>,
    ) -> Result<Option<booking::Model>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(booking) = tables.bookings.get_mut(&change.booking_id) else {
            return Ok(None);
        };
        if !change.from.contains(&booking.status) {
            return Ok(None);
        }

        booking.status = change.to;
        booking.updated_at = change.at.into();
        if let Some(payment_ref) = change.payment_ref {
            booking.external_payment_ref = Some(payment_ref.to_string());
        }
        Ok(Some(booking.clone()))
    }

    async fn record_payment_ref(
        &self,
        booking_id: Uuid,
        payment_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.bookings.get_mut(&booking_id) {
            Some(b) if b.external_payment_ref.is_none() => {
                b.external_payment_ref = Some(payment_ref.to_string());
                b.updated_at = at.into();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pricing_rules(
        &self,
        plan_type: PlanType,
    ) -> Result<Vec<pricing_rule::Model>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rules
            .iter()
            .filter(|r| r.active && r.plan_type == plan_type)
            .cloned()
            .collect())
    }

    async fn non_terminal_bookings(&self) -> Result<Vec<booking::Model>, StoreError> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<_> = tables
            .bookings
            .values()
            .filter(|b| !b.status.is_terminal())
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bookings)
    }

    async fn acquire_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.lease {
            Some((_, until)) if until > now => Ok(false),
            _ => {
                tables.lease = Some((holder, now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew_sweep_lease(
        &self,
        holder: Uuid,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.lease {
            Some((h, _)) if h == holder => {
                tables.lease = Some((holder, now + ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_sweep_lease(&self, holder: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if matches!(tables.lease, Some((h, _)) if h == holder) {
            tables.lease = None;
        }
        Ok(())
    }
}

/// Calendar with an explicit set of closed days.
#[derive(Debug, Default)]
pub struct FixedCalendar {
    closed: std::sync::RwLock<HashSet<NaiveDate>>,
}

impl FixedCalendar {
    pub fn new(closed: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            closed: std::sync::RwLock::new(closed.into_iter().collect()),
        }
    }

    pub fn close(&self, date: NaiveDate) {
        self.closed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(date);
    }
}

#[async_trait]
impl BookingCalendar for FixedCalendar {
    async fn is_bookable(&self, date: NaiveDate) -> Result<bool, StoreError> {
        let closed = self.closed.read().unwrap_or_else(|e| e.into_inner());
        Ok(!closed.contains(&date))
    }
}
