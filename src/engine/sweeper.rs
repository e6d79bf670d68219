use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::utils::clock::Clock;

use super::error::{BookingError, BookingResult};
use super::lifecycle::{BookingLifecycle, Transitioned};
use super::store::BookingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub as_of: DateTime<Utc>,
    pub activated: u32,
    pub expired: u32,
    pub unchanged: u32,
    pub failed: u32,
}

impl SweepReport {
    fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            activated: 0,
            expired: 0,
            unchanged: 0,
            failed: 0,
        }
    }
}

enum SweepAction {
    Activated,
    Expired,
    Unchanged,
}

/// Periodic re-evaluation of time-dependent booking states.
///
/// Only one sweep runs at a time: a local `try_lock` guards this process and
/// a lease row in the store guards against other instances. The lease is
/// renewed once half its TTL has passed, and a sweep that loses it stops
/// before touching further bookings.
pub struct StatusSweeper {
    lifecycle: Arc<BookingLifecycle>,
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    run_lock: Mutex<()>,
    instance_id: Uuid,
    lease_ttl: Duration,
}

impl StatusSweeper {
    pub fn new(
        lifecycle: Arc<BookingLifecycle>,
        store: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            lifecycle,
            store,
            clock,
            run_lock: Mutex::new(()),
            instance_id: Uuid::new_v4(),
            lease_ttl,
        }
    }

    pub async fn run(&self, as_of: DateTime<Utc>) -> BookingResult<SweepReport> {
        let Ok(_local) = self.run_lock.try_lock() else {
            return Err(BookingError::SweepAlreadyRunning);
        };

        let leased_at = self.clock.now();
        let acquired = self
            .store
            .acquire_sweep_lease(self.instance_id, self.lease_ttl, leased_at)
            .await?;
        if !acquired {
            return Err(BookingError::SweepAlreadyRunning);
        }

        let result = self.sweep(as_of, leased_at).await;

        if let Err(e) = self.store.release_sweep_lease(self.instance_id).await {
            tracing::warn!(error = %e, "Failed to release sweep lease, it will lapse");
        }
        result
    }

    /// Run a sweep on every tick of `period` until the task is dropped.
    pub async fn run_periodically(self: Arc<Self>, period: StdDuration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.run(self.clock.now()).await {
                Ok(report) => tracing::debug!(?report, "Scheduled sweep finished"),
                Err(BookingError::SweepAlreadyRunning) => {
                    tracing::debug!("Sweep skipped, another run holds the lock")
                }
                Err(e) => tracing::error!(error = %e, "Scheduled sweep failed"),
            }
        }
    }

    async fn sweep(
        &self,
        as_of: DateTime<Utc>,
        leased_at: DateTime<Utc>,
    ) -> BookingResult<SweepReport> {
        let candidates = self.store.non_terminal_bookings().await?;
        tracing::info!(count = candidates.len(), %as_of, "Starting status sweep");

        let mut report = SweepReport::new(as_of);
        let mut renew_at = leased_at + self.lease_ttl / 2;
        for booking in &candidates {
            let now = self.clock.now();
            if now >= renew_at {
                match self
                    .store
                    .renew_sweep_lease(self.instance_id, self.lease_ttl, now)
                    .await
                {
                    Ok(true) => renew_at = now + self.lease_ttl / 2,
                    Ok(false) => {
                        tracing::warn!("Sweep lease taken over, stopping early");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to renew sweep lease, stopping early");
                        break;
                    }
                }
            }

            match self.sweep_one(booking, as_of).await {
                Ok(SweepAction::Activated) => report.activated += 1,
                Ok(SweepAction::Expired) => report.expired += 1,
                Ok(SweepAction::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(booking_id = %booking.id, error = %e, "Sweep item failed");
                }
            }
        }

        tracing::info!(
            activated = report.activated,
            expired = report.expired,
            unchanged = report.unchanged,
            failed = report.failed,
            "Status sweep finished"
        );
        Ok(report)
    }

    async fn sweep_one(
        &self,
        booking: &booking::Model,
        as_of: DateTime<Utc>,
    ) -> BookingResult<SweepAction> {
        // Payment recorded but the transition never landed
        if booking.status != BookingStatus::Active {
            if let Some(payment_ref) = booking.external_payment_ref.as_deref() {
                let activated = self.lifecycle.activate(booking.id, payment_ref).await;
                return settle(activated, SweepAction::Activated);
            }
        }

        let expired = self.lifecycle.expire_if_due(booking.id, as_of).await;
        settle(expired, SweepAction::Expired)
    }
}

fn settle(
    result: BookingResult<Transitioned>,
    on_change: SweepAction,
) -> BookingResult<SweepAction> {
    match result {
        Ok(outcome) if outcome.changed => Ok(on_change),
        Ok(_) => Ok(SweepAction::Unchanged),
        // Cancelled or expired after the candidate list was read
        Err(BookingError::InvalidTransition { .. }) => Ok(SweepAction::Unchanged),
        Err(e) => Err(e),
    }
}
