use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::entities::booking::PlanType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The booked period is over.
    PeriodEnded,
    /// Never paid within the grace window.
    Abandoned,
}

/// Facts emitted by the booking lifecycle for downstream notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BookingCreated {
        booking_id: Uuid,
        student_id: Uuid,
        route_id: Uuid,
        plan_type: PlanType,
        amount: Decimal,
        currency: String,
    },
    BookingAwaitingApproval {
        booking_id: Uuid,
    },
    BookingActivated {
        booking_id: Uuid,
        external_payment_ref: String,
    },
    BookingExpired {
        booking_id: Uuid,
        route_id: Uuid,
        reason: ExpiryReason,
    },
    BookingCancelled {
        booking_id: Uuid,
        route_id: Uuid,
    },
    BookingPaymentFailed {
        booking_id: Uuid,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::BookingCreated { .. } => "booking_created",
            DomainEvent::BookingAwaitingApproval { .. } => "booking_awaiting_approval",
            DomainEvent::BookingActivated { .. } => "booking_activated",
            DomainEvent::BookingExpired { .. } => "booking_expired",
            DomainEvent::BookingCancelled { .. } => "booking_cancelled",
            DomainEvent::BookingPaymentFailed { .. } => "booking_payment_failed",
        }
    }

    pub fn booking_id(&self) -> Uuid {
        match self {
            DomainEvent::BookingCreated { booking_id, .. }
            | DomainEvent::BookingAwaitingApproval { booking_id }
            | DomainEvent::BookingActivated { booking_id, .. }
            | DomainEvent::BookingExpired { booking_id, .. }
            | DomainEvent::BookingCancelled { booking_id, .. }
            | DomainEvent::BookingPaymentFailed { booking_id } => *booking_id,
        }
    }
}

/// Fire-and-forget destination for domain events. Delivery and formatting
/// belong to whatever sits behind the sink.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: DomainEvent) {
        tracing::info!(
            event = event.name(),
            booking_id = %event.booking_id(),
            payload = ?event,
            "Domain event"
        );
    }
}

/// Broadcasts events to in-process subscribers (notification relays, tests).
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: DomainEvent) {
        // No subscribers is not an error for a fire-and-forget sink
        if self.tx.send(event).is_err() {
            tracing::trace!("Domain event dropped, no subscribers");
        }
    }
}
