//! Fan-out of "events stored" notifications to projection owners.
//!
//! An explicit in-process registry: each subscriber is identified by a
//! stable domain name, and registration order never affects correctness —
//! subscribers must be independent, since delivery is at-least-once and
//! order-independent across projectors. A failing subscriber is logged and
//! counted but never prevents the remaining subscribers from running, and
//! never propagates back to the ingestion caller: the event log is already
//! durable by the time a notification goes out.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::EventType;

/// Notification that a batch for one device was durably appended.
///
/// Carries the affected closure (dates + event types) so subscribers can
/// filter without re-deriving it; the event data itself is deliberately
/// absent — projectors re-fetch live events fresh from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllEventsStored {
    /// The device whose batch was stored.
    pub device_id: String,
    /// Every date touched by new events or compensations.
    pub affected_dates: BTreeSet<NaiveDate>,
    /// Every event type touched by new events or compensation targets.
    pub event_types: BTreeSet<EventType>,
}

/// A consumer of [`AllEventsStored`] notifications.
pub trait EventsSubscriber: Send + Sync {
    /// Stable domain name, used for logging and failure attribution.
    fn name(&self) -> &'static str;

    /// Handle one notification. Must be idempotent: the same notification
    /// may be delivered more than once.
    ///
    /// # Errors
    ///
    /// Errors are contained by the bus (logged + counted), never
    /// propagated to the publisher.
    fn on_events_stored(&self, note: &AllEventsStored) -> anyhow::Result<()>;
}

/// Per-publish outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that completed without error.
    pub delivered: usize,
    /// Subscribers whose handler returned an error.
    pub failed: usize,
}

/// Registry of subscribers plus lifetime failure counters.
#[derive(Default)]
pub struct ProjectionBus {
    subscribers: Vec<Arc<dyn EventsSubscriber>>,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

impl ProjectionBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Names should be unique; they key failure
    /// attribution in logs.
    pub fn register(&mut self, subscriber: Arc<dyn EventsSubscriber>) {
        tracing::debug!(subscriber = subscriber.name(), "registered bus subscriber");
        self.subscribers.push(subscriber);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver a notification to every registered subscriber. A failing
    /// subscriber does not prevent the rest from running.
    pub fn publish(&self, note: &AllEventsStored) -> PublishReport {
        let mut report = PublishReport::default();

        for subscriber in &self.subscribers {
            self.deliveries.fetch_add(1, Ordering::Relaxed);
            match subscriber.on_events_stored(note) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::error!(
                        subscriber = subscriber.name(),
                        device = %note.device_id,
                        dates = note.affected_dates.len(),
                        error = %e,
                        "subscriber failed; continuing with remaining subscribers"
                    );
                }
            }
        }

        tracing::debug!(
            device = %note.device_id,
            dates = note.affected_dates.len(),
            delivered = report.delivered,
            failed = report.failed,
            "published events-stored notification"
        );
        report
    }

    /// Lifetime count of subscriber handler failures.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Lifetime count of subscriber deliveries attempted.
    #[must_use]
    pub fn delivery_count(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }
}
