//! Batch ingestion: validate, append, compensate, fan out.
//!
//! The coordinator is the single write path into the engine. A submit call
//! returns once the log write is durable; projection fan-out is decoupled
//! and its failures are contained downstream, so a successful response
//! guarantees durability of the raw events, not immediate visibility in
//! derived views.

use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::bus::{AllEventsStored, ProjectionBus};
use crate::compensation::{CompensationBatch, CompensationRecord, CompensationTracker};
use crate::db::log::{AppendStatus, EventLog};
use crate::error::{Error, Result};
use crate::event::{EventEnvelope, EventType, StoredEvent};

/// The closure of every date/type touched by a batch: new events plus
/// compensation targets. Ephemeral — computed once per submit, handed to
/// the bus by value, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedSet {
    /// The submitting device.
    pub device_id: String,
    /// Dates requiring reprojection.
    pub dates: BTreeSet<NaiveDate>,
    /// Event types requiring reprojection.
    pub event_types: BTreeSet<EventType>,
}

impl AffectedSet {
    /// Whether nothing was touched (no publish needed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Per-event outcome of a submit, aligned with the input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Newly appended.
    Stored,
    /// An event with this idempotency key already exists; no-op.
    Duplicate,
}

/// Outcome for one submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventResult {
    /// Position in the submitted batch.
    pub index: usize,
    /// Stored or duplicate.
    pub status: EventStatus,
    /// The canonical event id (same for a duplicate resubmission, since
    /// ids are derived from the idempotency key).
    pub event_id: String,
}

/// Result of a submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResult {
    /// Per-event outcomes, in input order.
    pub results: Vec<EventResult>,
    /// Number of newly stored events.
    pub stored_count: usize,
    /// Number of duplicate submissions skipped.
    pub duplicate_count: usize,
    /// Dates the batch invalidated (new events plus compensations).
    pub affected_dates: BTreeSet<NaiveDate>,
    /// Event types the batch invalidated.
    pub affected_event_types: BTreeSet<EventType>,
}

/// Validates and deduplicates incoming batches, writes through the log,
/// merges compensation effects, and publishes the affected closure.
pub struct IngestionCoordinator {
    log: EventLog,
    tracker: CompensationTracker,
    bus: Arc<ProjectionBus>,
}

impl IngestionCoordinator {
    /// Create a coordinator over the given collaborators.
    #[must_use]
    pub const fn new(log: EventLog, tracker: CompensationTracker, bus: Arc<ProjectionBus>) -> Self {
        Self { log, tracker, bus }
    }

    /// Ingest one client batch.
    ///
    /// Fail-closed: any malformed event payload or unknown compensation
    /// target rejects the whole batch before anything is written — no
    /// half-applied device syncs. On success the raw events are durable;
    /// projection fan-out happens after commit and its failures never
    /// reach this caller.
    ///
    /// # Errors
    ///
    /// `InvalidEventPayload`, `UnknownTargetEvent`, or
    /// `StorageUnavailable`; all abort the batch.
    pub fn submit(
        &self,
        device_id: &str,
        events: &[EventEnvelope],
        compensations: &CompensationBatch,
    ) -> Result<StoreResult> {
        // Empty batch: nothing to do, and the bus must not be touched.
        if events.is_empty() && compensations.is_empty() {
            return Ok(StoreResult {
                results: Vec::new(),
                stored_count: 0,
                duplicate_count: 0,
                affected_dates: BTreeSet::new(),
                affected_event_types: BTreeSet::new(),
            });
        }

        // 1. Validate every payload before any write.
        let stored_at = Utc::now();
        let mut to_append: Vec<StoredEvent> = Vec::with_capacity(events.len());
        for (index, envelope) in events.iter().enumerate() {
            let event = envelope
                .to_stored_event(device_id, stored_at)
                .map_err(|reason| Error::InvalidEventPayload { index, reason })?;
            to_append.push(event);
        }

        // Compensation targets must exist for this device, also before any
        // write.
        for target_id in compensations.target_ids() {
            let known = self
                .log
                .get(target_id)?
                .is_some_and(|e| e.device_id == device_id);
            if !known {
                return Err(Error::UnknownTargetEvent {
                    target_event_id: target_id.to_string(),
                });
            }
        }

        // 2. Append; duplicates are benign no-ops.
        let append = self.log.append(&to_append)?;
        let results: Vec<EventResult> = to_append
            .iter()
            .zip(&append.statuses)
            .enumerate()
            .map(|(index, (event, status))| EventResult {
                index,
                status: match status {
                    AppendStatus::Stored => EventStatus::Stored,
                    AppendStatus::Duplicate => EventStatus::Duplicate,
                },
                event_id: event.event_id.clone(),
            })
            .collect();

        // 3. Apply compensations and collect their records.
        let mut records: Vec<CompensationRecord> =
            Vec::with_capacity(compensations.deletions.len() + compensations.corrections.len());
        for deletion in &compensations.deletions {
            records.push(self.tracker.record_deletion(device_id, deletion)?);
        }
        for correction in &compensations.corrections {
            records.push(self.tracker.record_correction(device_id, correction)?);
        }

        // 4. Affected closure: dates/types of newly stored events union
        // compensation targets.
        let mut dates = BTreeSet::new();
        let mut event_types = BTreeSet::new();
        for (event, status) in to_append.iter().zip(&append.statuses) {
            if *status == AppendStatus::Stored {
                dates.extend(event.anchor_dates());
                event_types.insert(event.event_type);
            }
        }
        dates.extend(CompensationTracker::affected_dates_for(&records));
        event_types.extend(records.iter().map(|r| r.target_event_type));

        let affected = AffectedSet {
            device_id: device_id.to_string(),
            dates,
            event_types,
        };

        let stored_count = append.stored_count();
        let duplicate_count = append.duplicate_count();
        tracing::info!(
            device = device_id,
            stored = stored_count,
            duplicates = duplicate_count,
            compensations = records.len(),
            affected_dates = affected.dates.len(),
            "batch ingested"
        );

        // 5. Fan out after the log write is durable. Subscriber failures
        // are contained at the bus; the caller's result is already fixed.
        if !affected.is_empty() {
            self.bus.publish(&AllEventsStored {
                device_id: affected.device_id.clone(),
                affected_dates: affected.dates.clone(),
                event_types: affected.event_types.clone(),
            });
        }

        Ok(StoreResult {
            results,
            stored_count,
            duplicate_count,
            affected_dates: affected.dates,
            affected_event_types: affected.event_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventsSubscriber;
    use crate::db::Store;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CapturingSubscriber {
        calls: AtomicUsize,
        last: Mutex<Option<AllEventsStored>>,
    }

    impl CapturingSubscriber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    impl EventsSubscriber for CapturingSubscriber {
        fn name(&self) -> &'static str {
            "capturing"
        }

        fn on_events_stored(&self, note: &AllEventsStored) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().expect("lock") = Some(note.clone());
            Ok(())
        }
    }

    fn setup() -> (IngestionCoordinator, Arc<CapturingSubscriber>, EventLog) {
        let store = Store::open_in_memory().expect("open store");
        let log = EventLog::new(store.clone());
        let tracker = CompensationTracker::new(store);
        let subscriber = CapturingSubscriber::new();
        let mut bus = ProjectionBus::new();
        bus.register(subscriber.clone());
        let coordinator = IngestionCoordinator::new(log.clone(), tracker, Arc::new(bus));
        (coordinator, subscriber, log)
    }

    fn steps_envelope(key: &str, start: &str, end: &str, count: u32) -> EventEnvelope {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::Steps,
            payload: json!({ "bucketStart": start, "bucketEnd": end, "count": count }),
        }
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
    }

    #[test]
    fn idempotent_append_counts() {
        let (coordinator, _sub, _log) = setup();
        let batch = [steps_envelope(
            "k-1",
            "2025-01-05T08:00:00Z",
            "2025-01-05T08:15:00Z",
            100,
        )];

        let first = coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .expect("first submit");
        assert_eq!(first.stored_count, 1);
        assert_eq!(first.duplicate_count, 0);
        assert_eq!(first.results[0].status, EventStatus::Stored);

        let second = coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .expect("second submit");
        assert_eq!(second.stored_count, 0);
        assert_eq!(second.duplicate_count, 1);
        assert_eq!(second.results[0].status, EventStatus::Duplicate);
        assert_eq!(
            second.results[0].event_id, first.results[0].event_id,
            "duplicate reports the canonical event id"
        );
    }

    #[test]
    fn invalid_payload_rejects_whole_batch() {
        let (coordinator, sub, log) = setup();
        let batch = [
            steps_envelope("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 100),
            EventEnvelope {
                idempotency_key: "k-2".into(),
                event_type: EventType::Steps,
                payload: json!({ "count": "NaN" }),
            },
        ];

        let err = coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEventPayload { index: 1, .. }));

        // Fail-closed: the valid sibling was not stored either.
        assert!(!log.exists("dev-1", "k-1").expect("exists"));
        assert_eq!(sub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_batch_never_touches_the_bus() {
        let (coordinator, sub, _log) = setup();
        let result = coordinator
            .submit("dev-1", &[], &CompensationBatch::default())
            .expect("empty submit");
        assert_eq!(result.stored_count, 0);
        assert!(result.affected_dates.is_empty());
        assert_eq!(sub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_only_batch_does_not_publish() {
        let (coordinator, sub, _log) = setup();
        let batch = [steps_envelope(
            "k-1",
            "2025-01-05T08:00:00Z",
            "2025-01-05T08:15:00Z",
            100,
        )];
        coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .expect("first submit");
        assert_eq!(sub.calls.load(Ordering::SeqCst), 1);

        coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .expect("duplicate submit");
        assert_eq!(
            sub.calls.load(Ordering::SeqCst),
            1,
            "nothing new stored, nothing to reproject"
        );
    }

    #[test]
    fn compensation_only_batch_still_publishes_closure() {
        let (coordinator, sub, _log) = setup();
        let batch = [steps_envelope(
            "k-1",
            "2025-01-05T08:00:00Z",
            "2025-01-05T08:15:00Z",
            100,
        )];
        let stored = coordinator
            .submit("dev-1", &batch, &CompensationBatch::default())
            .expect("seed submit");
        let target = stored.results[0].event_id.clone();

        let compensations = CompensationBatch {
            deletions: vec![crate::compensation::CompensationEventData {
                compensation_event_id: "comp-1".into(),
                target_event_id: target,
                affected_dates: vec![],
            }],
            corrections: vec![],
        };
        let result = coordinator
            .submit("dev-1", &[], &compensations)
            .expect("compensation submit");

        assert_eq!(result.stored_count, 0);
        assert_eq!(
            result.affected_dates.iter().copied().collect::<Vec<_>>(),
            vec![jan(5)]
        );
        assert!(result.affected_event_types.contains(&EventType::Steps));

        let note = sub.last.lock().expect("lock").clone().expect("published");
        assert_eq!(note.affected_dates.into_iter().collect::<Vec<_>>(), vec![jan(5)]);
        assert_eq!(sub.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_compensation_target_rejects_before_append() {
        let (coordinator, _sub, log) = setup();
        let batch = [steps_envelope(
            "k-new",
            "2025-01-06T08:00:00Z",
            "2025-01-06T08:15:00Z",
            10,
        )];
        let compensations = CompensationBatch {
            deletions: vec![crate::compensation::CompensationEventData {
                compensation_event_id: "comp-1".into(),
                target_event_id: "ev-missing".into(),
                affected_dates: vec![],
            }],
            corrections: vec![],
        };

        let err = coordinator
            .submit("dev-1", &batch, &compensations)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTargetEvent { .. }));
        assert!(
            !log.exists("dev-1", "k-new").expect("exists"),
            "append never happened"
        );
    }

    #[test]
    fn affected_set_spans_new_events_and_compensations() {
        let (coordinator, _sub, _log) = setup();
        let seed = [steps_envelope(
            "k-1",
            "2025-01-05T08:00:00Z",
            "2025-01-05T08:15:00Z",
            100,
        )];
        let stored = coordinator
            .submit("dev-1", &seed, &CompensationBatch::default())
            .expect("seed submit");
        let target = stored.results[0].event_id.clone();

        let batch = [steps_envelope(
            "k-2",
            "2025-01-06T09:00:00Z",
            "2025-01-06T09:15:00Z",
            40,
        )];
        let compensations = CompensationBatch {
            deletions: vec![],
            corrections: vec![crate::compensation::CompensationEventData {
                compensation_event_id: "comp-1".into(),
                target_event_id: target,
                affected_dates: vec![],
            }],
        };
        let result = coordinator
            .submit("dev-1", &batch, &compensations)
            .expect("submit");

        assert_eq!(
            result.affected_dates.iter().copied().collect::<Vec<_>>(),
            vec![jan(5), jan(6)],
            "new-event date union corrected-target date"
        );
    }
}
