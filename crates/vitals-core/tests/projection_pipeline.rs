//! End-to-end pipeline tests: submit batches through the engine and
//! assert what the projections and summaries converge to.

use chrono::NaiveDate;
use serde_json::json;
use vitals_core::{
    CompensationBatch, CompensationEventData, EventEnvelope, EventStatus, EventType, HealthEngine,
};

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
}

fn steps(key: &str, start: &str, end: &str, count: u32) -> EventEnvelope {
    EventEnvelope {
        idempotency_key: key.into(),
        event_type: EventType::Steps,
        payload: json!({ "bucketStart": start, "bucketEnd": end, "count": count }),
    }
}

fn sleep(key: &str, start: &str, end: &str, minutes: u32) -> EventEnvelope {
    EventEnvelope {
        idempotency_key: key.into(),
        event_type: EventType::Sleep,
        payload: json!({ "sleepStart": start, "sleepEnd": end, "totalMinutes": minutes }),
    }
}

fn deletion(comp_id: &str, target: &str) -> CompensationBatch {
    CompensationBatch {
        deletions: vec![CompensationEventData {
            compensation_event_id: comp_id.into(),
            target_event_id: target.into(),
            affected_dates: vec![],
        }],
        corrections: vec![],
    }
}

#[test]
fn duplicate_submission_does_not_double_count() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 800)];

    engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("first submit");
    let replay = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("replayed submit");
    assert_eq!(replay.results[0].status, EventStatus::Duplicate);

    let daily = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .expect("row present");
    assert_eq!(daily.total_steps, 800, "replay contributed nothing");
}

#[test]
fn reproject_is_idempotent() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [
        steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 500),
        steps("k-2", "2025-01-05T17:00:00Z", "2025-01-05T17:15:00Z", 1500),
    ];
    engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");

    let before = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read");
    engine.reproject("dev-1", &[jan(5)]);
    engine.reproject("dev-1", &[jan(5)]);
    let after = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read");
    assert_eq!(before, after, "repeated rebuilds converge on the same row");
}

#[test]
fn deleting_one_event_removes_exactly_its_contribution() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [
        steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 500),
        steps("k-2", "2025-01-05T17:00:00Z", "2025-01-05T17:15:00Z", 1500),
    ];
    let stored = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");
    let target = stored.results[1].event_id.clone();

    engine
        .submit("dev-1", &[], &deletion("comp-1", &target))
        .expect("deletion submit");

    let daily = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .expect("row present");
    assert_eq!(daily.total_steps, 500);
    assert_eq!(daily.hourly[17], 0);
}

#[test]
fn deleting_the_last_event_clears_projection_and_summary() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 500)];
    let stored = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");
    assert!(engine
        .daily_summary("dev-1", jan(5))
        .expect("read")
        .is_some());

    engine
        .submit("dev-1", &[], &deletion("comp-1", &stored.results[0].event_id))
        .expect("deletion submit");

    assert!(engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .is_none());
    assert!(engine
        .daily_summary("dev-1", jan(5))
        .expect("read")
        .is_none());

    // The event itself is still in the log for audit.
    assert!(engine
        .log()
        .get(&stored.results[0].event_id)
        .expect("get")
        .is_some());
}

#[test]
fn correction_replaces_the_target_contribution() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 500)];
    let stored = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");

    // One batch: tombstone the old bucket, supply the corrected one.
    let corrections = CompensationBatch {
        deletions: vec![],
        corrections: vec![CompensationEventData {
            compensation_event_id: "comp-1".into(),
            target_event_id: stored.results[0].event_id.clone(),
            affected_dates: vec![],
        }],
    };
    let replacement = [steps("k-1-fix", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 650)];
    engine
        .submit("dev-1", &replacement, &corrections)
        .expect("correction submit");

    let daily = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .expect("row present");
    assert_eq!(daily.total_steps, 650, "old value gone, corrected value in");
}

#[test]
fn compensation_only_batch_still_rebuilds_affected_dates() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [
        steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 500),
        steps("k-2", "2025-01-05T09:00:00Z", "2025-01-05T09:15:00Z", 300),
    ];
    let stored = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");

    let result = engine
        .submit("dev-1", &[], &deletion("comp-1", &stored.results[0].event_id))
        .expect("deletion submit");
    assert_eq!(result.stored_count, 0);
    assert_eq!(
        result.affected_dates.into_iter().collect::<Vec<_>>(),
        vec![jan(5)],
        "zero new events still yields a non-empty closure"
    );

    let daily = engine
        .steps()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .expect("row present");
    assert_eq!(daily.total_steps, 300);
}

#[test]
fn empty_batch_is_a_complete_no_op() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let result = engine
        .submit("dev-1", &[], &CompensationBatch::default())
        .expect("empty submit");
    assert_eq!(result.stored_count, 0);
    assert!(result.affected_dates.is_empty());
    assert!(engine
        .daily_summary("dev-1", jan(5))
        .expect("read")
        .is_none());
}

#[test]
fn cross_domain_summary_combines_steps_and_sleep() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [
        steps("k-steps", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 8000),
        sleep("k-sleep", "2025-01-04T23:00:00Z", "2025-01-05T06:00:00Z", 420),
    ];
    engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");

    let summary = engine
        .daily_summary("dev-1", jan(5))
        .expect("read")
        .expect("summary present");
    assert_eq!(
        summary.activity.steps.as_ref().map(|s| s.total_steps),
        Some(8000)
    );
    assert_eq!(summary.sleep.as_ref().map(|s| s.total_minutes), Some(420));
    assert!(summary.score > 0);
}

#[test]
fn midnight_straddling_sleep_touches_both_dates_once() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    let batch = [sleep("k-1", "2025-01-04T22:30:00Z", "2025-01-05T06:10:00Z", 430)];
    let result = engine
        .submit("dev-1", &batch, &CompensationBatch::default())
        .expect("submit");
    assert_eq!(
        result.affected_dates.into_iter().collect::<Vec<_>>(),
        vec![jan(4), jan(5)]
    );

    // Counted once, on the waking day.
    assert!(engine
        .sleep()
        .daily_breakdown("dev-1", jan(4))
        .expect("read")
        .is_none());
    let waking = engine
        .sleep()
        .daily_breakdown("dev-1", jan(5))
        .expect("read")
        .expect("row present");
    assert_eq!(waking.total_minutes, 430);
}

#[test]
fn devices_are_isolated() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    engine
        .submit(
            "dev-1",
            &[steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 700)],
            &CompensationBatch::default(),
        )
        .expect("submit dev-1");
    engine
        .submit(
            "dev-2",
            &[steps("k-1", "2025-01-05T08:00:00Z", "2025-01-05T08:15:00Z", 40)],
            &CompensationBatch::default(),
        )
        .expect("submit dev-2");

    assert_eq!(
        engine
            .steps()
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .map(|d| d.total_steps),
        Some(700)
    );
    assert_eq!(
        engine
            .steps()
            .daily_breakdown("dev-2", jan(5))
            .expect("read")
            .map(|d| d.total_steps),
        Some(40),
        "same idempotency key on another device is a distinct event"
    );
}

#[test]
fn range_summaries_span_multiple_days() {
    let engine = HealthEngine::open_in_memory().expect("open engine");
    for (day, key, count) in [(5, "k-5", 400), (6, "k-6", 900), (8, "k-8", 1200)] {
        engine
            .submit(
                "dev-1",
                &[steps(
                    key,
                    &format!("2025-01-0{day}T08:00:00Z"),
                    &format!("2025-01-0{day}T08:15:00Z"),
                    count,
                )],
                &CompensationBatch::default(),
            )
            .expect("submit");
    }

    let range = engine
        .steps()
        .range_summary("dev-1", jan(5), jan(8))
        .expect("range");
    assert_eq!(
        range
            .iter()
            .map(|d| (d.date, d.total_steps))
            .collect::<Vec<_>>(),
        vec![(jan(5), 400), (jan(6), 900), (jan(8), 1200)],
        "gap days have no row"
    );
}
