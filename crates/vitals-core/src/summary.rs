//! Cross-domain daily summary.
//!
//! The aggregator is a bus subscriber like the projectors, but reads the
//! projection tables rather than the event log. Registration order on the
//! bus puts it last, so within one notification it usually sees the fresh
//! rows; when it doesn't (a projector failed), the summary converges on the
//! next notification or reproject for that date. Each affected date moves
//! through pending -> aggregating -> succeeded/failed independently; a
//! failed date never blocks its siblings and is not retried here.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bus::{AllEventsStored, EventsSubscriber};
use crate::db::{datetime_to_us, Store};
use crate::error::Error;
use crate::projector::{
    activity::ActivityDaily, body::BodyDaily, calories::CaloriesDaily, heart::HeartDaily,
    meals::MealsDaily, sleep::SleepDaily, steps::StepsDaily, weight::WeightDaily,
    workout::WorkoutDaily, ActivityProjector, BodyProjector, CaloriesProjector, HeartProjector,
    MealsProjector, SleepProjector, StepsProjector, WeightProjector, WorkoutProjector,
};

/// Movement-related slice of the daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActivitySummary {
    /// Step rollup, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<StepsDaily>,
    /// Active-minutes rollup, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ActivityDaily>,
    /// Active-calories rollup, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<CaloriesDaily>,
}

/// Body-composition slice of the daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BodySummary {
    /// Weight of the day, when measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<WeightDaily>,
    /// Tape measurements of the day, when taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<BodyDaily>,
}

/// One device-day across every domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Steps, active minutes, active calories.
    pub activity: ActivitySummary,
    /// The day's workouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workouts: Option<WorkoutDaily>,
    /// The night's sleep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepDaily>,
    /// Heart-rate rollup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart: Option<HeartDaily>,
    /// Meals and macros.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<MealsDaily>,
    /// Weight and tape measurements.
    pub body: BodySummary,
    /// Composite 0-100 health score.
    pub score: u32,
}

/// Composite 0-100 score: steps against 10k (40%), active minutes against
/// 30 (30%), sleep against 8h (30%).
fn health_score(steps: Option<u32>, active_minutes: Option<u32>, sleep_minutes: Option<u32>) -> u32 {
    fn part(value: u32, target: u32, weight: u32) -> u32 {
        (value.min(target).saturating_mul(weight)) / target
    }
    part(steps.unwrap_or(0), 10_000, 40)
        + part(active_minutes.unwrap_or(0), 30, 30)
        + part(sleep_minutes.unwrap_or(0), 480, 30)
}

/// Builds and stores [`DailySummary`] rows from the projection tables.
pub struct DailySummaryAggregator {
    store: Store,
    steps: StepsProjector,
    activity: ActivityProjector,
    calories: CaloriesProjector,
    heart: HeartProjector,
    sleep: SleepProjector,
    workout: WorkoutProjector,
    meals: MealsProjector,
    weight: WeightProjector,
    body: BodyProjector,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl DailySummaryAggregator {
    /// Create an aggregator reading and writing the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            steps: StepsProjector::new(store.clone()),
            activity: ActivityProjector::new(store.clone()),
            calories: CaloriesProjector::new(store.clone()),
            heart: HeartProjector::new(store.clone()),
            sleep: SleepProjector::new(store.clone()),
            workout: WorkoutProjector::new(store.clone()),
            meals: MealsProjector::new(store.clone()),
            weight: WeightProjector::new(store.clone()),
            body: BodyProjector::new(store.clone()),
            store,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Assemble and store the summary for one device-day. A day with no
    /// projection rows at all gets its summary row removed.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure; the caller isolates it per
    /// date.
    pub fn aggregate_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        let summary = self.assemble(device_id, date)?;
        let json = summary.as_ref().map(serde_json::to_string).transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM daily_summary WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let Some(json) = &json {
                tx.execute(
                    "INSERT INTO daily_summary (device_id, date, summary, generated_at_us)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        device_id,
                        date.to_string(),
                        json,
                        datetime_to_us(Utc::now()),
                    ],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// The stored summary for one device-day, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_summary(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<DailySummary>> {
        let json: Option<String> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT summary FROM daily_summary WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
                |row| row.get(0),
            )
            .optional()
        })?;

        match json {
            Some(json) => {
                let summary = serde_json::from_str(&json).map_err(|e| Error::AggregationFailed {
                    date,
                    source: anyhow::Error::new(e),
                })?;
                Ok(Some(summary))
            }
            None => Ok(None),
        }
    }

    /// Lifetime count of per-date aggregation failures.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn assemble(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<Option<DailySummary>> {
        let activity = ActivitySummary {
            steps: self.steps.daily_breakdown(device_id, date)?,
            active: self.activity.daily_breakdown(device_id, date)?,
            calories: self.calories.daily_breakdown(device_id, date)?,
        };
        let workouts = self.workout.daily_breakdown(device_id, date)?;
        let sleep = self.sleep.daily_breakdown(device_id, date)?;
        let heart = self.heart.daily_breakdown(device_id, date)?;
        let nutrition = self.meals.daily_breakdown(device_id, date)?;
        let body = BodySummary {
            weight: self.weight.daily_breakdown(device_id, date)?,
            measurements: self.body.daily_breakdown(device_id, date)?,
        };

        let empty = activity.steps.is_none()
            && activity.active.is_none()
            && activity.calories.is_none()
            && workouts.is_none()
            && sleep.is_none()
            && heart.is_none()
            && nutrition.is_none()
            && body.weight.is_none()
            && body.measurements.is_none();
        if empty {
            return Ok(None);
        }

        let score = health_score(
            activity.steps.as_ref().map(|s| s.total_steps),
            activity.active.as_ref().map(|a| a.total_active_minutes),
            sleep.as_ref().map(|s| s.total_minutes),
        );

        Ok(Some(DailySummary {
            date,
            activity,
            workouts,
            sleep,
            heart,
            nutrition,
            body,
            score,
        }))
    }
}

impl EventsSubscriber for DailySummaryAggregator {
    fn name(&self) -> &'static str {
        "daily-summary"
    }

    fn on_events_stored(&self, note: &AllEventsStored) -> anyhow::Result<()> {
        let mut failed = 0usize;
        for &date in &note.affected_dates {
            match self.aggregate_date(&note.device_id, date) {
                Ok(()) => {
                    self.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failed += 1;
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    let err = Error::AggregationFailed { date, source: e };
                    tracing::error!(
                        device = %note.device_id,
                        date = %date,
                        error = %err,
                        "daily summary aggregation failed; continuing with remaining dates"
                    );
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} date aggregations failed", note.affected_dates.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::log::EventLog;
    use crate::event::{EventEnvelope, EventType};
    use crate::projector::DomainProjector;
    use serde_json::json;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
    }

    fn envelope(key: &str, event_type: EventType, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type,
            payload,
        }
    }

    fn project_all(store: &Store, device: &str, date: NaiveDate) {
        let log = EventLog::new(store.clone());
        let projectors: Vec<Box<dyn DomainProjector>> = vec![
            Box::new(StepsProjector::new(store.clone())),
            Box::new(ActivityProjector::new(store.clone())),
            Box::new(SleepProjector::new(store.clone())),
        ];
        for projector in projectors {
            let events = log
                .find_by_device_and_date_range(device, Some(projector.event_types()), date, date)
                .expect("range read");
            projector
                .project_events(device, date, &events)
                .expect("project");
        }
    }

    #[test]
    fn summary_combines_domains_and_scores() {
        let store = Store::open_in_memory().expect("open store");
        let log = EventLog::new(store.clone());
        let now = Utc::now();

        let events: Vec<_> = [
            envelope(
                "k-steps",
                EventType::Steps,
                json!({
                    "bucketStart": "2025-01-05T08:00:00Z",
                    "bucketEnd": "2025-01-05T08:15:00Z",
                    "count": 8000
                }),
            ),
            envelope(
                "k-sleep",
                EventType::Sleep,
                json!({
                    "sleepStart": "2025-01-04T23:00:00Z",
                    "sleepEnd": "2025-01-05T06:00:00Z",
                    "totalMinutes": 420
                }),
            ),
        ]
        .iter()
        .map(|e| e.to_stored_event("dev-1", now).expect("valid envelope"))
        .collect();
        log.append(&events).expect("append");
        project_all(&store, "dev-1", jan(5));

        let aggregator = DailySummaryAggregator::new(store);
        aggregator
            .aggregate_date("dev-1", jan(5))
            .expect("aggregate");

        let summary = aggregator
            .daily_summary("dev-1", jan(5))
            .expect("read")
            .expect("summary present");
        assert_eq!(
            summary.activity.steps.as_ref().map(|s| s.total_steps),
            Some(8000)
        );
        assert_eq!(summary.sleep.as_ref().map(|s| s.total_minutes), Some(420));
        assert!(summary.nutrition.is_none());
        // 8000/10000 of 40 plus 420/480 of 30, no active minutes.
        assert_eq!(summary.score, 32 + 26);
    }

    #[test]
    fn empty_day_removes_the_summary_row() {
        let store = Store::open_in_memory().expect("open store");
        let aggregator = DailySummaryAggregator::new(store);
        aggregator
            .aggregate_date("dev-1", jan(5))
            .expect("aggregate empty day");
        assert!(aggregator
            .daily_summary("dev-1", jan(5))
            .expect("read")
            .is_none());
    }

    #[test]
    fn score_weights() {
        assert_eq!(health_score(Some(10_000), Some(30), Some(480)), 100);
        assert_eq!(health_score(Some(20_000), Some(90), Some(600)), 100);
        assert_eq!(health_score(None, None, None), 0);
        assert_eq!(health_score(Some(5_000), None, None), 20);
    }
}
