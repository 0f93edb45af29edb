//! Daily heart-rate projection.
//!
//! Consumes both bucketed heart-rate summaries and standalone resting
//! readings; a day with only a resting reading still gets a row.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::parse_date;
use super::DomainProjector;

/// One day of heart-rate data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Mean of the bucketed averages, when any buckets exist.
    pub avg_bpm: Option<f64>,
    /// Lowest bpm observed across buckets.
    pub min_bpm: Option<u32>,
    /// Highest bpm observed across buckets.
    pub max_bpm: Option<u32>,
    /// Latest resting reading of the day.
    pub resting_bpm: Option<u32>,
    /// Number of heart-rate buckets contributing.
    pub sample_count: u32,
}

/// Owns `proj_heart`.
#[derive(Clone)]
pub struct HeartProjector {
    store: Store,
}

impl HeartProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any readings exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<HeartDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT avg_bpm, min_bpm, max_bpm, resting_bpm, sample_count
                 FROM proj_heart WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
                |row| row_to_daily(date, row, 0),
            )
            .optional()
        })
    }

    /// Projection rows for every day in `[from, to]` that has data.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn range_summary(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> crate::error::Result<Vec<HeartDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, avg_bpm, min_bpm, max_bpm, resting_bpm, sample_count
                 FROM proj_heart
                 WHERE device_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )?;
            let rows = stmt.query_map(
                params![device_id, from.to_string(), to.to_string()],
                |row| {
                    let date = parse_date(row, 0)?;
                    row_to_daily(date, row, 1)
                },
            )?;
            rows.collect()
        })
    }

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<HeartDaily> {
        let mut avg_sum = 0.0;
        let mut sample_count = 0u32;
        let mut min_bpm: Option<u32> = None;
        let mut max_bpm: Option<u32> = None;
        let mut resting: Option<(DateTime<Utc>, u32)> = None;

        for event in events {
            match &event.payload {
                EventPayload::HeartRate(data) => {
                    if data.bucket_start.date_naive() != date {
                        continue;
                    }
                    avg_sum += data.avg_bpm;
                    sample_count += 1;
                    if let Some(bpm) = data.min_bpm {
                        min_bpm = Some(min_bpm.map_or(bpm, |m| m.min(bpm)));
                    }
                    if let Some(bpm) = data.max_bpm {
                        max_bpm = Some(max_bpm.map_or(bpm, |m| m.max(bpm)));
                    }
                }
                EventPayload::RestingHeartRate(data) => {
                    if data.measured_at.date_naive() != date {
                        continue;
                    }
                    // Latest reading of the day wins.
                    if resting.is_none_or(|(at, _)| data.measured_at > at) {
                        resting = Some((data.measured_at, data.bpm));
                    }
                }
                _ => {}
            }
        }

        if sample_count == 0 && resting.is_none() {
            return None;
        }

        Some(HeartDaily {
            date,
            avg_bpm: (sample_count > 0).then(|| avg_sum / f64::from(sample_count)),
            min_bpm,
            max_bpm,
            resting_bpm: resting.map(|(_, bpm)| bpm),
            sample_count,
        })
    }
}

impl DomainProjector for HeartProjector {
    fn name(&self) -> &'static str {
        "heart"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::HeartRate, EventType::RestingHeartRate]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_heart WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let Some(d) = &daily {
                tx.execute(
                    "INSERT INTO proj_heart (
                        device_id, date, avg_bpm, min_bpm, max_bpm, resting_bpm, sample_count
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        device_id,
                        date.to_string(),
                        d.avg_bpm,
                        d.min_bpm,
                        d.max_bpm,
                        d.resting_bpm,
                        d.sample_count,
                    ],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn delete_projections_for_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM proj_heart WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}

fn row_to_daily(
    date: NaiveDate,
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<HeartDaily> {
    Ok(HeartDaily {
        date,
        avg_bpm: row.get(base)?,
        min_bpm: row.get(base + 1)?,
        max_bpm: row.get(base + 2)?,
        resting_bpm: row.get(base + 3)?,
        sample_count: row.get(base + 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEnvelope;
    use serde_json::json;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
    }

    fn hr_event(key: &str, start: &str, end: &str, avg: f64, min: u32, max: u32) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::HeartRate,
            payload: json!({
                "bucketStart": start,
                "bucketEnd": end,
                "avgBpm": avg,
                "minBpm": min,
                "maxBpm": max
            }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    fn resting_event(key: &str, at: &str, bpm: u32) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::RestingHeartRate,
            payload: json!({ "measuredAt": at, "bpm": bpm }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    #[test]
    fn combines_buckets_with_latest_resting_reading() {
        let projector = HeartProjector::new(Store::open_in_memory().expect("open store"));
        let events = [
            hr_event("k-1", "2025-01-05T08:00:00Z", "2025-01-05T09:00:00Z", 70.0, 55, 120),
            hr_event("k-2", "2025-01-05T09:00:00Z", "2025-01-05T10:00:00Z", 90.0, 60, 150),
            resting_event("k-3", "2025-01-05T06:00:00Z", 54),
            resting_event("k-4", "2025-01-05T22:00:00Z", 51),
        ];
        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project");

        let daily = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(daily.sample_count, 2);
        assert_eq!(daily.avg_bpm, Some(80.0));
        assert_eq!(daily.min_bpm, Some(55));
        assert_eq!(daily.max_bpm, Some(150));
        assert_eq!(daily.resting_bpm, Some(51), "latest reading wins");
    }

    #[test]
    fn resting_only_day_still_gets_a_row() {
        let projector = HeartProjector::new(Store::open_in_memory().expect("open store"));
        let events = [resting_event("k-1", "2025-01-05T06:00:00Z", 58)];
        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project");

        let daily = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(daily.sample_count, 0);
        assert_eq!(daily.avg_bpm, None);
        assert_eq!(daily.resting_bpm, Some(58));
    }
}
