//! Daily step projection with an hourly breakdown.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{datetime_to_us, us_to_datetime, Store};
use crate::event::{EventPayload, EventType, StoredEvent};

use super::DomainProjector;

/// One day of step data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Total steps across the day.
    pub total_steps: u32,
    /// Number of hours with at least one step.
    pub active_hours: u32,
    /// Hour (0-23) with the most steps, when any were taken.
    pub most_active_hour: Option<u32>,
    /// Steps during the most active hour.
    pub most_active_hour_steps: Option<u32>,
    /// Start of the first non-empty bucket.
    pub first_step_at: Option<DateTime<Utc>>,
    /// End of the last non-empty bucket.
    pub last_step_at: Option<DateTime<Utc>>,
    /// Steps per hour, index = hour of day.
    pub hourly: Vec<u32>,
}

/// Owns `proj_steps`: rolls step buckets up into per-day rows.
#[derive(Clone)]
pub struct StepsProjector {
    store: Store,
}

impl StepsProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any steps were recorded.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<StepsDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT total_steps, active_hours, most_active_hour,
                        most_active_hour_steps, first_step_at_us, last_step_at_us, hourly
                 FROM proj_steps WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
                |row| row_to_daily(date, row),
            )
            .optional()
        })
    }

    /// Projection rows for every day in `[from, to]` that has data,
    /// ascending by date.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn range_summary(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> crate::error::Result<Vec<StepsDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_steps, active_hours, most_active_hour,
                        most_active_hour_steps, first_step_at_us, last_step_at_us, hourly
                 FROM proj_steps
                 WHERE device_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )?;
            let rows = stmt.query_map(
                params![device_id, from.to_string(), to.to_string()],
                |row| {
                    let date = parse_date(row, 0)?;
                    row_to_daily_at(date, row, 1)
                },
            )?;
            rows.collect()
        })
    }

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<StepsDaily> {
        let mut hourly = vec![0u32; 24];
        let mut first: Option<DateTime<Utc>> = None;
        let mut last: Option<DateTime<Utc>> = None;

        for event in events {
            let EventPayload::Steps(data) = &event.payload else {
                continue;
            };
            // Buckets are attributed to the day and hour they start in.
            if data.bucket_start.date_naive() != date || data.count == 0 {
                continue;
            }
            let hour = data.bucket_start.hour() as usize;
            hourly[hour] = hourly[hour].saturating_add(data.count);
            first = Some(first.map_or(data.bucket_start, |f| f.min(data.bucket_start)));
            last = Some(last.map_or(data.bucket_end, |l| l.max(data.bucket_end)));
        }

        let total_steps: u32 = hourly.iter().sum();
        if total_steps == 0 {
            return None;
        }

        let (most_active_hour, most_active_hour_steps) = hourly
            .iter()
            .enumerate()
            .max_by_key(|(_, steps)| **steps)
            .map(|(hour, steps)| (hour as u32, *steps))
            .unzip();

        Some(StepsDaily {
            date,
            total_steps,
            active_hours: hourly.iter().filter(|s| **s > 0).count() as u32,
            most_active_hour,
            most_active_hour_steps,
            first_step_at: first,
            last_step_at: last,
            hourly,
        })
    }
}

impl DomainProjector for StepsProjector {
    fn name(&self) -> &'static str {
        "steps"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Steps]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);
        let hourly_json = daily
            .as_ref()
            .map(|d| serde_json::to_string(&d.hourly))
            .transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_steps WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(hourly)) = (&daily, &hourly_json) {
                tx.execute(
                    "INSERT INTO proj_steps (
                        device_id, date, total_steps, active_hours, most_active_hour,
                        most_active_hour_steps, first_step_at_us, last_step_at_us, hourly
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        device_id,
                        date.to_string(),
                        d.total_steps,
                        d.active_hours,
                        d.most_active_hour,
                        d.most_active_hour_steps,
                        d.first_step_at.map(datetime_to_us),
                        d.last_step_at.map(datetime_to_us),
                        hourly,
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
                "DELETE FROM proj_steps WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}

fn row_to_daily(date: NaiveDate, row: &rusqlite::Row<'_>) -> rusqlite::Result<StepsDaily> {
    row_to_daily_at(date, row, 0)
}

fn row_to_daily_at(
    date: NaiveDate,
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<StepsDaily> {
    let hourly_json: String = row.get(base + 6)?;
    let hourly = parse_json(&hourly_json, base + 6)?;
    Ok(StepsDaily {
        date,
        total_steps: row.get(base)?,
        active_hours: row.get(base + 1)?,
        most_active_hour: row.get(base + 2)?,
        most_active_hour_steps: row.get(base + 3)?,
        first_step_at: row.get::<_, Option<i64>>(base + 4)?.map(us_to_datetime),
        last_step_at: row.get::<_, Option<i64>>(base + 5)?.map(us_to_datetime),
        hourly,
    })
}

pub(super) fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(super) fn parse_json<T: serde::de::DeserializeOwned>(
    json: &str,
    idx: usize,
) -> rusqlite::Result<T> {
    serde_json::from_str(json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
