//! Daily active-minutes projection.

use chrono::{NaiveDate, Timelike};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One day of activity data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Total active minutes across the day.
    pub total_active_minutes: u32,
    /// Number of hours with any activity.
    pub active_hours: u32,
    /// Hour (0-23) with the most active minutes.
    pub most_active_hour: Option<u32>,
    /// Active minutes during the most active hour.
    pub most_active_hour_minutes: Option<u32>,
    /// Active minutes per hour, index = hour of day.
    pub hourly: Vec<u32>,
}

/// Owns `proj_activity`: rolls active-minute buckets up into per-day rows.
#[derive(Clone)]
pub struct ActivityProjector {
    store: Store,
}

impl ActivityProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any activity was recorded.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<ActivityDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT total_active_minutes, active_hours, most_active_hour,
                        most_active_hour_minutes, hourly
                 FROM proj_activity WHERE device_id = ?1 AND date = ?2",
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
    ) -> crate::error::Result<Vec<ActivityDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_active_minutes, active_hours, most_active_hour,
                        most_active_hour_minutes, hourly
                 FROM proj_activity
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

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<ActivityDaily> {
        let mut hourly = vec![0u32; 24];
        for event in events {
            let EventPayload::Activity(data) = &event.payload else {
                continue;
            };
            if data.bucket_start.date_naive() != date || data.active_minutes == 0 {
                continue;
            }
            let hour = data.bucket_start.hour() as usize;
            hourly[hour] = hourly[hour].saturating_add(data.active_minutes);
        }

        let total: u32 = hourly.iter().sum();
        if total == 0 {
            return None;
        }

        let (most_active_hour, most_active_hour_minutes) = hourly
            .iter()
            .enumerate()
            .max_by_key(|(_, minutes)| **minutes)
            .map(|(hour, minutes)| (hour as u32, *minutes))
            .unzip();

        Some(ActivityDaily {
            date,
            total_active_minutes: total,
            active_hours: hourly.iter().filter(|m| **m > 0).count() as u32,
            most_active_hour,
            most_active_hour_minutes,
            hourly,
        })
    }
}

impl DomainProjector for ActivityProjector {
    fn name(&self) -> &'static str {
        "activity"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Activity]
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
                "DELETE FROM proj_activity WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(hourly)) = (&daily, &hourly_json) {
                tx.execute(
                    "INSERT INTO proj_activity (
                        device_id, date, total_active_minutes, active_hours,
                        most_active_hour, most_active_hour_minutes, hourly
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        device_id,
                        date.to_string(),
                        d.total_active_minutes,
                        d.active_hours,
                        d.most_active_hour,
                        d.most_active_hour_minutes,
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
                "DELETE FROM proj_activity WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<ActivityDaily> {
    let hourly_json: String = row.get(base + 4)?;
    let hourly = parse_json(&hourly_json, base + 4)?;
    Ok(ActivityDaily {
        date,
        total_active_minutes: row.get(base)?,
        active_hours: row.get(base + 1)?,
        most_active_hour: row.get(base + 2)?,
        most_active_hour_minutes: row.get(base + 3)?,
        hourly,
    })
}
