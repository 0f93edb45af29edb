//! Daily active-calories projection.

use chrono::{NaiveDate, Timelike};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One day of active-calorie data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaloriesDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Total kilocalories burned across the day.
    pub total_kcal: f64,
    /// Kilocalories per hour, index = hour of day.
    pub hourly: Vec<f64>,
}

/// Owns `proj_calories`: rolls energy buckets up into per-day rows.
#[derive(Clone)]
pub struct CaloriesProjector {
    store: Store,
}

impl CaloriesProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any energy was recorded.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<CaloriesDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT total_kcal, hourly FROM proj_calories
                 WHERE device_id = ?1 AND date = ?2",
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
    ) -> crate::error::Result<Vec<CaloriesDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_kcal, hourly FROM proj_calories
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

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<CaloriesDaily> {
        let mut hourly = vec![0f64; 24];
        for event in events {
            let EventPayload::Calories(data) = &event.payload else {
                continue;
            };
            if data.bucket_start.date_naive() != date || data.energy_kcal <= 0.0 {
                continue;
            }
            hourly[data.bucket_start.hour() as usize] += data.energy_kcal;
        }

        let total_kcal: f64 = hourly.iter().sum();
        if total_kcal <= 0.0 {
            return None;
        }

        Some(CaloriesDaily {
            date,
            total_kcal,
            hourly,
        })
    }
}

impl DomainProjector for CaloriesProjector {
    fn name(&self) -> &'static str {
        "calories"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Calories]
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
                "DELETE FROM proj_calories WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(hourly)) = (&daily, &hourly_json) {
                tx.execute(
                    "INSERT INTO proj_calories (device_id, date, total_kcal, hourly)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![device_id, date.to_string(), d.total_kcal, hourly],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn delete_projections_for_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM proj_calories WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<CaloriesDaily> {
    let hourly_json: String = row.get(base + 1)?;
    let hourly = parse_json(&hourly_json, base + 1)?;
    Ok(CaloriesDaily {
        date,
        total_kcal: row.get(base)?,
        hourly,
    })
}
