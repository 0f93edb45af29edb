//! Daily weight projection. The latest measurement of the day wins; the
//! row remembers how many readings it collapsed.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{datetime_to_us, us_to_datetime, Store};
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::parse_date;
use super::DomainProjector;

/// One day of weight data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Weight of the day's latest measurement, kilograms.
    pub weight_kg: f64,
    /// Body-fat percentage of the latest measurement, if reported.
    pub body_fat_percent: Option<f64>,
    /// When the latest measurement was taken.
    pub measured_at: DateTime<Utc>,
    /// Number of measurements taken that day.
    pub sample_count: u32,
}

/// First/last weight across a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTrend {
    /// Earliest daily value in the range.
    pub first: WeightDaily,
    /// Latest daily value in the range.
    pub last: WeightDaily,
    /// `last - first`, kilograms.
    pub delta_kg: f64,
}

/// Owns `proj_weight`.
#[derive(Clone)]
pub struct WeightProjector {
    store: Store,
}

impl WeightProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any measurement was taken.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<WeightDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT weight_kg, body_fat_percent, measured_at_us, sample_count
                 FROM proj_weight WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
                |row| row_to_daily(date, row, 0),
            )
            .optional()
        })
    }

    /// Weight trend across `[from, to]`: the first and last daily values
    /// and the delta between them. `None` when the range holds no data.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn range_summary(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> crate::error::Result<Option<WeightTrend>> {
        let days: Vec<WeightDaily> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, weight_kg, body_fat_percent, measured_at_us, sample_count
                 FROM proj_weight
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
        })?;

        Ok(match (days.first(), days.last()) {
            (Some(first), Some(last)) => Some(WeightTrend {
                first: first.clone(),
                last: last.clone(),
                delta_kg: last.weight_kg - first.weight_kg,
            }),
            _ => None,
        })
    }

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<WeightDaily> {
        let mut latest: Option<WeightDaily> = None;
        let mut sample_count = 0u32;

        for event in events {
            let EventPayload::Weight(data) = &event.payload else {
                continue;
            };
            if data.measured_at.date_naive() != date {
                continue;
            }
            sample_count += 1;
            if latest.as_ref().is_none_or(|l| data.measured_at > l.measured_at) {
                latest = Some(WeightDaily {
                    date,
                    weight_kg: data.weight_kg,
                    body_fat_percent: data.body_fat_percent,
                    measured_at: data.measured_at,
                    sample_count: 0,
                });
            }
        }

        latest.map(|mut daily| {
            daily.sample_count = sample_count;
            daily
        })
    }
}

impl DomainProjector for WeightProjector {
    fn name(&self) -> &'static str {
        "weight"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Weight]
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
                "DELETE FROM proj_weight WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let Some(d) = &daily {
                tx.execute(
                    "INSERT INTO proj_weight (
                        device_id, date, weight_kg, body_fat_percent,
                        measured_at_us, sample_count
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        device_id,
                        date.to_string(),
                        d.weight_kg,
                        d.body_fat_percent,
                        datetime_to_us(d.measured_at),
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
                "DELETE FROM proj_weight WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<WeightDaily> {
    Ok(WeightDaily {
        date,
        weight_kg: row.get(base)?,
        body_fat_percent: row.get(base + 1)?,
        measured_at: us_to_datetime(row.get(base + 2)?),
        sample_count: row.get(base + 3)?,
    })
}
