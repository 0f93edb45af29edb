//! Daily body-measurement projection. Later measurements override earlier
//! ones per site, so the row holds the day's final value for each site.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{datetime_to_us, us_to_datetime, Store};
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One day of body-measurement data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Number of measurement events that day.
    pub measurement_count: u32,
    /// Site name to centimeters, the day's final value per site.
    pub sites: BTreeMap<String, f64>,
    /// When the latest measurement was taken.
    pub measured_at: DateTime<Utc>,
}

/// Owns `proj_body`.
#[derive(Clone)]
pub struct BodyProjector {
    store: Store,
}

impl BodyProjector {
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
    ) -> crate::error::Result<Option<BodyDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT measurement_count, sites, measured_at_us
                 FROM proj_body WHERE device_id = ?1 AND date = ?2",
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
    ) -> crate::error::Result<Vec<BodyDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, measurement_count, sites, measured_at_us
                 FROM proj_body
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

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<BodyDaily> {
        let mut measurements: Vec<(DateTime<Utc>, &BTreeMap<String, f64>)> = events
            .iter()
            .filter_map(|event| {
                let EventPayload::BodyMeasurement(data) = &event.payload else {
                    return None;
                };
                (data.measured_at.date_naive() == date).then_some((data.measured_at, &data.sites))
            })
            .collect();
        if measurements.is_empty() {
            return None;
        }
        measurements.sort_by_key(|(at, _)| *at);

        let mut sites = BTreeMap::new();
        for (_, measured) in &measurements {
            for (site, cm) in *measured {
                sites.insert(site.clone(), *cm);
            }
        }
        let measured_at = measurements
            .last()
            .map(|(at, _)| *at)
            .unwrap_or_else(Utc::now);

        Some(BodyDaily {
            date,
            measurement_count: measurements.len() as u32,
            sites,
            measured_at,
        })
    }
}

impl DomainProjector for BodyProjector {
    fn name(&self) -> &'static str {
        "body"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::BodyMeasurement]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);
        let sites_json = daily
            .as_ref()
            .map(|d| serde_json::to_string(&d.sites))
            .transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_body WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(sites)) = (&daily, &sites_json) {
                tx.execute(
                    "INSERT INTO proj_body (
                        device_id, date, measurement_count, sites, measured_at_us
                     ) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        device_id,
                        date.to_string(),
                        d.measurement_count,
                        sites,
                        datetime_to_us(d.measured_at),
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
                "DELETE FROM proj_body WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<BodyDaily> {
    let sites_json: String = row.get(base + 1)?;
    let sites = parse_json(&sites_json, base + 1)?;
    Ok(BodyDaily {
        date,
        measurement_count: row.get(base)?,
        sites,
        measured_at: us_to_datetime(row.get(base + 2)?),
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

    fn body_event(key: &str, id: &str, at: &str, sites: serde_json::Value) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::BodyMeasurement,
            payload: json!({ "measurementId": id, "measuredAt": at, "sites": sites }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    #[test]
    fn later_measurements_override_per_site() {
        let projector = BodyProjector::new(Store::open_in_memory().expect("open store"));
        let events = [
            body_event(
                "k-1",
                "m-1",
                "2025-01-05T07:00:00Z",
                json!({ "waist": 84.0, "chest": 101.0 }),
            ),
            body_event(
                "k-2",
                "m-2",
                "2025-01-05T19:00:00Z",
                json!({ "waist": 83.2 }),
            ),
        ];
        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project");

        let daily = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(daily.measurement_count, 2);
        assert_eq!(daily.sites.get("waist"), Some(&83.2), "evening value wins");
        assert_eq!(daily.sites.get("chest"), Some(&101.0), "untouched site kept");
    }
}
