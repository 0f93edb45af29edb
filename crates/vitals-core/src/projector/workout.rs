//! Daily workout projection.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One workout, as stored in the row's JSON detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutEntry {
    /// Client-assigned workout identifier.
    pub workout_id: String,
    /// Free-form workout type ("RUN", "STRENGTH", ...).
    pub workout_type: String,
    /// Session start instant.
    pub start: DateTime<Utc>,
    /// Session end instant.
    pub end: DateTime<Utc>,
    /// Duration in minutes.
    pub duration_minutes: u32,
    /// Total calories burned, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_calories: Option<u32>,
    /// Average heart rate over the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<u32>,
}

/// One day of workout data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutDaily {
    /// The calendar date (UTC) the workouts started on.
    pub date: NaiveDate,
    /// Number of workouts.
    pub workout_count: u32,
    /// Total duration across workouts, minutes.
    pub total_duration_minutes: u32,
    /// Total calories, when any workout reported them.
    pub total_calories: Option<u32>,
    /// The day's workouts, ordered by start.
    pub workouts: Vec<WorkoutEntry>,
}

/// Owns `proj_workout`.
#[derive(Clone)]
pub struct WorkoutProjector {
    store: Store,
}

impl WorkoutProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any workout started on it.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<WorkoutDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT workout_count, total_duration_minutes, total_calories, workouts
                 FROM proj_workout WHERE device_id = ?1 AND date = ?2",
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
    ) -> crate::error::Result<Vec<WorkoutDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, workout_count, total_duration_minutes, total_calories, workouts
                 FROM proj_workout
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

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<WorkoutDaily> {
        let mut workouts: Vec<WorkoutEntry> = events
            .iter()
            .filter_map(|event| {
                let EventPayload::Workout(data) = &event.payload else {
                    return None;
                };
                (data.start.date_naive() == date).then(|| WorkoutEntry {
                    workout_id: data.workout_id.clone(),
                    workout_type: data.workout_type.clone(),
                    start: data.start,
                    end: data.end,
                    duration_minutes: data.duration_minutes,
                    total_calories: data.total_calories,
                    avg_heart_rate: data.avg_heart_rate,
                })
            })
            .collect();
        if workouts.is_empty() {
            return None;
        }
        workouts.sort_by_key(|w| w.start);

        let total_calories = workouts
            .iter()
            .filter_map(|w| w.total_calories)
            .reduce(|a, b| a.saturating_add(b));

        Some(WorkoutDaily {
            date,
            workout_count: workouts.len() as u32,
            total_duration_minutes: workouts.iter().map(|w| w.duration_minutes).sum(),
            total_calories,
            workouts,
        })
    }
}

impl DomainProjector for WorkoutProjector {
    fn name(&self) -> &'static str {
        "workout"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Workout]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);
        let workouts_json = daily
            .as_ref()
            .map(|d| serde_json::to_string(&d.workouts))
            .transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_workout WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(workouts)) = (&daily, &workouts_json) {
                tx.execute(
                    "INSERT INTO proj_workout (
                        device_id, date, workout_count, total_duration_minutes,
                        total_calories, workouts
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        device_id,
                        date.to_string(),
                        d.workout_count,
                        d.total_duration_minutes,
                        d.total_calories,
                        workouts,
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
                "DELETE FROM proj_workout WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<WorkoutDaily> {
    let workouts_json: String = row.get(base + 3)?;
    let workouts = parse_json(&workouts_json, base + 3)?;
    Ok(WorkoutDaily {
        date,
        workout_count: row.get(base)?,
        total_duration_minutes: row.get(base + 1)?,
        total_calories: row.get(base + 2)?,
        workouts,
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

    fn workout_event(key: &str, id: &str, start: &str, end: &str, minutes: u32) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::Workout,
            payload: json!({
                "workoutId": id,
                "workoutType": "RUN",
                "start": start,
                "end": end,
                "durationMinutes": minutes,
                "totalCalories": 300,
                "avgHeartRate": 140
            }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    #[test]
    fn workouts_sorted_and_totaled() {
        let projector = WorkoutProjector::new(Store::open_in_memory().expect("open store"));
        let events = [
            workout_event("k-1", "w-2", "2025-01-05T18:00:00Z", "2025-01-05T18:45:00Z", 45),
            workout_event("k-2", "w-1", "2025-01-05T07:00:00Z", "2025-01-05T07:30:00Z", 30),
        ];
        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project");

        let daily = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(daily.workout_count, 2);
        assert_eq!(daily.total_duration_minutes, 75);
        assert_eq!(daily.total_calories, Some(600));
        assert_eq!(daily.workouts[0].workout_id, "w-1", "ordered by start");

        projector
            .project_events("dev-1", jan(5), &[])
            .expect("empty rebuild");
        assert!(projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .is_none());
    }
}
