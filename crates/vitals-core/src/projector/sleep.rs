//! Daily sleep projection.
//!
//! A session is attributed to the calendar date it ends on (the waking
//! day), so a session straddling midnight counts once. Both anchor dates
//! still rebuild when such a session changes — the other date's rebuild
//! simply finds nothing attributed to it.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{datetime_to_us, us_to_datetime, Store};
use crate::event::{EventPayload, EventType, SleepStages, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One attributed sleep session, as stored in the row's JSON detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSession {
    /// Session start instant.
    pub sleep_start: DateTime<Utc>,
    /// Session end instant.
    pub sleep_end: DateTime<Utc>,
    /// Minutes asleep.
    pub total_minutes: u32,
    /// Optional per-stage breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<SleepStages>,
}

/// One day of sleep data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepDaily {
    /// The waking date (UTC).
    pub date: NaiveDate,
    /// Minutes asleep across all attributed sessions.
    pub total_minutes: u32,
    /// Number of attributed sessions.
    pub session_count: u32,
    /// Earliest session start.
    pub sleep_start: Option<DateTime<Utc>>,
    /// Latest session end.
    pub sleep_end: Option<DateTime<Utc>>,
    /// Duration-based score, 0-100 against an 8h target.
    pub score: Option<u32>,
    /// The attributed sessions.
    pub sessions: Vec<SleepSession>,
}

/// Owns `proj_sleep`.
#[derive(Clone)]
pub struct SleepProjector {
    store: Store,
}

impl SleepProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any session ended on it.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<SleepDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT total_minutes, session_count, sleep_start_us, sleep_end_us,
                        score, sessions
                 FROM proj_sleep WHERE device_id = ?1 AND date = ?2",
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
    ) -> crate::error::Result<Vec<SleepDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_minutes, session_count, sleep_start_us, sleep_end_us,
                        score, sessions
                 FROM proj_sleep
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

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<SleepDaily> {
        let mut sessions: Vec<SleepSession> = events
            .iter()
            .filter_map(|event| {
                let EventPayload::Sleep(data) = &event.payload else {
                    return None;
                };
                (data.sleep_end.date_naive() == date).then(|| SleepSession {
                    sleep_start: data.sleep_start,
                    sleep_end: data.sleep_end,
                    total_minutes: data.total_minutes,
                    stages: data.stages,
                })
            })
            .collect();
        if sessions.is_empty() {
            return None;
        }
        sessions.sort_by_key(|s| s.sleep_start);

        let total_minutes: u32 = sessions.iter().map(|s| s.total_minutes).sum();
        Some(SleepDaily {
            date,
            total_minutes,
            session_count: sessions.len() as u32,
            sleep_start: sessions.iter().map(|s| s.sleep_start).min(),
            sleep_end: sessions.iter().map(|s| s.sleep_end).max(),
            score: Some(duration_score(total_minutes)),
            sessions,
        })
    }
}

/// 0-100 against an 8h (480 minute) target.
pub(crate) fn duration_score(total_minutes: u32) -> u32 {
    (total_minutes.saturating_mul(100) / 480).min(100)
}

impl DomainProjector for SleepProjector {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Sleep]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);
        let sessions_json = daily
            .as_ref()
            .map(|d| serde_json::to_string(&d.sessions))
            .transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_sleep WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(sessions)) = (&daily, &sessions_json) {
                tx.execute(
                    "INSERT INTO proj_sleep (
                        device_id, date, total_minutes, session_count,
                        sleep_start_us, sleep_end_us, score, sessions
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        device_id,
                        date.to_string(),
                        d.total_minutes,
                        d.session_count,
                        d.sleep_start.map(datetime_to_us),
                        d.sleep_end.map(datetime_to_us),
                        d.score,
                        sessions,
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
                "DELETE FROM proj_sleep WHERE device_id = ?1 AND date = ?2",
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
) -> rusqlite::Result<SleepDaily> {
    let sessions_json: String = row.get(base + 5)?;
    let sessions = parse_json(&sessions_json, base + 5)?;
    Ok(SleepDaily {
        date,
        total_minutes: row.get(base)?,
        session_count: row.get(base + 1)?,
        sleep_start: row.get::<_, Option<i64>>(base + 2)?.map(us_to_datetime),
        sleep_end: row.get::<_, Option<i64>>(base + 3)?.map(us_to_datetime),
        score: row.get(base + 4)?,
        sessions,
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

    fn sleep_event(key: &str, start: &str, end: &str, minutes: u32) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::Sleep,
            payload: json!({
                "sleepStart": start,
                "sleepEnd": end,
                "totalMinutes": minutes,
                "stages": { "deepMinutes": 90, "lightMinutes": 200, "remMinutes": 100, "awakeMinutes": 40 }
            }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    #[test]
    fn midnight_straddling_session_attributes_to_waking_day() {
        let projector = SleepProjector::new(Store::open_in_memory().expect("open store"));
        let events = [sleep_event(
            "k-1",
            "2025-01-04T22:30:00Z",
            "2025-01-05T06:10:00Z",
            420,
        )];

        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project waking day");
        projector
            .project_events("dev-1", jan(4), &events)
            .expect("project falling-asleep day");

        let waking = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(waking.total_minutes, 420);
        assert_eq!(waking.session_count, 1);
        assert_eq!(waking.score, Some(87));
        assert_eq!(waking.sessions[0].stages.map(|s| s.deep_minutes), Some(90));

        assert!(
            projector
                .daily_breakdown("dev-1", jan(4))
                .expect("read")
                .is_none(),
            "counted once, on the waking day"
        );
    }

    #[test]
    fn score_caps_at_one_hundred() {
        assert_eq!(duration_score(0), 0);
        assert_eq!(duration_score(240), 50);
        assert_eq!(duration_score(480), 100);
        assert_eq!(duration_score(600), 100);
    }
}
