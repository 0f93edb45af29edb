//! The append-only event log.
//!
//! Canonical, durable store of [`StoredEvent`]s deduplicated on
//! (device, idempotency key).
//! Appending an already-present key is a benign no-op (detected via the
//! UNIQUE constraint + `changes()`), which makes at-least-once delivery
//! from devices safe. Deletion and correction never remove rows: they set
//! tombstone columns, so rebuilds can never resurrect dead data while the
//! full history stays auditable.

use chrono::NaiveDate;
use rusqlite::{params, Row};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::db::{datetime_to_us, us_to_datetime, Store};
use crate::error::Result;
use crate::event::{EventPayload, EventType, StoredEvent};

/// Per-event outcome of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    /// The event was newly stored.
    Stored,
    /// An event with the same idempotency key already exists.
    Duplicate,
}

/// Outcome of appending a batch, aligned with the input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// One status per input event, in input order.
    pub statuses: Vec<AppendStatus>,
}

impl AppendResult {
    /// Number of newly stored events.
    #[must_use]
    pub fn stored_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == AppendStatus::Stored)
            .count()
    }

    /// Number of duplicate submissions skipped.
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.statuses.len() - self.stored_count()
    }
}

/// What a compensation learned about its target from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationTargetInfo {
    /// The tombstoned event's id.
    pub target_event_id: String,
    /// The tombstoned event's type.
    pub target_event_type: EventType,
    /// Calendar dates the target anchored.
    pub dates: BTreeSet<NaiveDate>,
}

/// Handle over the `events` table.
#[derive(Clone)]
pub struct EventLog {
    store: Store,
}

const SELECT_COLUMNS: &str = "event_id, device_id, event_type, idempotency_key, \
     occurred_at_us, occurred_end_us, payload, stored_at_us";

impl EventLog {
    /// Create a log handle over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a batch, skipping events whose idempotency key is already
    /// present. All inserts commit in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on any storage failure; no partial
    /// batch is ever visible.
    pub fn append(&self, events: &[StoredEvent]) -> Result<AppendResult> {
        let mut encoded = Vec::with_capacity(events.len());
        for event in events {
            let payload = serde_json::to_string(&event.payload)
                .unwrap_or_else(|_| "{}".to_string());
            encoded.push(payload);
        }

        let statuses = self.store.with_tx(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO events (
                    event_id, device_id, event_type, idempotency_key,
                    occurred_at_us, occurred_end_us, date_start, date_end,
                    payload, stored_at_us
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            let mut statuses = Vec::with_capacity(events.len());
            for (event, payload) in events.iter().zip(&encoded) {
                let dates = event.anchor_dates();
                let date_start = dates.iter().next().map(ToString::to_string);
                let date_end = dates.iter().next_back().map(ToString::to_string);

                let changed = stmt.execute(params![
                    event.event_id,
                    event.device_id,
                    event.event_type.as_str(),
                    event.idempotency_key,
                    datetime_to_us(event.occurred_at),
                    event.occurred_end.map(datetime_to_us),
                    date_start,
                    date_end,
                    payload,
                    datetime_to_us(event.stored_at),
                ])?;

                statuses.push(if changed == 1 {
                    AppendStatus::Stored
                } else {
                    AppendStatus::Duplicate
                });
            }
            Ok(statuses)
        })?;

        Ok(AppendResult { statuses })
    }

    /// Whether this device already has an event with this idempotency key
    /// (tombstoned or not).
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn exists(&self, device_id: &str, idempotency_key: &str) -> Result<bool> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM events WHERE device_id = ?1 AND idempotency_key = ?2
                 )",
                params![device_id, idempotency_key],
                |row| row.get(0),
            )
        })
    }

    /// Point lookup by event id, including tombstoned events.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn get(&self, event_id: &str) -> Result<Option<StoredEvent>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE event_id = ?1"
            ))?;
            let mut rows = stmt.query_map([event_id], row_to_event)?;
            rows.next().transpose()
        })
    }

    /// All live (non-tombstoned) events for a device whose occurrence
    /// anchors intersect `[from, to]`, optionally restricted to a set of
    /// event types, ordered by occurrence time ascending with event id as
    /// the deterministic tiebreak.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn find_by_device_and_date_range(
        &self,
        device_id: &str,
        types: Option<&[EventType]>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        let events: Vec<StoredEvent> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE device_id = ?1
                   AND deleted_by IS NULL
                   AND superseded_by IS NULL
                   AND date_start <= ?2
                   AND date_end >= ?3
                 ORDER BY occurred_at_us ASC, event_id ASC"
            ))?;
            let rows = stmt.query_map(
                params![device_id, to.to_string(), from.to_string()],
                row_to_event,
            )?;
            rows.collect()
        })?;

        Ok(match types {
            Some(types) => events
                .into_iter()
                .filter(|e| types.contains(&e.event_type))
                .collect(),
            None => events,
        })
    }

    /// Tombstone `target_event_id` as deleted by a compensation event.
    /// Logical only: the row remains for audit but disappears from all
    /// subsequent range reads.
    ///
    /// Returns `None` when the target does not exist or is owned by a
    /// different device. Re-deleting an already-deleted target is a no-op
    /// that still reports the target info, keeping retried compensation
    /// batches idempotent.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn mark_deleted(
        &self,
        device_id: &str,
        target_event_id: &str,
        compensation_event_id: &str,
    ) -> Result<Option<CompensationTargetInfo>> {
        self.tombstone(device_id, target_event_id, compensation_event_id, "deleted_by")
    }

    /// Tombstone `target_event_id` as superseded by a correction. Same
    /// visibility semantics as deletion; the corrected replacement arrives
    /// as an ordinary new event.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn mark_superseded(
        &self,
        device_id: &str,
        target_event_id: &str,
        compensation_event_id: &str,
    ) -> Result<Option<CompensationTargetInfo>> {
        self.tombstone(
            device_id,
            target_event_id,
            compensation_event_id,
            "superseded_by",
        )
    }

    fn tombstone(
        &self,
        device_id: &str,
        target_event_id: &str,
        compensation_event_id: &str,
        column: &'static str,
    ) -> Result<Option<CompensationTargetInfo>> {
        self.store.with_tx(|tx| {
            let target = tx
                .query_row(
                    "SELECT event_type, date_start, date_end FROM events
                     WHERE event_id = ?1 AND device_id = ?2",
                    params![target_event_id, device_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let Some((type_str, date_start, date_end)) = target else {
                return Ok(None);
            };

            tx.execute(
                &format!(
                    "UPDATE events SET {column} = ?1
                     WHERE event_id = ?2 AND {column} IS NULL"
                ),
                params![compensation_event_id, target_event_id],
            )?;

            let target_event_type = EventType::from_str(&type_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

            let mut dates = BTreeSet::new();
            for raw in [date_start, date_end] {
                if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                    dates.insert(date);
                }
            }

            Ok(Some(CompensationTargetInfo {
                target_event_id: target_event_id.to_string(),
                target_event_type,
                dates,
            }))
        })
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let event_type_str: String = row.get(2)?;
    let event_type = EventType::from_str(&event_type_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let payload_str: String = row.get(6)?;
    let payload_json: serde_json::Value = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let payload = EventPayload::deserialize_for(event_type, &payload_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredEvent {
        event_id: row.get(0)?,
        device_id: row.get(1)?,
        event_type,
        idempotency_key: row.get(3)?,
        occurred_at: us_to_datetime(row.get(4)?),
        occurred_end: row.get::<_, Option<i64>>(5)?.map(us_to_datetime),
        payload,
        stored_at: us_to_datetime(row.get(7)?),
    })
}
