//! Retroactive deletion/correction of previously stored events.
//!
//! Compensations never mutate the log: the target event gets a tombstone
//! (so rebuilds can never resurrect it) and an append-only
//! [`CompensationRecord`] captures what was invalidated. The record's
//! affected dates widen the reprojection closure — a correction for last
//! Tuesday forces last Tuesday's projections to rebuild even when the
//! batch carries no new event for that day.

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::{datetime_to_us, log::EventLog, Store};
use crate::error::{Error, Result};
use crate::event::EventType;

/// Whether a compensation removes or replaces its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompensationKind {
    /// The target event is logically removed.
    Deletion,
    /// The target event is superseded by corrected data.
    Correction,
}

impl CompensationKind {
    /// Canonical string form stored in the compensation table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deletion => "deletion",
            Self::Correction => "correction",
        }
    }
}

/// Immutable record of one applied compensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationRecord {
    /// Id of the compensation event itself.
    pub compensation_event_id: String,
    /// Deletion or correction.
    pub kind: CompensationKind,
    /// The event that was tombstoned.
    pub target_event_id: String,
    /// The tombstoned event's type (resolved from the log, never trusted
    /// from the client).
    pub target_event_type: EventType,
    /// Every date this compensation invalidates.
    pub affected_dates: BTreeSet<NaiveDate>,
}

/// One deletion or correction as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationEventData {
    /// Client-assigned id for the compensation itself.
    pub compensation_event_id: String,
    /// The previously stored event being deleted/corrected.
    pub target_event_id: String,
    /// Extra dates the client knows are invalidated (corrections that move
    /// an event across days). Only ever widens the closure.
    #[serde(default)]
    pub affected_dates: Vec<NaiveDate>,
}

/// Compensations accompanying an ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationBatch {
    /// Retroactive deletions.
    #[serde(default)]
    pub deletions: Vec<CompensationEventData>,
    /// Retroactive corrections.
    #[serde(default)]
    pub corrections: Vec<CompensationEventData>,
}

impl CompensationBatch {
    /// Whether the batch carries no compensations at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.corrections.is_empty()
    }

    /// Target event ids across deletions and corrections.
    pub fn target_ids(&self) -> impl Iterator<Item = &str> {
        self.deletions
            .iter()
            .chain(&self.corrections)
            .map(|c| c.target_event_id.as_str())
    }
}

/// Records deletions/corrections and resolves the dates they invalidate.
#[derive(Clone)]
pub struct CompensationTracker {
    store: Store,
    log: EventLog,
}

impl CompensationTracker {
    /// Create a tracker over the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        let log = EventLog::new(store.clone());
        Self { store, log }
    }

    /// Record a deletion: tombstone the target and persist the record.
    ///
    /// # Errors
    ///
    /// `UnknownTargetEvent` when the target does not exist in the log for
    /// this device; `StorageUnavailable` on storage failure.
    pub fn record_deletion(
        &self,
        device_id: &str,
        data: &CompensationEventData,
    ) -> Result<CompensationRecord> {
        let info = self
            .log
            .mark_deleted(device_id, &data.target_event_id, &data.compensation_event_id)?
            .ok_or_else(|| Error::UnknownTargetEvent {
                target_event_id: data.target_event_id.clone(),
            })?;

        let mut affected_dates = info.dates;
        affected_dates.extend(&data.affected_dates);

        let record = CompensationRecord {
            compensation_event_id: data.compensation_event_id.clone(),
            kind: CompensationKind::Deletion,
            target_event_id: info.target_event_id,
            target_event_type: info.target_event_type,
            affected_dates,
        };
        self.persist(device_id, &record)?;

        tracing::info!(
            device = device_id,
            target = %record.target_event_id,
            target_type = %record.target_event_type,
            dates = record.affected_dates.len(),
            "recorded deletion"
        );
        Ok(record)
    }

    /// Record a correction: tombstone the target as superseded and persist
    /// the record. The corrected replacement arrives as an ordinary new
    /// event in the same batch.
    ///
    /// # Errors
    ///
    /// `UnknownTargetEvent` when the target does not exist in the log for
    /// this device; `StorageUnavailable` on storage failure.
    pub fn record_correction(
        &self,
        device_id: &str,
        data: &CompensationEventData,
    ) -> Result<CompensationRecord> {
        let info = self
            .log
            .mark_superseded(device_id, &data.target_event_id, &data.compensation_event_id)?
            .ok_or_else(|| Error::UnknownTargetEvent {
                target_event_id: data.target_event_id.clone(),
            })?;

        let mut affected_dates = info.dates;
        affected_dates.extend(&data.affected_dates);

        let record = CompensationRecord {
            compensation_event_id: data.compensation_event_id.clone(),
            kind: CompensationKind::Correction,
            target_event_id: info.target_event_id,
            target_event_type: info.target_event_type,
            affected_dates,
        };
        self.persist(device_id, &record)?;

        tracing::info!(
            device = device_id,
            target = %record.target_event_id,
            target_type = %record.target_event_type,
            dates = record.affected_dates.len(),
            "recorded correction"
        );
        Ok(record)
    }

    /// Union of every record's affected dates — the widening applied to a
    /// batch's [`AffectedSet`](crate::ingest::AffectedSet).
    #[must_use]
    pub fn affected_dates_for(records: &[CompensationRecord]) -> BTreeSet<NaiveDate> {
        records
            .iter()
            .flat_map(|r| r.affected_dates.iter().copied())
            .collect()
    }

    fn persist(&self, device_id: &str, record: &CompensationRecord) -> Result<()> {
        let dates_json = serde_json::to_string(&record.affected_dates)
            .unwrap_or_else(|_| "[]".to_string());
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO compensations (
                    compensation_event_id, device_id, kind, target_event_id,
                    target_event_type, affected_dates, recorded_at_us
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.compensation_event_id,
                    device_id,
                    record.kind.as_str(),
                    record.target_event_id,
                    record.target_event_type.as_str(),
                    dates_json,
                    datetime_to_us(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }
}
