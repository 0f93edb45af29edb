//! Event data model for the health event log.
//!
//! This module defines the canonical [`StoredEvent`], the [`EventType`]
//! discriminant, typed payload structs, and the ingestion-side
//! [`EventEnvelope`]. Events are immutable once appended and are uniquely
//! identified by their client-supplied idempotency key; the `event_id` is
//! content-addressed (blake3 over device id + idempotency key), so a
//! re-submission of the same logical event always derives the same id.

pub mod payload;
pub mod types;

pub use payload::{
    ActivityData, BodyMeasurementData, CaloriesData, EventPayload, HeartRateData, MealData,
    PayloadParseError, RestingHeartRateData, SleepData, SleepStages, StepsData, WeightData,
    WorkoutData,
};
pub use types::{EventType, UnknownEventType};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Derive the content-addressed event id for a (device, idempotency key)
/// pair: `ev-` plus the first 16 hex chars of the blake3 hash.
#[must_use]
pub fn derive_event_id(device_id: &str, idempotency_key: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(idempotency_key.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("ev-{}", &hex.as_str()[..16])
}

/// A single event in the health event log.
///
/// Immutable once appended. Tombstoning (deletion/correction) happens via
/// side columns in storage, never by mutating the event itself.
///
/// # Serde
///
/// Custom `Deserialize` uses `event_type` to drive typed deserialization of
/// the `payload` field, since the discriminant is external to the payload
/// JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    /// Content-addressed identifier (`ev-<16 hex>`), derived from the
    /// device id and idempotency key.
    pub event_id: String,

    /// The device that produced this event.
    pub device_id: String,

    /// The type of health data this event carries.
    pub event_type: EventType,

    /// Client-supplied key making re-submission a no-op.
    pub idempotency_key: String,

    /// Primary occurrence instant (bucket/session start, measurement time).
    pub occurred_at: DateTime<Utc>,

    /// End instant for span-like events (buckets, sessions).
    pub occurred_end: Option<DateTime<Utc>>,

    /// Typed payload specific to the event type.
    pub payload: EventPayload,

    /// When the event was durably appended.
    pub stored_at: DateTime<Utc>,
}

impl<'de> Deserialize<'de> for StoredEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        /// Two-pass deserialization: read `event_type` first, then use it
        /// to deserialize the payload.
        #[derive(Deserialize)]
        struct StoredEventRaw {
            event_id: String,
            device_id: String,
            event_type: EventType,
            idempotency_key: String,
            occurred_at: DateTime<Utc>,
            occurred_end: Option<DateTime<Utc>>,
            payload: serde_json::Value,
            stored_at: DateTime<Utc>,
        }

        let raw = StoredEventRaw::deserialize(deserializer)?;
        let payload = EventPayload::deserialize_for(raw.event_type, &raw.payload)
            .map_err(serde::de::Error::custom)?;

        Ok(Self {
            event_id: raw.event_id,
            device_id: raw.device_id,
            event_type: raw.event_type,
            idempotency_key: raw.idempotency_key,
            occurred_at: raw.occurred_at,
            occurred_end: raw.occurred_end,
            payload,
            stored_at: raw.stored_at,
        })
    }
}

impl StoredEvent {
    /// UTC calendar dates this event anchors — one for point events, one or
    /// two for spans (a sleep session may straddle midnight).
    #[must_use]
    pub fn anchor_dates(&self) -> BTreeSet<NaiveDate> {
        let mut dates = BTreeSet::new();
        dates.insert(self.occurred_at.date_naive());
        if let Some(end) = self.occurred_end {
            dates.insert(end.date_naive());
        }
        dates
    }
}

/// One event as submitted by a client device, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Client-supplied idempotency key.
    pub idempotency_key: String,
    /// Wire event type string.
    pub event_type: EventType,
    /// Raw payload JSON, schema determined by `event_type`.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Validate the envelope and build the canonical [`StoredEvent`].
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the idempotency key is blank,
    /// the payload does not match the event type's schema, or payload
    /// contents fail validation.
    pub fn to_stored_event(
        &self,
        device_id: &str,
        stored_at: DateTime<Utc>,
    ) -> Result<StoredEvent, String> {
        if self.idempotency_key.trim().is_empty() {
            return Err("missing required field: idempotencyKey".into());
        }

        let payload = EventPayload::deserialize_for(self.event_type, &self.payload)
            .map_err(|e| e.to_string())?;
        payload.validate()?;

        let (occurred_at, occurred_end) = payload.time_range();
        Ok(StoredEvent {
            event_id: derive_event_id(device_id, &self.idempotency_key),
            device_id: device_id.to_string(),
            event_type: self.event_type,
            idempotency_key: self.idempotency_key.clone(),
            occurred_at,
            occurred_end,
            payload,
            stored_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps_envelope(key: &str) -> EventEnvelope {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::Steps,
            payload: json!({
                "bucketStart": "2025-01-05T08:00:00Z",
                "bucketEnd": "2025-01-05T08:15:00Z",
                "count": 812
            }),
        }
    }

    #[test]
    fn derive_event_id_is_deterministic() {
        let a = derive_event_id("device-1", "key-1");
        let b = derive_event_id("device-1", "key-1");
        assert_eq!(a, b);
        assert!(a.starts_with("ev-"));
        assert_eq!(a.len(), 3 + 16);
    }

    #[test]
    fn derive_event_id_varies_by_device_and_key() {
        let base = derive_event_id("device-1", "key-1");
        assert_ne!(base, derive_event_id("device-2", "key-1"));
        assert_ne!(base, derive_event_id("device-1", "key-2"));
        // The separator prevents ("ab", "c") colliding with ("a", "bc").
        assert_ne!(derive_event_id("ab", "c"), derive_event_id("a", "bc"));
    }

    #[test]
    fn envelope_builds_stored_event() {
        let now = Utc::now();
        let event = steps_envelope("k-1")
            .to_stored_event("device-1", now)
            .expect("valid envelope");
        assert_eq!(event.device_id, "device-1");
        assert_eq!(event.event_type, EventType::Steps);
        assert_eq!(event.occurred_at, "2025-01-05T08:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(event.stored_at, now);
    }

    #[test]
    fn envelope_rejects_blank_idempotency_key() {
        let err = steps_envelope("  ")
            .to_stored_event("device-1", Utc::now())
            .unwrap_err();
        assert!(err.contains("idempotencyKey"));
    }

    #[test]
    fn envelope_rejects_schema_mismatch() {
        let mut envelope = steps_envelope("k-1");
        envelope.payload = json!({ "count": "eight hundred" });
        assert!(envelope.to_stored_event("device-1", Utc::now()).is_err());
    }

    #[test]
    fn anchor_dates_span_midnight() {
        let envelope = EventEnvelope {
            idempotency_key: "sleep-1".into(),
            event_type: EventType::Sleep,
            payload: json!({
                "sleepStart": "2025-01-04T22:30:00Z",
                "sleepEnd": "2025-01-05T06:10:00Z",
                "totalMinutes": 430
            }),
        };
        let event = envelope
            .to_stored_event("device-1", Utc::now())
            .expect("valid sleep envelope");
        let dates: Vec<_> = event.anchor_dates().into_iter().collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            ]
        );
    }

    #[test]
    fn stored_event_serde_roundtrip() {
        let event = steps_envelope("k-1")
            .to_stored_event("device-1", Utc::now())
            .expect("valid envelope");
        let json = serde_json::to_string(&event).expect("serialize");
        let back: StoredEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }
}
