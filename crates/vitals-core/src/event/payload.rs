//! Typed payload data structs for each health event type.
//!
//! Each event type has a corresponding data struct defining the JSON payload
//! schema devices submit. The discriminant is external (the envelope's
//! `eventType` field), so [`EventPayload`] deserializes via
//! [`EventPayload::deserialize_for`] rather than a derived `Deserialize`.
//! Wire field names are camelCase to match the client protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::types::EventType;

// ---------------------------------------------------------------------------
// EventPayload — the unified payload enum
// ---------------------------------------------------------------------------

/// Typed payload for a stored health event. The discriminant comes from
/// [`EventType`], not from the JSON itself.
///
/// **Serde note:** `EventPayload` implements `Serialize` manually
/// (dispatching to the inner struct) but does **not** implement
/// `Deserialize` directly. Use [`EventPayload::deserialize_for`] with the
/// known [`EventType`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Payload for `StepsBucketedRecorded.v1`.
    Steps(StepsData),
    /// Payload for `ActiveMinutesRecorded.v1`.
    Activity(ActivityData),
    /// Payload for `ActiveCaloriesBurnedRecorded.v1`.
    Calories(CaloriesData),
    /// Payload for `SleepSessionRecorded.v1`.
    Sleep(SleepData),
    /// Payload for `WorkoutRecorded.v1`.
    Workout(WorkoutData),
    /// Payload for `MealRecorded.v1`.
    Meal(MealData),
    /// Payload for `WeightMeasurementRecorded.v1`.
    Weight(WeightData),
    /// Payload for `BodyMeasurementRecorded.v1`.
    BodyMeasurement(BodyMeasurementData),
    /// Payload for `HeartRateSummaryRecorded.v1`.
    HeartRate(HeartRateData),
    /// Payload for `RestingHeartRateRecorded.v1`.
    RestingHeartRate(RestingHeartRateData),
}

impl EventPayload {
    /// Deserialize a JSON value into the correct variant based on the
    /// externally-carried event type.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadParseError`] if the JSON does not match the
    /// expected schema for the given event type.
    pub fn deserialize_for(
        event_type: EventType,
        json: &serde_json::Value,
    ) -> Result<Self, PayloadParseError> {
        let json = json.clone();
        let result = match event_type {
            EventType::Steps => serde_json::from_value(json).map(EventPayload::Steps),
            EventType::Activity => serde_json::from_value(json).map(EventPayload::Activity),
            EventType::Calories => serde_json::from_value(json).map(EventPayload::Calories),
            EventType::Sleep => serde_json::from_value(json).map(EventPayload::Sleep),
            EventType::Workout => serde_json::from_value(json).map(EventPayload::Workout),
            EventType::Meal => serde_json::from_value(json).map(EventPayload::Meal),
            EventType::Weight => serde_json::from_value(json).map(EventPayload::Weight),
            EventType::BodyMeasurement => {
                serde_json::from_value(json).map(EventPayload::BodyMeasurement)
            }
            EventType::HeartRate => serde_json::from_value(json).map(EventPayload::HeartRate),
            EventType::RestingHeartRate => {
                serde_json::from_value(json).map(EventPayload::RestingHeartRate)
            }
        };

        result.map_err(|source| PayloadParseError { event_type, source })
    }

    /// The event type this payload belongs to.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Steps(_) => EventType::Steps,
            Self::Activity(_) => EventType::Activity,
            Self::Calories(_) => EventType::Calories,
            Self::Sleep(_) => EventType::Sleep,
            Self::Workout(_) => EventType::Workout,
            Self::Meal(_) => EventType::Meal,
            Self::Weight(_) => EventType::Weight,
            Self::BodyMeasurement(_) => EventType::BodyMeasurement,
            Self::HeartRate(_) => EventType::HeartRate,
            Self::RestingHeartRate(_) => EventType::RestingHeartRate,
        }
    }

    /// Occurrence anchors: the primary instant and, for span-like payloads,
    /// the end instant. A sleep session that straddles midnight therefore
    /// anchors two calendar dates.
    #[must_use]
    pub const fn time_range(&self) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        match self {
            Self::Steps(d) => (d.bucket_start, Some(d.bucket_end)),
            Self::Activity(d) => (d.bucket_start, Some(d.bucket_end)),
            Self::Calories(d) => (d.bucket_start, Some(d.bucket_end)),
            Self::Sleep(d) => (d.sleep_start, Some(d.sleep_end)),
            Self::Workout(d) => (d.start, Some(d.end)),
            Self::Meal(d) => (d.eaten_at, None),
            Self::Weight(d) => (d.measured_at, None),
            Self::BodyMeasurement(d) => (d.measured_at, None),
            Self::HeartRate(d) => (d.bucket_start, Some(d.bucket_end)),
            Self::RestingHeartRate(d) => (d.measured_at, None),
        }
    }

    /// Validate payload contents against per-type schema bounds.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Steps(d) => {
                ordered(d.bucket_start, d.bucket_end, "bucket")?;
                if d.count > 200_000 {
                    return Err(format!("step count {} out of range", d.count));
                }
            }
            Self::Activity(d) => {
                ordered(d.bucket_start, d.bucket_end, "bucket")?;
                if d.active_minutes > 1_440 {
                    return Err(format!("activeMinutes {} exceeds a day", d.active_minutes));
                }
            }
            Self::Calories(d) => {
                ordered(d.bucket_start, d.bucket_end, "bucket")?;
                if !d.energy_kcal.is_finite() || d.energy_kcal < 0.0 || d.energy_kcal > 20_000.0 {
                    return Err(format!("energyKcal {} out of range", d.energy_kcal));
                }
            }
            Self::Sleep(d) => {
                ordered(d.sleep_start, d.sleep_end, "sleep session")?;
                if d.sleep_end - d.sleep_start > chrono::Duration::hours(24) {
                    return Err("sleep session longer than 24h".into());
                }
                if d.total_minutes > 1_440 {
                    return Err(format!("totalMinutes {} exceeds a day", d.total_minutes));
                }
            }
            Self::Workout(d) => {
                ordered(d.start, d.end, "workout")?;
                if d.workout_id.trim().is_empty() {
                    return Err("workoutId must not be blank".into());
                }
                if d.duration_minutes > 1_440 {
                    return Err(format!("durationMinutes {} exceeds a day", d.duration_minutes));
                }
                if let Some(bpm) = d.avg_heart_rate {
                    bpm_in_range(bpm)?;
                }
                if let Some(bpm) = d.max_heart_rate {
                    bpm_in_range(bpm)?;
                }
            }
            Self::Meal(d) => {
                if d.title.trim().is_empty() {
                    return Err("meal title must not be blank".into());
                }
                if let Some(kcal) = d.calories_kcal {
                    if kcal > 20_000 {
                        return Err(format!("caloriesKcal {kcal} out of range"));
                    }
                }
            }
            Self::Weight(d) => {
                if !(1.0..=500.0).contains(&d.weight_kg) {
                    return Err(format!("weightKg {} out of range", d.weight_kg));
                }
                if let Some(pct) = d.body_fat_percent {
                    if !(1.0..=75.0).contains(&pct) {
                        return Err(format!("bodyFatPercent {pct} out of range"));
                    }
                }
            }
            Self::BodyMeasurement(d) => {
                if d.measurement_id.trim().is_empty() {
                    return Err("measurementId must not be blank".into());
                }
                if d.sites.is_empty() {
                    return Err("body measurement has no sites".into());
                }
                for (site, cm) in &d.sites {
                    if !(1.0..=300.0).contains(cm) {
                        return Err(format!("site '{site}' measurement {cm}cm out of range"));
                    }
                }
            }
            Self::HeartRate(d) => {
                ordered(d.bucket_start, d.bucket_end, "bucket")?;
                if !d.avg_bpm.is_finite() || !(20.0..=260.0).contains(&d.avg_bpm) {
                    return Err(format!("avgBpm {} out of range", d.avg_bpm));
                }
                if let Some(bpm) = d.min_bpm {
                    bpm_in_range(bpm)?;
                }
                if let Some(bpm) = d.max_bpm {
                    bpm_in_range(bpm)?;
                }
            }
            Self::RestingHeartRate(d) => bpm_in_range(d.bpm)?,
        }
        Ok(())
    }

    /// Serialize the payload to a [`serde_json::Value`].
    ///
    /// # Errors
    ///
    /// Returns an error if the inner struct fails to serialize (should not
    /// happen with well-formed data).
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Steps(d) => serde_json::to_value(d),
            Self::Activity(d) => serde_json::to_value(d),
            Self::Calories(d) => serde_json::to_value(d),
            Self::Sleep(d) => serde_json::to_value(d),
            Self::Workout(d) => serde_json::to_value(d),
            Self::Meal(d) => serde_json::to_value(d),
            Self::Weight(d) => serde_json::to_value(d),
            Self::BodyMeasurement(d) => serde_json::to_value(d),
            Self::HeartRate(d) => serde_json::to_value(d),
            Self::RestingHeartRate(d) => serde_json::to_value(d),
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Steps(d) => d.serialize(serializer),
            Self::Activity(d) => d.serialize(serializer),
            Self::Calories(d) => d.serialize(serializer),
            Self::Sleep(d) => d.serialize(serializer),
            Self::Workout(d) => d.serialize(serializer),
            Self::Meal(d) => d.serialize(serializer),
            Self::Weight(d) => d.serialize(serializer),
            Self::BodyMeasurement(d) => d.serialize(serializer),
            Self::HeartRate(d) => d.serialize(serializer),
            Self::RestingHeartRate(d) => d.serialize(serializer),
        }
    }
}

fn ordered(start: DateTime<Utc>, end: DateTime<Utc>, what: &str) -> Result<(), String> {
    if end < start {
        return Err(format!("{what} end precedes start"));
    }
    Ok(())
}

fn bpm_in_range(bpm: u32) -> Result<(), String> {
    if !(20..=260).contains(&bpm) {
        return Err(format!("heart rate {bpm}bpm out of range"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PayloadParseError
// ---------------------------------------------------------------------------

/// Error returned when deserializing an event's JSON payload fails.
#[derive(Debug)]
pub struct PayloadParseError {
    /// The event type that was being deserialized.
    pub event_type: EventType,
    /// The underlying JSON parse error.
    pub source: serde_json::Error,
}

impl fmt::Display for PayloadParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} payload: {}", self.event_type, self.source)
    }
}

impl std::error::Error for PayloadParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Payload structs — one per event type
// ---------------------------------------------------------------------------

/// Step count for a device-reported time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsData {
    /// Start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// End of the bucket.
    pub bucket_end: DateTime<Utc>,
    /// Steps taken within the bucket.
    pub count: u32,
}

/// Active minutes for a time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    /// Start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// End of the bucket.
    pub bucket_end: DateTime<Utc>,
    /// Minutes of activity within the bucket.
    pub active_minutes: u32,
}

/// Active calories burned for a time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaloriesData {
    /// Start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// End of the bucket.
    pub bucket_end: DateTime<Utc>,
    /// Energy burned within the bucket, kilocalories.
    pub energy_kcal: f64,
}

/// Per-stage minute breakdown of a sleep session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SleepStages {
    /// Minutes of deep sleep.
    pub deep_minutes: u32,
    /// Minutes of light sleep.
    pub light_minutes: u32,
    /// Minutes of REM sleep.
    pub rem_minutes: u32,
    /// Minutes awake within the session.
    pub awake_minutes: u32,
}

/// A sleep session. May straddle midnight, anchoring two dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepData {
    /// Session start instant.
    pub sleep_start: DateTime<Utc>,
    /// Session end instant.
    pub sleep_end: DateTime<Utc>,
    /// Total minutes asleep (excludes awake time).
    pub total_minutes: u32,
    /// Optional per-stage breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<SleepStages>,
}

/// A recorded workout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutData {
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
    /// Total calories burned, if the device reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_calories: Option<u32>,
    /// Average heart rate over the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<u32>,
    /// Peak heart rate over the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u32>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A logged meal with nutrition facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealData {
    /// Meal title as logged.
    pub title: String,
    /// When the meal was eaten.
    pub eaten_at: DateTime<Utc>,
    /// Meal slot ("BREAKFAST", "LUNCH", ...), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    /// Total kilocalories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories_kcal: Option<u32>,
    /// Protein grams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_grams: Option<u32>,
    /// Fat grams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_grams: Option<u32>,
    /// Carbohydrate grams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbohydrates_grams: Option<u32>,
    /// Qualitative rating ("HEALTHY", "NEUTRAL", "UNHEALTHY").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_rating: Option<String>,
}

/// A body-weight measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightData {
    /// When the measurement was taken.
    pub measured_at: DateTime<Utc>,
    /// Weight in kilograms.
    pub weight_kg: f64,
    /// Body-fat percentage, if the scale reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fat_percent: Option<f64>,
}

/// A tape body measurement across one or more sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyMeasurementData {
    /// Client-assigned measurement identifier.
    pub measurement_id: String,
    /// When the measurement was taken.
    pub measured_at: DateTime<Utc>,
    /// Site name ("chest", "waist", "bicepsLeft", ...) to centimeters.
    pub sites: BTreeMap<String, f64>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Heart-rate summary for a time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateData {
    /// Start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// End of the bucket.
    pub bucket_end: DateTime<Utc>,
    /// Average bpm over the bucket.
    pub avg_bpm: f64,
    /// Minimum bpm observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bpm: Option<u32>,
    /// Maximum bpm observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bpm: Option<u32>,
}

/// A resting heart-rate reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestingHeartRateData {
    /// When the reading was taken.
    pub measured_at: DateTime<Utc>,
    /// Resting beats per minute.
    pub bpm: u32,
}
