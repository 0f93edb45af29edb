//! Event type enum covering the 10 health event types.
//!
//! The string representation uses the versioned `<Name>Recorded.v1` wire
//! format submitted by client devices. Every consumer switches on this
//! discriminant; payloads are deserialized per-type keyed on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The 10 event types in the health event catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Step count for a time bucket.
    Steps,
    /// Active minutes for a time bucket.
    Activity,
    /// Active calories burned for a time bucket.
    Calories,
    /// A sleep session (may straddle midnight).
    Sleep,
    /// A recorded workout session.
    Workout,
    /// A logged meal with nutrition facts.
    Meal,
    /// A body-weight measurement.
    Weight,
    /// A tape body measurement (chest, waist, ...).
    BodyMeasurement,
    /// Heart-rate summary for a time bucket.
    HeartRate,
    /// A resting heart-rate reading.
    RestingHeartRate,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.raw)
    }
}

impl std::error::Error for UnknownEventType {}

impl EventType {
    /// All known event types in catalog order.
    pub const ALL: [Self; 10] = [
        Self::Steps,
        Self::Activity,
        Self::Calories,
        Self::Sleep,
        Self::Workout,
        Self::Meal,
        Self::Weight,
        Self::BodyMeasurement,
        Self::HeartRate,
        Self::RestingHeartRate,
    ];

    /// Return the canonical versioned wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steps => "StepsBucketedRecorded.v1",
            Self::Activity => "ActiveMinutesRecorded.v1",
            Self::Calories => "ActiveCaloriesBurnedRecorded.v1",
            Self::Sleep => "SleepSessionRecorded.v1",
            Self::Workout => "WorkoutRecorded.v1",
            Self::Meal => "MealRecorded.v1",
            Self::Weight => "WeightMeasurementRecorded.v1",
            Self::BodyMeasurement => "BodyMeasurementRecorded.v1",
            Self::HeartRate => "HeartRateSummaryRecorded.v1",
            Self::RestingHeartRate => "RestingHeartRateRecorded.v1",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "StepsBucketedRecorded.v1" => Ok(Self::Steps),
            "ActiveMinutesRecorded.v1" => Ok(Self::Activity),
            "ActiveCaloriesBurnedRecorded.v1" => Ok(Self::Calories),
            "SleepSessionRecorded.v1" => Ok(Self::Sleep),
            "WorkoutRecorded.v1" => Ok(Self::Workout),
            "MealRecorded.v1" => Ok(Self::Meal),
            "WeightMeasurementRecorded.v1" => Ok(Self::Weight),
            "BodyMeasurementRecorded.v1" => Ok(Self::BodyMeasurement),
            "HeartRateSummaryRecorded.v1" => Ok(Self::HeartRate),
            "RestingHeartRateRecorded.v1" => Ok(Self::RestingHeartRate),
            _ => Err(UnknownEventType { raw: s.to_string() }),
        }
    }
}

// Custom serde: serialize as the bare wire string.
impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
