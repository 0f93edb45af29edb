//! Error taxonomy for the ingestion and projection paths.
//!
//! Ingestion-path variants (`InvalidEventPayload`, `UnknownTargetEvent`,
//! `StorageUnavailable`) surface synchronously to the caller and abort the
//! batch. Projection-path variants (`ProjectionRebuildFailed`,
//! `AggregationFailed`) are contained at the bus: logged, counted, never
//! propagated — the event log is never at risk from a downstream fault.

use chrono::NaiveDate;

/// Engine-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A client-supplied event payload failed validation. The whole batch
    /// is rejected; no partial device syncs.
    #[error("invalid event payload at index {index}: {reason}")]
    InvalidEventPayload {
        /// Position of the offending event in the submitted batch.
        index: usize,
        /// Human-readable validation failure.
        reason: String,
    },

    /// A compensation referenced an event that does not exist in the log
    /// (or belongs to a different device).
    #[error("compensation target event not found: {target_event_id}")]
    UnknownTargetEvent {
        /// The event id the compensation pointed at.
        target_event_id: String,
    },

    /// Transient storage failure. Retryable by the caller; never swallowed
    /// at the event-log boundary.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// A projector's per-date rebuild failed. Contained per domain per
    /// date; sibling projectors and dates are unaffected.
    #[error("projection rebuild failed for {projector} on {date}: {source}")]
    ProjectionRebuildFailed {
        /// Stable domain name of the failing projector.
        projector: &'static str,
        /// The date whose rebuild failed.
        date: NaiveDate,
        /// Underlying cause.
        source: anyhow::Error,
    },

    /// Daily-summary assembly failed for one date. Sibling dates in the
    /// same notification still aggregate.
    #[error("daily summary aggregation failed for {date}: {source}")]
    AggregationFailed {
        /// The date whose aggregation failed.
        date: NaiveDate,
        /// Underlying cause.
        source: anyhow::Error,
    },
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
