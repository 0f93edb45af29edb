//! Append-only health event store with rebuildable per-domain projections.
//!
//! Devices submit batches of health events (steps, sleep, workouts, meals,
//! measurements) with client-chosen idempotency keys. The [`db::log::EventLog`]
//! is the single source of truth; every read model is a disposable SQLite
//! projection rebuilt per `(device, date)` by re-reading the log. Retroactive
//! deletes and corrections tombstone the target event and force the affected
//! dates to rebuild, so derived views converge without ever mutating history.
//!
//! [`HealthEngine`] wires the whole pipeline:
//!
//! ```no_run
//! use vitals_core::{CompensationBatch, EventEnvelope, EventType, HealthEngine};
//! use serde_json::json;
//!
//! # fn main() -> vitals_core::Result<()> {
//! let engine = HealthEngine::open_in_memory()?;
//! let batch = [EventEnvelope {
//!     idempotency_key: "watch-2025-01-05-0800".into(),
//!     event_type: EventType::Steps,
//!     payload: json!({
//!         "bucketStart": "2025-01-05T08:00:00Z",
//!         "bucketEnd": "2025-01-05T08:15:00Z",
//!         "count": 812
//!     }),
//! }];
//! let result = engine.submit("device-1", &batch, &CompensationBatch::default())?;
//! assert_eq!(result.stored_count, 1);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod compensation;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod ingest;
pub mod projector;
pub mod summary;

pub use bus::{AllEventsStored, EventsSubscriber, ProjectionBus, PublishReport};
pub use compensation::{
    CompensationBatch, CompensationEventData, CompensationKind, CompensationRecord,
    CompensationTracker,
};
pub use db::log::{AppendStatus, EventLog};
pub use db::Store;
pub use engine::HealthEngine;
pub use error::{Error, Result};
pub use event::{EventEnvelope, EventPayload, EventType, StoredEvent};
pub use ingest::{AffectedSet, EventStatus, IngestionCoordinator, StoreResult};
pub use projector::DomainProjector;
pub use summary::{DailySummary, DailySummaryAggregator};
