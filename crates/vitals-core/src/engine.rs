//! Top-level wiring: store, log, tracker, bus, projectors, aggregator.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::bus::{AllEventsStored, ProjectionBus, PublishReport};
use crate::compensation::{CompensationBatch, CompensationTracker};
use crate::db::log::EventLog;
use crate::db::Store;
use crate::error::Result;
use crate::event::{EventEnvelope, EventType};
use crate::ingest::{IngestionCoordinator, StoreResult};
use crate::projector::{
    ActivityProjector, BodyProjector, CaloriesProjector, DomainProjector, HeartProjector,
    MealsProjector, ProjectorSubscriber, SleepProjector, StepsProjector, WeightProjector,
    WorkoutProjector,
};
use crate::summary::{DailySummary, DailySummaryAggregator};

/// One fully wired health event store: ingestion, projections, summaries,
/// all over a single SQLite file.
pub struct HealthEngine {
    log: EventLog,
    coordinator: IngestionCoordinator,
    bus: Arc<ProjectionBus>,
    steps: StepsProjector,
    activity: ActivityProjector,
    calories: CaloriesProjector,
    heart: HeartProjector,
    sleep: SleepProjector,
    workout: WorkoutProjector,
    meals: MealsProjector,
    weight: WeightProjector,
    body: BodyProjector,
    aggregator: Arc<DailySummaryAggregator>,
}

impl HealthEngine {
    /// Open (or create) an engine backed by the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store cannot be opened or
    /// migrated.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::wire(Store::open(path)?))
    }

    /// Open an engine over an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store cannot be configured.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wire(Store::open_in_memory()?))
    }

    fn wire(store: Store) -> Self {
        let log = EventLog::new(store.clone());
        let tracker = CompensationTracker::new(store.clone());

        let steps = StepsProjector::new(store.clone());
        let activity = ActivityProjector::new(store.clone());
        let calories = CaloriesProjector::new(store.clone());
        let heart = HeartProjector::new(store.clone());
        let sleep = SleepProjector::new(store.clone());
        let workout = WorkoutProjector::new(store.clone());
        let meals = MealsProjector::new(store.clone());
        let weight = WeightProjector::new(store.clone());
        let body = BodyProjector::new(store.clone());
        let aggregator = Arc::new(DailySummaryAggregator::new(store));

        let mut bus = ProjectionBus::new();
        let domain_projectors: [Arc<dyn DomainProjector>; 9] = [
            Arc::new(steps.clone()),
            Arc::new(activity.clone()),
            Arc::new(calories.clone()),
            Arc::new(heart.clone()),
            Arc::new(sleep.clone()),
            Arc::new(workout.clone()),
            Arc::new(meals.clone()),
            Arc::new(weight.clone()),
            Arc::new(body.clone()),
        ];
        for projector in domain_projectors {
            bus.register(Arc::new(ProjectorSubscriber::new(projector, log.clone())));
        }
        // Registered after the projectors so a fresh notification usually
        // sees their rows within the same publish.
        bus.register(aggregator.clone());
        let bus = Arc::new(bus);

        let coordinator = IngestionCoordinator::new(log.clone(), tracker, bus.clone());

        Self {
            log,
            coordinator,
            bus,
            steps,
            activity,
            calories,
            heart,
            sleep,
            workout,
            meals,
            weight,
            body,
            aggregator,
        }
    }

    /// Ingest one device batch: events plus optional compensations.
    ///
    /// # Errors
    ///
    /// See [`IngestionCoordinator::submit`].
    pub fn submit(
        &self,
        device_id: &str,
        events: &[EventEnvelope],
        compensations: &CompensationBatch,
    ) -> Result<StoreResult> {
        self.coordinator.submit(device_id, events, compensations)
    }

    /// Force a rebuild of every projection and summary for the given
    /// dates, exactly as if a batch touching them had just been stored.
    /// This is the maintenance path ("regenerate yesterday") and shares
    /// the rebuild code with ordinary ingestion.
    pub fn reproject(&self, device_id: &str, dates: &[NaiveDate]) -> PublishReport {
        let note = AllEventsStored {
            device_id: device_id.to_string(),
            affected_dates: dates.iter().copied().collect::<BTreeSet<_>>(),
            event_types: EventType::ALL.into_iter().collect(),
        };
        tracing::info!(device = device_id, dates = dates.len(), "reprojecting");
        self.bus.publish(&note)
    }

    /// The stored daily summary for one device-day, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_summary(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>> {
        self.aggregator.daily_summary(device_id, date)
    }

    /// The append-only event log.
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// Lifetime count of subscriber failures across all publishes.
    #[must_use]
    pub fn projection_failure_count(&self) -> u64 {
        self.bus.failure_count()
    }

    /// Step projection queries.
    #[must_use]
    pub const fn steps(&self) -> &StepsProjector {
        &self.steps
    }

    /// Active-minutes projection queries.
    #[must_use]
    pub const fn activity(&self) -> &ActivityProjector {
        &self.activity
    }

    /// Active-calories projection queries.
    #[must_use]
    pub const fn calories(&self) -> &CaloriesProjector {
        &self.calories
    }

    /// Heart-rate projection queries.
    #[must_use]
    pub const fn heart(&self) -> &HeartProjector {
        &self.heart
    }

    /// Sleep projection queries.
    #[must_use]
    pub const fn sleep(&self) -> &SleepProjector {
        &self.sleep
    }

    /// Workout projection queries.
    #[must_use]
    pub const fn workouts(&self) -> &WorkoutProjector {
        &self.workout
    }

    /// Nutrition projection queries.
    #[must_use]
    pub const fn meals(&self) -> &MealsProjector {
        &self.meals
    }

    /// Weight projection queries.
    #[must_use]
    pub const fn weight(&self) -> &WeightProjector {
        &self.weight
    }

    /// Body-measurement projection queries.
    #[must_use]
    pub const fn body(&self) -> &BodyProjector {
        &self.body
    }
}
