//! Per-domain projections rebuilt from the event log.
//!
//! Each projector owns exactly one table keyed `(device_id, date)` and is
//! the only writer to it. Projections carry no incremental state: a rebuild
//! re-reads the live events for one date and fully replaces the row, so
//! rebuilds are idempotent and a tombstoned event simply stops contributing.
//! The delete and the rewrite commit in one transaction; a reader never
//! observes the gap.

pub mod activity;
pub mod body;
pub mod calories;
pub mod heart;
pub mod meals;
pub mod sleep;
pub mod steps;
pub mod weight;
pub mod workout;

use chrono::NaiveDate;
use std::sync::Arc;

use crate::bus::{AllEventsStored, EventsSubscriber};
use crate::db::log::EventLog;
use crate::error::Error;
use crate::event::{EventType, StoredEvent};

pub use activity::ActivityProjector;
pub use body::BodyProjector;
pub use calories::CaloriesProjector;
pub use heart::HeartProjector;
pub use meals::MealsProjector;
pub use sleep::SleepProjector;
pub use steps::StepsProjector;
pub use weight::WeightProjector;
pub use workout::WorkoutProjector;

/// One domain's projection logic.
///
/// `project_events` receives every live event of the projector's types
/// anchored on `date`, freshly read from the log. An empty slice means the
/// date has no live data and the row must be removed.
pub trait DomainProjector: Send + Sync {
    /// Stable projection name used in logs and failure attribution.
    fn name(&self) -> &'static str;

    /// The event types this projection consumes.
    fn event_types(&self) -> &'static [EventType];

    /// Replace the projection row for `(device_id, date)` with one computed
    /// from `events`. Delete and rewrite commit atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure; the caller isolates it per
    /// date.
    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()>;

    /// Remove the projection row for `(device_id, date)` without rewriting.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    fn delete_projections_for_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()>;
}

/// Per-notification rebuild outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// Dates rebuilt successfully.
    pub rebuilt: usize,
    /// Dates skipped because the rebuild failed.
    pub failed: usize,
}

/// Bus adapter driving one [`DomainProjector`] from stored-events
/// notifications.
///
/// The notification carries only the affected closure; the subscriber
/// re-fetches live events per date so a replayed or reordered notification
/// converges on the same rows. A failing date is logged and skipped —
/// sibling dates still rebuild.
pub struct ProjectorSubscriber {
    projector: Arc<dyn DomainProjector>,
    log: EventLog,
}

impl ProjectorSubscriber {
    /// Wrap a projector for bus registration.
    #[must_use]
    pub fn new(projector: Arc<dyn DomainProjector>, log: EventLog) -> Self {
        Self { projector, log }
    }

    /// Rebuild every affected date, isolating per-date failures.
    fn rebuild_dates(&self, device_id: &str, dates: &[NaiveDate]) -> RebuildOutcome {
        let mut outcome = RebuildOutcome::default();
        for &date in dates {
            match self.rebuild_date(device_id, date) {
                Ok(()) => outcome.rebuilt += 1,
                Err(e) => {
                    outcome.failed += 1;
                    let err = Error::ProjectionRebuildFailed {
                        projector: self.projector.name(),
                        date,
                        source: e,
                    };
                    tracing::error!(
                        projector = self.projector.name(),
                        device = device_id,
                        date = %date,
                        error = %err,
                        "projection rebuild failed; continuing with remaining dates"
                    );
                }
            }
        }
        outcome
    }

    fn rebuild_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        let events =
            self.log
                .find_by_device_and_date_range(device_id, Some(self.projector.event_types()), date, date)?;
        self.projector.project_events(device_id, date, &events)?;
        tracing::debug!(
            projector = self.projector.name(),
            device = device_id,
            date = %date,
            events = events.len(),
            "projection rebuilt"
        );
        Ok(())
    }
}

impl EventsSubscriber for ProjectorSubscriber {
    fn name(&self) -> &'static str {
        self.projector.name()
    }

    fn on_events_stored(&self, note: &AllEventsStored) -> anyhow::Result<()> {
        let relevant = self
            .projector
            .event_types()
            .iter()
            .any(|t| note.event_types.contains(t));
        if !relevant {
            return Ok(());
        }

        let dates: Vec<NaiveDate> = note.affected_dates.iter().copied().collect();
        let outcome = self.rebuild_dates(&note.device_id, &dates);
        if outcome.failed > 0 {
            anyhow::bail!(
                "{} of {} date rebuilds failed for {}",
                outcome.failed,
                dates.len(),
                self.projector.name()
            );
        }
        Ok(())
    }
}
