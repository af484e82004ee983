pub mod delivery;
pub mod scan;
pub mod schedule;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ScheduleSettings;
use crate::service::universe::{UniverseError, UniverseSource};

pub use delivery::{
    delivery_queue, format_alert, DeliveryClosed, DeliveryQueue, DeliveryWorker, DiscordNotifier,
    EarningsNotifier, NotifyError,
};
pub use scan::{ScanEngine, ScanResult};
pub use schedule::{
    reconcile, target_date, CycleError, CycleOutcome, EarningsScheduler, FetchWindow,
    SchedulerState,
};

/// Wall-clock source. Swapped out in tests to drive the scheduler through fixed instants.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared pieces used by both the background monitor and the on-demand command.
#[derive(Clone)]
pub struct EarningsContext {
    universe: Arc<dyn UniverseSource>,
    engine: Arc<ScanEngine>,
    schedule: ScheduleSettings,
    clock: Clock,
}

impl EarningsContext {
    pub fn new(
        universe: Arc<dyn UniverseSource>,
        engine: Arc<ScanEngine>,
        schedule: ScheduleSettings,
    ) -> Self {
        Self {
            universe,
            engine,
            schedule,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn schedule(&self) -> &ScheduleSettings {
        &self.schedule
    }

    pub fn timezone(&self) -> Tz {
        self.schedule.timezone
    }

    pub fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.schedule.timezone)
    }

    pub fn target_date(&self, now: &DateTime<Tz>) -> NaiveDate {
        target_date(now, self.schedule.cutoff_hour)
    }

    /// Load the universe and scan it for the target date implied by `now`.
    pub async fn candidates(&self, now: DateTime<Tz>) -> Result<ScanResult, UniverseError> {
        let universe = self.universe.load().await?;
        Ok(self.engine.scan(self.target_date(&now), &universe).await)
    }
}

/// Handles for the two long-running pipeline tasks.
pub struct PipelineHandles {
    pub scheduler: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

impl PipelineHandles {
    pub fn shutdown(&self) {
        self.scheduler.abort();
        self.worker.abort();
    }
}

/// Spawn the scheduler and delivery worker as independent tasks.
pub fn spawn_earnings_pipeline(
    scheduler: EarningsScheduler,
    worker: DeliveryWorker,
) -> PipelineHandles {
    info!("Starting earnings monitor and delivery worker");
    PipelineHandles {
        worker: tokio::spawn(worker.run()),
        scheduler: tokio::spawn(scheduler.run()),
    }
}
