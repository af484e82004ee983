use chrono::{DateTime, Days, NaiveDate, TimeZone, Timelike};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::models::{DeliveryBatch, EarningsEvent};
use crate::service::caching::{DedupError, DedupStore};
use crate::service::universe::UniverseError;

use super::delivery::{DeliveryClosed, DeliveryQueue};
use super::EarningsContext;

/// Narrow wall-clock window in which a fetch may fire, e.g. the first 5 seconds of :00 and :30.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub minutes: Vec<u32>,
    /// Exclusive upper bound on the second within a firing minute.
    pub max_second: u32,
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self {
            minutes: vec![0, 30],
            max_second: 5,
        }
    }
}

impl FetchWindow {
    pub fn is_due<T: Timelike>(&self, now: &T) -> bool {
        self.minutes.contains(&now.minute()) && now.second() < self.max_second
    }
}

/// Today, or tomorrow once the local hour reaches `cutoff_hour`.
pub fn target_date<Z: TimeZone>(now: &DateTime<Z>, cutoff_hour: u32) -> NaiveDate {
    let today = now.date_naive();
    if now.hour() >= cutoff_hour {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    } else {
        today
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    AwaitingWindow,
    Scanning,
    Reconciling,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("ticker universe unavailable: {0}")]
    UniverseUnavailable(#[from] UniverseError),
    #[error("dedup store write failed: {0}")]
    PersistenceWriteFailed(#[from] DedupError),
    #[error(transparent)]
    DeliveryClosed(#[from] DeliveryClosed),
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub target_date: NaiveDate,
    pub scanned: usize,
    pub failures: usize,
    pub candidates: usize,
    pub enqueued: usize,
}

/// Candidates whose ticker has not been notified yet, in scan order.
pub fn reconcile(store: &DedupStore, candidates: &[EarningsEvent]) -> Vec<EarningsEvent> {
    candidates
        .iter()
        .filter(|ev| !store.contains(&ev.ticker))
        .cloned()
        .collect()
}

/// Owns the dedup store and is the only producer on the delivery queue.
pub struct EarningsScheduler {
    ctx: EarningsContext,
    store: DedupStore,
    queue: DeliveryQueue,
    state: SchedulerState,
}

impl EarningsScheduler {
    pub fn new(ctx: EarningsContext, store: DedupStore, queue: DeliveryQueue) -> Self {
        Self {
            ctx,
            store,
            queue,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Tick forever, firing a cycle whenever the fetch window is open.
    pub async fn run(mut self) {
        let schedule = self.ctx.schedule().clone();
        let mut interval = tokio::time::interval(schedule.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Earnings monitor started ({} tracked tickers, window minutes {:?}, tz {})",
            self.store.len(),
            schedule.window.minutes,
            schedule.timezone
        );

        loop {
            interval.tick().await;
            let now = self.ctx.now();
            match self.tick(now).await {
                Some(Ok(outcome)) => {
                    debug!("cycle outcome: {:?}", outcome);
                    // Outlast the fetch window so one window yields one cycle.
                    tokio::time::sleep(schedule.cooldown).await;
                    interval.reset();
                }
                Some(Err(e)) => error!("earnings cycle skipped: {e}"),
                None => {}
            }
        }
    }

    /// Handle one tick at `now`: run a cycle if the fetch window is open, otherwise wait.
    ///
    /// Returns `None` when the window is closed.
    pub async fn tick(&mut self, now: DateTime<Tz>) -> Option<Result<CycleOutcome, CycleError>> {
        if !self.ctx.schedule().window.is_due(&now) {
            self.state = SchedulerState::AwaitingWindow;
            return None;
        }

        info!("Earnings fetch at {}", now.format("%H:%M:%S"));
        Some(self.run_cycle(now).await)
    }

    /// One scan/reconcile/enqueue pass for the target date implied by `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Tz>) -> Result<CycleOutcome, CycleError> {
        let result = self.cycle(now).await;
        self.state = SchedulerState::Idle;
        result
    }

    async fn cycle(&mut self, now: DateTime<Tz>) -> Result<CycleOutcome, CycleError> {
        self.state = SchedulerState::Scanning;
        let scan = self.ctx.candidates(now).await?;
        let target_date = self.ctx.target_date(&now);

        self.state = SchedulerState::Reconciling;
        let new_events = reconcile(&self.store, &scan.events);
        let mut outcome = CycleOutcome {
            target_date,
            scanned: scan.scanned,
            failures: scan.failures,
            candidates: scan.events.len(),
            enqueued: 0,
        };

        if new_events.is_empty() {
            info!("No new earnings for {}", target_date);
            return Ok(outcome);
        }

        info!("New earnings found for {} ({}):", target_date, new_events.len());
        for ev in &new_events {
            info!(
                " - {} ({}) at {}",
                ev.ticker,
                ev.company_name,
                ev.local_timestamp(self.ctx.timezone())
            );
        }

        self.store
            .mark_notified(new_events.iter().map(|ev| &ev.ticker))
            .await?;

        outcome.enqueued = new_events.len();
        self.queue.push(DeliveryBatch {
            target_date,
            events: new_events,
        })?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Tz> {
        New_York
            .with_ymd_and_hms(2025, 1, 30, hour, minute, second)
            .unwrap()
    }

    #[test]
    fn window_fires_only_in_first_seconds_of_configured_minutes() {
        let window = FetchWindow::default();
        assert!(window.is_due(&at(10, 30, 3)));
        assert!(window.is_due(&at(10, 0, 0)));
        assert!(!window.is_due(&at(10, 30, 7)));
        assert!(!window.is_due(&at(10, 30, 5)));
        assert!(!window.is_due(&at(10, 31, 1)));
    }

    #[test]
    fn cutoff_switches_to_tomorrow() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(target_date(&at(20, 5, 0), 20), tomorrow);
        assert_eq!(target_date(&at(20, 0, 0), 20), tomorrow);
        assert_eq!(target_date(&at(19, 55, 0), 20), today);
        assert_eq!(target_date(&at(0, 1, 0), 20), today);
    }

    #[test]
    fn cutoff_rolls_over_month_end() {
        let now = New_York.with_ymd_and_hms(2025, 1, 31, 21, 0, 0).unwrap();
        assert_eq!(
            target_date(&now, 20),
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
        );
    }
}
