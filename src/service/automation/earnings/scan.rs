use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use futures_util::{stream, StreamExt};
use tracing::{debug, info};

use crate::models::{EarningsEvent, TickerSymbol};
use crate::service::finance::EarningsProvider;

/// Candidates found by one pass over the universe.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Universe order is preserved.
    pub events: Vec<EarningsEvent>,
    pub scanned: usize,
    pub failures: usize,
}

enum Outcome {
    Matched(EarningsEvent),
    Skipped,
    Failed,
}

/// Fans provider calls out over the universe and keeps events that fall on the target date.
pub struct ScanEngine {
    provider: Arc<dyn EarningsProvider>,
    concurrency: usize,
    timezone: Tz,
}

impl ScanEngine {
    pub fn new(provider: Arc<dyn EarningsProvider>, concurrency: usize, timezone: Tz) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            timezone,
        }
    }

    pub async fn scan(&self, target_date: NaiveDate, universe: &[TickerSymbol]) -> ScanResult {
        info!(
            "Scanning {} tickers for earnings on {} (concurrency {})",
            universe.len(),
            target_date,
            self.concurrency
        );

        let outcomes: Vec<Outcome> = stream::iter(universe.to_vec())
            .map(|ticker| self.evaluate(ticker, target_date))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut result = ScanResult {
            scanned: outcomes.len(),
            ..ScanResult::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Matched(event) => result.events.push(event),
                Outcome::Failed => result.failures += 1,
                Outcome::Skipped => {}
            }
        }

        info!(
            "Scan for {} finished: {} candidates, {} fetch failures out of {} tickers",
            target_date,
            result.events.len(),
            result.failures,
            result.scanned
        );
        result
    }

    async fn evaluate(&self, ticker: TickerSymbol, target_date: NaiveDate) -> Outcome {
        let scheduled_at = match self.provider.next_earnings(&ticker).await {
            Ok(Some(at)) => at,
            Ok(None) => return Outcome::Skipped,
            Err(e) => {
                debug!("earnings lookup failed for {}: {}", ticker, e);
                return Outcome::Failed;
            }
        };

        if scheduled_at.with_timezone(&self.timezone).date_naive() != target_date {
            return Outcome::Skipped;
        }

        let company = match self.provider.company_name(&ticker).await {
            Ok(name) => name,
            Err(e) => {
                debug!("company name lookup failed for {}: {}", ticker, e);
                None
            }
        };

        Outcome::Matched(EarningsEvent::new(ticker, company, scheduled_at))
    }
}
