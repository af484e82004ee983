use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;

use super::TickerSymbol;

/// Shown when the provider has no usable company name.
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// Upcoming earnings announcement discovered for a single ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningsEvent {
    pub ticker: TickerSymbol,
    pub company_name: String,
    /// Minute precision; seconds are dropped on construction.
    pub scheduled_at: DateTime<Utc>,
}

impl EarningsEvent {
    pub fn new(
        ticker: TickerSymbol,
        company_name: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let company_name = company_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());
        let scheduled_at = scheduled_at
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(scheduled_at);

        Self {
            ticker,
            company_name,
            scheduled_at,
        }
    }

    pub fn local_date(&self, tz: Tz) -> NaiveDate {
        self.scheduled_at.with_timezone(&tz).date_naive()
    }

    /// `YYYY-MM-DD HH:MM` in the given zone.
    pub fn local_timestamp(&self, tz: Tz) -> String {
        self.scheduled_at
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

/// Events discovered by one scheduler cycle, delivered together in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryBatch {
    pub target_date: NaiveDate,
    pub events: Vec<EarningsEvent>,
}

impl DeliveryBatch {
    pub fn tickers(&self) -> impl Iterator<Item = &TickerSymbol> {
        self.events.iter().map(|e| &e.ticker)
    }
}
