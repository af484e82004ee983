use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use finance_query_core::{FetchClient, YahooAuthManager, YahooError, YahooFinanceClient};
use serde_json::Value;
use serenity::async_trait;

use crate::models::TickerSymbol;

pub mod earnings;

/// Per-ticker provider failure. The scan decides whether to suppress it.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Yahoo(#[from] YahooError),
    #[error("provider call for {symbol} timed out after {timeout:?}")]
    Timeout { symbol: String, timeout: Duration },
    #[error("malformed provider payload for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },
}

/// Source of upcoming earnings dates, one ticker at a time.
#[async_trait]
pub trait EarningsProvider: Send + Sync {
    /// Next known earnings timestamp, `None` when the provider has no calendar entry.
    async fn next_earnings(&self, ticker: &TickerSymbol)
        -> Result<Option<DateTime<Utc>>, FetchError>;

    /// Best-effort display name for the company behind `ticker`.
    async fn company_name(&self, ticker: &TickerSymbol) -> Result<Option<String>, FetchError>;
}

pub struct FinanceService {
    client: Arc<YahooFinanceClient>,
    timeout: Duration,
}

impl FinanceService {
    /// Build a finance service with optional proxy support.
    pub fn new(proxy: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let fetch = Arc::new(FetchClient::new(proxy.clone())?);
        let auth = Arc::new(YahooAuthManager::new(proxy, fetch.cookie_jar().clone()));
        let client = Arc::new(YahooFinanceClient::new(auth, fetch));

        Ok(Self { client, timeout })
    }

    async fn quote_summary(
        &self,
        ticker: &TickerSymbol,
        modules: &[&str],
    ) -> Result<Value, FetchError> {
        let symbol = earnings::yahoo_symbol(ticker);
        match tokio::time::timeout(self.timeout, self.client.get_quote_summary(&symbol, modules))
            .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(FetchError::Timeout {
                symbol,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl EarningsProvider for FinanceService {
    async fn next_earnings(
        &self,
        ticker: &TickerSymbol,
    ) -> Result<Option<DateTime<Utc>>, FetchError> {
        let data = self.quote_summary(ticker, &["calendarEvents"]).await?;
        earnings::parse_next_earnings(ticker, &data)
    }

    async fn company_name(&self, ticker: &TickerSymbol) -> Result<Option<String>, FetchError> {
        let data = self.quote_summary(ticker, &["price"]).await?;
        Ok(earnings::parse_company_name(&data))
    }
}

pub use FetchError as Error;
