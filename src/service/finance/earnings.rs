use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::TickerSymbol;
use crate::service::finance::FetchError;

/// Yahoo spells share classes with a dash (`BRK-B`), exchange lists often use a dot.
pub fn yahoo_symbol(ticker: &TickerSymbol) -> String {
    ticker.as_str().replace('.', "-")
}

fn summary_result(data: &Value) -> Option<&Value> {
    data.get("quoteSummary")
        .and_then(|q| q.get("result"))
        .and_then(|r| r.as_array())
        .and_then(|arr| arr.first())
}

/// Extract `calendarEvents.earnings.earningsDate[0]` from a quoteSummary payload.
///
/// A payload without a calendar entry is "no event known". A payload that is not a quoteSummary
/// at all, or whose date cannot be read, is malformed.
pub fn parse_next_earnings(
    ticker: &TickerSymbol,
    data: &Value,
) -> Result<Option<DateTime<Utc>>, FetchError> {
    let malformed = |reason: &str| FetchError::Malformed {
        symbol: ticker.to_string(),
        reason: reason.to_string(),
    };

    let Some(result) = summary_result(data) else {
        let detail = data
            .get("quoteSummary")
            .and_then(|q| q.get("error"))
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .unwrap_or("missing quoteSummary.result");
        return Err(malformed(detail));
    };

    let first = result
        .get("calendarEvents")
        .and_then(|c| c.get("earnings"))
        .and_then(|e| e.get("earningsDate"))
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first());

    let Some(first) = first else {
        return Ok(None);
    };

    let ts = first
        .get("raw")
        .and_then(|r| r.as_i64())
        .or_else(|| first.as_i64())
        .ok_or_else(|| malformed("earningsDate is not a unix timestamp"))?;

    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(Some)
        .ok_or_else(|| malformed("earningsDate out of range"))
}

/// `price.shortName`, falling back to `price.longName`.
pub fn parse_company_name(data: &Value) -> Option<String> {
    let price = summary_result(data)?.get("price")?;
    price
        .get("shortName")
        .or_else(|| price.get("longName"))
        .and_then(|n| n.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
