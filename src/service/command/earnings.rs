use chrono_tz::Tz;
use serenity::all::CreateCommand;
use tracing::{error, info};

use crate::models::EarningsEvent;
use crate::service::automation::earnings::EarningsContext;

/// How many candidates the on-demand preview lists.
pub const PREVIEW_LIMIT: usize = 10;

pub fn register_command() -> CreateCommand {
    CreateCommand::new("earnings")
        .description("Upcoming earnings for today (or tomorrow after the evening cutoff)")
}

/// Scan right now and list the first candidates, whether or not they were already announced.
pub async fn handle_preview(ctx: &EarningsContext) -> Result<String, String> {
    let now = ctx.now();
    let target = ctx.target_date(&now);
    info!("Earnings preview requested for {}", target);

    let scan = ctx.candidates(now).await.map_err(|e| {
        error!("earnings preview failed: {e}");
        format!("Ticker list unavailable: {e}")
    })?;

    Ok(format_preview(&scan.events, ctx.timezone()))
}

pub fn format_preview(events: &[EarningsEvent], timezone: Tz) -> String {
    if events.is_empty() {
        return "🔍 **No current earnings found.** Please check again later.".to_string();
    }

    let mut lines = vec!["**📊 Earnings Preview:**".to_string()];
    for ev in events.iter().take(PREVIEW_LIMIT) {
        lines.push(format!(
            "`{}` – {} – `{}`",
            ev.ticker,
            ev.company_name,
            ev.local_timestamp(timezone)
        ));
    }
    if events.len() > PREVIEW_LIMIT {
        lines.push(format!("*...and {} more*", events.len() - PREVIEW_LIMIT));
    }
    lines.join("\n")
}
