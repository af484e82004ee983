use crate::service::automation::earnings::EarningsContext;

use super::earnings;

const COMMANDS: [&str; 2] = ["ping", "earnings"];

/// `!ping` or `!earnings` typed without a mention. Any other `!` message is not for us.
pub fn prefixed_command(content: &str) -> Option<&str> {
    let rest = content.strip_prefix('!')?;
    let word = rest.split_whitespace().next()?;
    COMMANDS
        .iter()
        .any(|c| word.eq_ignore_ascii_case(c))
        .then_some(content)
}

pub async fn handle(text: &str, ctx: &EarningsContext) -> Result<String, String> {
    let cmd = text
        .split_whitespace()
        .next()
        .ok_or_else(|| "No command provided. Try: ".to_string() + help_text())?
        .trim_start_matches('!')
        .to_ascii_lowercase();

    match cmd.as_str() {
        "ping" => Ok("🏓 Pong!".to_string()),
        "earnings" => earnings::handle_preview(ctx).await,
        _ => Err(format!("Unknown command: {}. {}", cmd, help_text())),
    }
}

pub fn help_text() -> &'static str {
    "Usage: @Bot ping | earnings"
}
