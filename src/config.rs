use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

use crate::service::automation::earnings::FetchWindow;
use crate::service::universe::DEFAULT_DOWNLOAD_TIMEOUT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{0} is set but empty")]
    Empty(&'static str),
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub channel_id: u64,
    pub application_id: Option<u64>,
    pub guild_ids: Vec<u64>,
    pub pipeline_enabled: bool,
    pub universe: UniverseSettings,
    pub dedup_path: PathBuf,
    pub schedule: ScheduleSettings,
    pub scan: ScanSettings,
}

#[derive(Debug, Clone)]
pub struct UniverseSettings {
    pub path: PathBuf,
    pub column: String,
    pub download_url: Option<String>,
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub timezone: Tz,
    pub cutoff_hour: u32,
    pub window: FetchWindow,
    pub cooldown: Duration,
    pub tick: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub concurrency: usize,
    pub fetch_timeout: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            cutoff_hour: 20,
            window: FetchWindow::default(),
            cooldown: Duration::from_secs(61),
            tick: Duration::from_secs(1),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    /// Read settings from the process environment. Call `dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup, so tests don't have to touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let discord_token = required(&lookup, "DISCORD_TOKEN")?;
        let channel_id = parse_u64("EARNINGS_CHANNEL_ID", &required(&lookup, "EARNINGS_CHANNEL_ID")?)?;

        let application_id = get("APPLICATION_ID")
            .map(|v| parse_u64("APPLICATION_ID", &v))
            .transpose()?;

        let guild_ids = get("GUILD_IDS")
            .or_else(|| get("GUILD_ID"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_u64("GUILD_IDS", s))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let pipeline_enabled = get("ENABLE_EARNINGS_PINGER").as_deref() != Some("0");

        let universe = UniverseSettings {
            path: get("TICKER_FILE")
                .unwrap_or_else(|| "nasdaq_tickers.csv".to_string())
                .into(),
            column: get("TICKER_COLUMN").unwrap_or_else(|| "Symbol".to_string()),
            download_url: get("TICKER_SOURCE_URL"),
            download_timeout: match get("TICKER_DOWNLOAD_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(u64::from(parse_bounded(
                    "TICKER_DOWNLOAD_TIMEOUT_SECS",
                    &raw,
                    1,
                    600,
                )?)),
                None => DEFAULT_DOWNLOAD_TIMEOUT,
            },
        };

        let dedup_path = get("POSTED_EARNINGS_FILE")
            .unwrap_or_else(|| "posted_earnings.json".to_string())
            .into();

        let defaults = ScheduleSettings::default();
        let timezone = match get("EARNINGS_TZ") {
            Some(raw) => raw.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                key: "EARNINGS_TZ",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.timezone,
        };

        let cutoff_hour = match get("EARNINGS_CUTOFF_HOUR") {
            Some(raw) => parse_bounded("EARNINGS_CUTOFF_HOUR", &raw, 0, 23)?,
            None => defaults.cutoff_hour,
        };

        let minutes = match get("EARNINGS_FETCH_MINUTES") {
            Some(raw) => {
                let minutes = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_bounded("EARNINGS_FETCH_MINUTES", s, 0, 59))
                    .collect::<Result<Vec<_>, _>>()?;
                if minutes.is_empty() {
                    return Err(ConfigError::Empty("EARNINGS_FETCH_MINUTES"));
                }
                minutes
            }
            None => defaults.window.minutes.clone(),
        };
        let max_second = match get("EARNINGS_FETCH_WINDOW_SECS") {
            Some(raw) => parse_bounded("EARNINGS_FETCH_WINDOW_SECS", &raw, 1, 59)?,
            None => defaults.window.max_second,
        };

        let cooldown = match get("EARNINGS_COOLDOWN_SECS") {
            Some(raw) => Duration::from_secs(parse_u64("EARNINGS_COOLDOWN_SECS", &raw)?),
            None => defaults.cooldown,
        };
        if cooldown.as_secs() <= u64::from(max_second) {
            return Err(ConfigError::Invalid {
                key: "EARNINGS_COOLDOWN_SECS",
                value: cooldown.as_secs().to_string(),
                reason: format!("must be longer than the {max_second}s fetch window"),
            });
        }

        let tick = match get("EARNINGS_TICK_SECS") {
            Some(raw) => Duration::from_secs(u64::from(parse_bounded(
                "EARNINGS_TICK_SECS",
                &raw,
                1,
                max_second,
            )?)),
            None => defaults.tick,
        };

        let scan_defaults = ScanSettings::default();
        let concurrency = match get("EARNINGS_SCAN_CONCURRENCY") {
            Some(raw) => parse_bounded("EARNINGS_SCAN_CONCURRENCY", &raw, 1, 256)? as usize,
            None => scan_defaults.concurrency,
        };
        let fetch_timeout = match get("EARNINGS_FETCH_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(u64::from(parse_bounded(
                "EARNINGS_FETCH_TIMEOUT_SECS",
                &raw,
                1,
                600,
            )?)),
            None => scan_defaults.fetch_timeout,
        };

        Ok(Self {
            discord_token,
            channel_id,
            application_id,
            guild_ids,
            pipeline_enabled,
            universe,
            dedup_path,
            schedule: ScheduleSettings {
                timezone,
                cutoff_hour,
                window: FetchWindow {
                    minutes,
                    max_second,
                },
                cooldown,
                tick,
            },
            scan: ScanSettings {
                concurrency,
                fetch_timeout,
            },
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).ok_or(ConfigError::Missing(key))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty(key));
    }
    Ok(trimmed.to_string())
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bounded(key: &'static str, raw: &str, min: u32, max: u32) -> Result<u32, ConfigError> {
    let value = raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: format!("expected {min}..={max}"),
        });
    }
    Ok(value)
}
