use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serenity::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UniverseSettings;
use crate::models::TickerSymbol;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("ticker file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read ticker file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ticker file {path} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: String },
    #[error("ticker list download from {url} failed: {reason}")]
    Download { url: String, reason: String },
}

/// Supplies the tickers to scan on each cycle.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    async fn load(&self) -> Result<Vec<TickerSymbol>, UniverseError>;
}

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Ticker universe backed by a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvUniverse {
    path: PathBuf,
    column: String,
    download_url: Option<String>,
    download_timeout: Duration,
}

impl CsvUniverse {
    pub fn new(path: impl Into<PathBuf>, column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            column: column.into(),
            download_url: None,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn from_settings(settings: &UniverseSettings) -> Self {
        let universe = Self::new(&settings.path, &settings.column);
        match &settings.download_url {
            Some(url) => universe.with_download_url(url, settings.download_timeout),
            None => universe,
        }
    }

    /// Download the list to `path` when the file is missing. The whole request is bounded by
    /// `timeout`.
    pub fn with_download_url(mut self, url: impl Into<String>, timeout: Duration) -> Self {
        self.download_url = Some(url.into());
        self.download_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn download(&self, url: &str) -> Result<(), UniverseError> {
        let fail = |reason: String| UniverseError::Download {
            url: url.to_string(),
            reason,
        };

        info!("Ticker file {} missing; downloading from {}", self.path.display(), url);
        let client = reqwest::Client::builder()
            .timeout(self.download_timeout)
            .build()
            .map_err(|e| fail(format!("failed to build client: {e}")))?;

        let resp = client.get(url).send().await.map_err(|e| {
            warn!("Ticker list request failed: {}", e);
            fail(e.to_string())
        })?;
        if !resp.status().is_success() {
            return Err(fail(format!("status {}", resp.status())));
        }
        let body = resp.bytes().await.map_err(|e| fail(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| UniverseError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        // Readers of `path` only ever see the complete list.
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".part");
        let tmp = PathBuf::from(tmp_name);
        let written = async {
            tokio::fs::write(&tmp, &body).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(UniverseError::Io {
                path: self.path.clone(),
                source,
            });
        }
        info!("Saved {} bytes of ticker list to {}", body.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl UniverseSource for CsvUniverse {
    async fn load(&self) -> Result<Vec<TickerSymbol>, UniverseError> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|source| UniverseError::Io {
                path: self.path.clone(),
                source,
            })?;

        if !exists {
            match &self.download_url {
                Some(url) => self.download(url).await?,
                None => return Err(UniverseError::Missing(self.path.clone())),
            }
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| UniverseError::Io {
                path: self.path.clone(),
                source,
            })?;

        let tickers = parse_symbols(&raw, &self.column).ok_or_else(|| {
            UniverseError::MissingColumn {
                path: self.path.clone(),
                column: self.column.clone(),
            }
        })?;

        debug!("Loaded {} tickers from {}", tickers.len(), self.path.display());
        Ok(tickers)
    }
}

/// Pull the `column` values out of CSV text, deduplicated in first-seen order.
///
/// Returns `None` when the header has no such column.
pub fn parse_symbols(raw: &str, column: &str) -> Option<Vec<TickerSymbol>> {
    let mut records = split_records(raw).into_iter();
    let header = records.next()?;
    let idx = header
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(column))?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (row, fields) in records.enumerate() {
        let Some(cell) = fields.get(idx) else {
            continue;
        };
        if cell.is_empty() {
            continue;
        }
        match TickerSymbol::parse(cell) {
            Ok(symbol) => {
                if seen.insert(symbol.clone()) {
                    out.push(symbol);
                }
            }
            Err(e) => warn!("skipping ticker on data row {}: {}", row + 1, e),
        }
    }
    Some(out)
}

/// Split CSV text into records. Quoted fields may contain commas, doubled quotes and line breaks.
/// Blank lines are dropped.
fn split_records(raw: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    let mut end_record = |fields: &mut Vec<String>, current: &mut String| {
        fields.push(std::mem::take(current).trim().to_string());
        let record = std::mem::take(fields);
        if record.iter().any(|f| !f.is_empty()) || record.len() > 1 {
            records.push(record);
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current).trim().to_string()),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => end_record(&mut fields, &mut current),
            _ => current.push(ch),
        }
    }
    if !fields.is_empty() || !current.trim().is_empty() {
        end_record(&mut fields, &mut current);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(list: &[TickerSymbol]) -> Vec<&str> {
        list.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn picks_column_and_dedupes() {
        let raw = "Name,Symbol,Sector\nApple,AAPL,Tech\nMicrosoft,msft,Tech\nApple again,AAPL,Tech\n,,\n";
        let got = parse_symbols(raw, "Symbol").unwrap();
        assert_eq!(symbols(&got), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn handles_quoted_fields() {
        let raw = "\"Symbol\",\"Name\"\n\"GOOG\",\"Alphabet, Inc.\"\n\"BRK.B\",\"Berkshire \"\"B\"\"\"\n";
        let got = parse_symbols(raw, "Symbol").unwrap();
        assert_eq!(symbols(&got), vec!["GOOG", "BRK.B"]);
    }

    #[test]
    fn quoted_line_breaks_stay_in_their_record() {
        let raw = "Symbol,Name\r\nAAPL,\"Apple\nInc.\"\r\nMSFT,Microsoft\r\n";
        let got = parse_symbols(raw, "Symbol").unwrap();
        assert_eq!(symbols(&got), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn missing_column_is_none() {
        assert!(parse_symbols("Ticker\nAAPL\n", "Symbol").is_none());
        assert!(parse_symbols("", "Symbol").is_none());
    }

    #[test]
    fn skips_invalid_cells() {
        let raw = "Symbol\nAAPL\nNOT A TICKER\nNVDA\n";
        let got = parse_symbols(raw, "Symbol").unwrap();
        assert_eq!(symbols(&got), vec!["AAPL", "NVDA"]);
    }

    #[tokio::test]
    async fn missing_file_fails_loudly() {
        let path = std::env::temp_dir().join(format!(
            "earnings-watch-missing-{}.csv",
            std::process::id()
        ));
        let universe = CsvUniverse::new(&path, "Symbol");
        assert!(matches!(
            universe.load().await,
            Err(UniverseError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn loads_from_disk_in_stable_order() {
        let path = std::env::temp_dir().join(format!(
            "earnings-watch-universe-{}.csv",
            std::process::id()
        ));
        std::fs::write(&path, "Symbol,Name\nZZZ,Zed\nAAA,Aye\n").unwrap();

        let universe = CsvUniverse::new(&path, "Symbol");
        let first = universe.load().await.unwrap();
        let second = universe.load().await.unwrap();
        assert_eq!(symbols(&first), vec!["ZZZ", "AAA"]);
        assert_eq!(first, second);

        let _ = std::fs::remove_file(&path);
    }

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("earnings-watch-dl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    /// Serve one canned HTTP response per connection and return the list URL.
    async fn serve(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}/list.csv")
    }

    #[tokio::test]
    async fn downloads_missing_file_then_reads_it() {
        let path = scratch_path("downloaded.csv");
        let url = serve("200 OK", "Symbol,Name\nAAPL,Apple\nNVDA,Nvidia\n").await;

        let universe =
            CsvUniverse::new(&path, "Symbol").with_download_url(url, Duration::from_secs(5));
        let got = universe.load().await.unwrap();
        assert_eq!(symbols(&got), vec!["AAPL", "NVDA"]);
        assert!(path.exists());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() {
        let path = scratch_path("not-found.csv");
        let url = serve("404 Not Found", "").await;

        let universe =
            CsvUniverse::new(&path, "Symbol").with_download_url(url, Duration::from_secs(5));
        assert!(matches!(
            universe.load().await,
            Err(UniverseError::Download { .. })
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        let path = scratch_path("hanging.csv");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/list.csv", listener.local_addr().unwrap());
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let universe =
            CsvUniverse::new(&path, "Symbol").with_download_url(url, Duration::from_secs(1));
        let result = tokio::time::timeout(Duration::from_secs(15), universe.load())
            .await
            .expect("download must give up on its own");
        assert!(matches!(result, Err(UniverseError::Download { .. })));
        assert!(!path.exists());
    }
}
