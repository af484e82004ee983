use std::collections::BTreeSet;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::models::TickerSymbol;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("failed to read dedup store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("dedup store {path} is not a JSON array of tickers: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write dedup store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// File-backed set of tickers that have already been notified.
///
/// The whole set is rewritten on every change: serialized to a sibling temp file, flushed to disk,
/// then renamed over the store so readers never observe a partial file.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    notified: BTreeSet<TickerSymbol>,
}

impl DedupStore {
    /// Load the store from `path`. A missing file is a fresh, empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, DedupError> {
        let path = path.into();
        let notified = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeSet::new(),
            Ok(bytes) => {
                let list: Vec<TickerSymbol> = serde_json::from_slice(&bytes)
                    .map_err(|source| DedupError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No dedup store at {}; starting empty", path.display());
                BTreeSet::new()
            }
            Err(source) => return Err(DedupError::Read { path, source }),
        };

        debug!("Dedup store {} holds {} tickers", path.display(), notified.len());
        Ok(Self { path, notified })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, ticker: &TickerSymbol) -> bool {
        self.notified.contains(ticker)
    }

    pub fn len(&self) -> usize {
        self.notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }

    /// Record `tickers` as notified and persist before returning.
    ///
    /// Returns how many tickers were new. If nothing is new the file is left alone. If the write
    /// fails the in-memory set is unchanged.
    pub async fn mark_notified<'a, I>(&mut self, tickers: I) -> Result<usize, DedupError>
    where
        I: IntoIterator<Item = &'a TickerSymbol>,
    {
        let mut next = self.notified.clone();
        let added = tickers
            .into_iter()
            .filter(|t| next.insert((*t).clone()))
            .count();

        if added == 0 {
            return Ok(0);
        }

        persist(&self.path, &next).await?;
        self.notified = next;
        debug!("Dedup store now holds {} tickers", self.notified.len());
        Ok(added)
    }
}

async fn persist(path: &Path, set: &BTreeSet<TickerSymbol>) -> Result<(), DedupError> {
    let payload = serde_json::to_vec(set)?;
    let write_err = |source| DedupError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        sync_parent_dir(path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(())
}

/// Flush the directory entry so the rename itself survives a power loss.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> io::Result<()> {
    tokio::fs::File::open(parent_dir(path)).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("earnings-watch-dedup-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(s: &str) -> TickerSymbol {
        TickerSymbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn absent_file_is_empty() {
        let store = DedupStore::load(temp_path("absent.json")).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let path = temp_path("reload.json");
        let mut store = DedupStore::load(&path).await.unwrap();
        let added = store.mark_notified(&[t("MSFT"), t("AAPL")]).await.unwrap();
        assert_eq!(added, 2);

        let on_disk: Vec<String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["AAPL", "MSFT"]);

        let reloaded = DedupStore::load(&path).await.unwrap();
        assert!(reloaded.contains(&t("AAPL")));
        assert!(reloaded.contains(&t("MSFT")));
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn marking_is_idempotent() {
        let path = temp_path("idempotent.json");
        let mut store = DedupStore::load(&path).await.unwrap();
        assert_eq!(store.mark_notified(&[t("AAPL")]).await.unwrap(), 1);
        assert_eq!(store.mark_notified(&[t("AAPL"), t("AAPL")]).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn reads_legacy_lowercase_entries() {
        let path = temp_path("legacy.json");
        std::fs::write(&path, r#"["aapl", "NVDA"]"#).unwrap();
        let store = DedupStore::load(&path).await.unwrap();
        assert!(store.contains(&t("AAPL")));
        assert!(store.contains(&t("NVDA")));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let path = temp_path("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            DedupStore::load(&path).await,
            Err(DedupError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let path = temp_path("blocked.json");
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        // A directory squatting on the temp file name makes the write fail.
        let _ = std::fs::remove_dir(&tmp);
        std::fs::create_dir(&tmp).unwrap();

        let mut store = DedupStore::load(&path).await.unwrap();
        let err = store.mark_notified(&[t("AAPL")]).await.unwrap_err();
        assert!(matches!(err, DedupError::Write { .. }));
        assert!(!store.contains(&t("AAPL")));
        assert!(!path.exists());

        std::fs::remove_dir(&tmp).unwrap();
    }

    #[test]
    fn bare_file_name_syncs_working_directory() {
        assert_eq!(parent_dir(Path::new("posted_earnings.json")), Path::new("."));
        assert_eq!(
            parent_dir(Path::new("/var/lib/bot/posted.json")),
            Path::new("/var/lib/bot")
        );
    }

    #[tokio::test]
    async fn write_syncs_the_store_directory() {
        let path = temp_path("dir-sync.json");
        sync_parent_dir(&path).await.unwrap();

        let mut store = DedupStore::load(&path).await.unwrap();
        store.mark_notified([&t("AAPL")]).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(DedupStore::load(&path).await.unwrap().len(), 1);
    }
}
