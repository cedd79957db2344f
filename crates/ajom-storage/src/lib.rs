//! CSV persistence for the master/delta sets + polite HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ajom_core::{Record, CANONICAL_COLUMNS};
use anyhow::Context;
use chrono::NaiveDate;
use rand::Rng;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ajom-storage";

pub const MASTER_FILE_NAME: &str = "job_offers_master.csv";

/// Tabular store for the master set and the daily delta artifacts.
///
/// The master file is loaded fully into memory once per run and rewritten
/// atomically (temp file + rename) at the end of the run. Nothing here
/// locks the file: the store assumes a single writer, one run at a time.
#[derive(Debug, Clone)]
pub struct MasterStore {
    root: PathBuf,
}

impl MasterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_path(&self) -> PathBuf {
        self.root.join(MASTER_FILE_NAME)
    }

    pub fn delta_path(&self, run_date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("new_offers_{}.csv", run_date.format("%Y%m%d")))
    }

    /// Load the persisted master set.
    ///
    /// A missing file is the initialization case and yields an empty set;
    /// a present file is decoded with absent columns synthesized as empty
    /// strings.
    pub async fn load(&self) -> anyhow::Result<Vec<Record>> {
        let path = self.master_path();
        let exists = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking master file {}", path.display()))?;
        if !exists {
            debug!(path = %path.display(), "no persisted master, starting empty");
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading master file {}", path.display()))?;
        decode_records(&bytes).with_context(|| format!("decoding master file {}", path.display()))
    }

    /// Overwrite the master file with the given rows.
    pub async fn save(&self, records: &[Record]) -> anyhow::Result<PathBuf> {
        let path = self.master_path();
        let bytes = encode_records(records)?;
        self.write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    /// Write the dated delta artifact, or nothing when the delta is empty.
    pub async fn save_delta(
        &self,
        new_today: &[Record],
        run_date: NaiveDate,
    ) -> anyhow::Result<Option<PathBuf>> {
        if new_today.is_empty() {
            return Ok(None);
        }
        let path = self.delta_path(run_date);
        let bytes = encode_records(new_today)?;
        self.write_atomic(&path, &bytes).await?;
        Ok(Some(path))
    }

    async fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        let parent = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating data directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, dest).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming {} -> {}",
                        temp_path.display(),
                        dest.display()
                    )
                })
            }
        }
    }
}

/// Header-mapped CSV decode. Canonical columns absent from the header row
/// come back as empty strings; unknown columns are ignored.
pub fn decode_records(bytes: &[u8]) -> anyhow::Result<Vec<Record>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers().context("reading csv header row")?.clone();
    let mut index = [None; CANONICAL_COLUMNS.len()];
    for (slot, name) in index.iter_mut().zip(CANONICAL_COLUMNS) {
        *slot = headers.iter().position(|h| h == name);
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.context("reading csv row")?;
        let field = |slot: Option<usize>| {
            slot.and_then(|i| row.get(i)).unwrap_or_default().to_string()
        };
        records.push(Record {
            company: field(index[0]),
            company_website: field(index[1]),
            industry: field(index[2]),
            job_title: field(index[3]),
            pub_date: field(index[4]),
            job_url: field(index[5]),
            source: field(index[6]),
        });
    }
    Ok(records)
}

/// Encode rows with the canonical header, which is written even for an
/// empty set.
pub fn encode_records(records: &[Record]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(CANONICAL_COLUMNS)
        .context("writing csv header row")?;
    for record in records {
        writer.serialize(record).context("encoding csv row")?;
    }
    writer.flush().context("flushing csv buffer")?;
    Ok(writer
        .into_inner()
        .expect("flushed in-memory csv writer cannot fail"))
}

/// Bounds of the politeness pause taken before every request, in
/// milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_ms: 1_000,
            max_ms: 3_000,
        }
    }
}

impl DelayRange {
    fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub delay: DelayRange,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            delay: DelayRange::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Sequential, rate-limited page fetcher.
///
/// Every request is preceded by a randomized pause sampled from the
/// configured delay range. Transport failures surface as recoverable
/// [`FetchError`]s; there are no retries.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    delay: DelayRange,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            delay: config.delay,
        })
    }

    pub async fn fetch_text(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<String, FetchError> {
        tokio::time::sleep(self.delay.sample()).await;

        let span = info_span!("http_fetch", %run_id, source_id, url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(url: &str, title: &str) -> Record {
        Record {
            company: "Biuro Rachunkowe Alfa".into(),
            job_title: title.into(),
            pub_date: "2024-03-01".into(),
            job_url: url.into(),
            source: "pracuj.pl".into(),
            ..Record::default()
        }
    }

    #[tokio::test]
    async fn load_without_prior_state_is_empty() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path());
        let records = store.load().await.expect("load");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_field_content() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path().join("data"));
        let records = vec![
            record("https://example.com/offer/1", "Główny Księgowy"),
            record("https://example.com/offer/2", "Chief Accountant, EMEA"),
        ];

        store.save(&records).await.expect("save");
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn save_overwrites_prior_state() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path());

        store
            .save(&[record("https://example.com/offer/1", "Old")])
            .await
            .expect("first save");
        store
            .save(&[record("https://example.com/offer/2", "New")])
            .await
            .expect("second save");

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].job_url, "https://example.com/offer/2");
    }

    #[tokio::test]
    async fn missing_columns_are_synthesized_as_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(MASTER_FILE_NAME);
        std::fs::write(
            &path,
            "job_title,job_url,rank\nChief Accountant,https://example.com/offer/1,7\n",
        )
        .expect("seed csv");

        let store = MasterStore::new(dir.path());
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].job_title, "Chief Accountant");
        assert_eq!(loaded[0].job_url, "https://example.com/offer/1");
        assert_eq!(loaded[0].company, "");
        assert_eq!(loaded[0].industry, "");
        assert_eq!(loaded[0].source, "");
    }

    #[tokio::test]
    async fn empty_master_still_carries_the_header_row() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path());
        let path = store.save(&[]).await.expect("save");

        let text = std::fs::read_to_string(path).expect("read back");
        assert_eq!(
            text.trim_end(),
            "company,company_website,industry,job_title,pub_date,job_url,source"
        );
    }

    #[tokio::test]
    async fn empty_delta_writes_nothing() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path());
        let run_date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        let path = store.save_delta(&[], run_date).await.expect("save_delta");
        assert!(path.is_none());
        assert!(!store.delta_path(run_date).exists());
    }

    #[tokio::test]
    async fn delta_is_named_by_run_date_and_holds_exactly_the_delta_rows() {
        let dir = tempdir().expect("tempdir");
        let store = MasterStore::new(dir.path());
        let run_date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let rows = vec![record("https://example.com/offer/9", "Główna Księgowa")];

        let path = store
            .save_delta(&rows, run_date)
            .await
            .expect("save_delta")
            .expect("path");
        assert!(path.ends_with("new_offers_20240310.csv"));

        let loaded = decode_records(&std::fs::read(&path).expect("read delta")).expect("decode");
        assert_eq!(loaded, rows);
    }
}
