//! Run orchestration: dedup key derivation, merge engine, candidate
//! filtering, source registry + run configuration, notification rendering.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ajom_adapters::{adapter_for_source, try_parse_calendar_date, AdapterContext};
use ajom_core::Record;
use ajom_storage::{DelayRange, HttpClientConfig, HttpFetcher, MasterStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ajom-sync";

// --- source registry ----------------------------------------------------

pub const SOURCES_FILE_NAME: &str = "sources.yaml";

/// Monitored keyword set and per-source enable flags, loaded from
/// `sources.yaml` at the workspace root.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub keywords: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    /// Compiled-in registry used when no `sources.yaml` is present.
    pub fn builtin() -> Self {
        Self {
            keywords: vec![
                "Chief Accountant".to_string(),
                "Główna księgowa".to_string(),
                "Główny księgowy".to_string(),
            ],
            sources: ajom_adapters::all_source_ids()
                .into_iter()
                .map(|source_id| SourceConfig {
                    source_id: source_id.to_string(),
                    enabled: true,
                    notes: None,
                })
                .collect(),
        }
    }
}

pub fn load_source_registry(workspace_root: &Path) -> Result<SourceRegistry> {
    let path = workspace_root.join(SOURCES_FILE_NAME);
    if !path.exists() {
        debug!(path = %path.display(), "no source registry file, using builtin defaults");
        return Ok(SourceRegistry::builtin());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

// --- run configuration --------------------------------------------------

/// All runtime knobs, read once from the environment. Every variable has
/// a documented default; nothing is required.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// `AJOM_DATA_DIR`, default `./data`.
    pub data_dir: PathBuf,
    /// `RAW_MASTER_LINK`: URL of the published master file, substituted
    /// into the notification body.
    pub master_link: String,
    /// `MAX_IN_BODY`, default 50: cap on listed postings in the body.
    pub max_in_body: usize,
    /// `AJOM_USER_AGENT`, default `ajom-bot/0.1`.
    pub user_agent: String,
    /// `AJOM_HTTP_TIMEOUT_SECS`, default 30.
    pub http_timeout_secs: u64,
    /// `AJOM_DELAY_MIN_MS` / `AJOM_DELAY_MAX_MS`, default 1000/3000.
    pub delay: DelayRange,
    /// `AJOM_TEMPLATE_PATH`, default `templates/notification_body.txt`.
    pub template_path: PathBuf,
    /// `AJOM_NOTIFICATION_PATH`, default `email_body.txt`.
    pub notification_path: PathBuf,
    pub workspace_root: PathBuf,
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("AJOM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            master_link: std::env::var("RAW_MASTER_LINK").unwrap_or_else(|_| {
                "https://raw.githubusercontent.com/OWNER/REPO/main/data/job_offers_master.csv"
                    .to_string()
            }),
            max_in_body: std::env::var("MAX_IN_BODY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            user_agent: std::env::var("AJOM_USER_AGENT")
                .unwrap_or_else(|_| "ajom-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("AJOM_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            delay: DelayRange {
                min_ms: std::env::var("AJOM_DELAY_MIN_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1_000),
                max_ms: std::env::var("AJOM_DELAY_MAX_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3_000),
            },
            template_path: std::env::var("AJOM_TEMPLATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("templates/notification_body.txt")),
            notification_path: std::env::var("AJOM_NOTIFICATION_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("email_body.txt")),
            workspace_root: PathBuf::from("."),
        }
    }
}

// --- key deriver --------------------------------------------------------

/// Stable deduplication identity of a record.
///
/// A record with a URL is identified by the trimmed, lower-cased URL;
/// one without falls back to a SHA-1 over the normalized
/// company/title/date triple.
pub fn derive_key(record: &Record) -> String {
    let url = record.job_url.trim().to_lowercase();
    if !url.is_empty() {
        return format!("url::{url}");
    }
    let fingerprint = format!(
        "{}|{}|{}",
        record.company.trim().to_lowercase(),
        record.job_title.trim().to_lowercase(),
        record.pub_date.trim()
    );
    format!("hash::{}", hex::encode(Sha1::digest(fingerprint.as_bytes())))
}

// --- merge/dedup engine -------------------------------------------------

/// Combine freshly scraped records with the persisted master set.
///
/// Returns the updated master and the "new today" subset. Master rows
/// keep their relative order; new rows are appended in scrape order. An
/// empty scrape is a no-op that hands the master back untouched.
pub fn merge(master: Vec<Record>, scraped: Vec<Record>) -> (Vec<Record>, Vec<Record>) {
    if scraped.is_empty() {
        return (master, Vec::new());
    }

    // Partition by dedup key: anything already known is discarded, the
    // rest is new today (first appearance wins within the run).
    let known: HashSet<String> = master.iter().map(derive_key).collect();
    let mut seen_this_run = HashSet::new();
    let mut new_today = Vec::new();
    for record in scraped {
        let key = derive_key(&record);
        if known.contains(&key) || !seen_this_run.insert(key) {
            continue;
        }
        new_today.push(record);
    }

    let mut updated = master;
    updated.extend(new_today.iter().cloned());

    // Second, coarser pass over the combined set: exact literal job_url
    // match, first occurrence kept. Authoritative for final
    // uniqueness-by-URL; the key partition above is authoritative only
    // for what counts as new.
    let mut seen_urls = HashSet::new();
    updated.retain(|record| seen_urls.insert(record.job_url.clone()));

    // Rewrite every pub_date to ISO; rows that do not parse keep an
    // empty marker instead of failing the merge. The today-fallback is
    // an extraction-time concern, not a merge concern.
    for record in &mut updated {
        record.pub_date = canonicalize_pub_date(&record.pub_date);
    }
    for record in &mut new_today {
        record.pub_date = canonicalize_pub_date(&record.pub_date);
    }

    (updated, new_today)
}

fn canonicalize_pub_date(raw: &str) -> String {
    try_parse_calendar_date(raw)
        .map(|date| date.to_string())
        .unwrap_or_default()
}

// --- candidate filter ---------------------------------------------------

/// Post-aggregation filter applied before merge: keep records whose
/// title is non-empty and contains one of the keywords
/// (case-insensitive) and whose URL is non-empty.
pub fn filter_candidates(records: Vec<Record>, keywords: &[String]) -> Vec<Record> {
    let needles: Vec<String> = keywords.iter().map(|kw| kw.to_lowercase()).collect();
    records
        .into_iter()
        .filter(Record::has_required_fields)
        .filter(|record| {
            let title = record.job_title.to_lowercase();
            needles.iter().any(|needle| title.contains(needle))
        })
        .collect()
}

// --- notification body --------------------------------------------------

pub const DEFAULT_TEMPLATE: &str = "Hello,\n\nnew job offers matching the monitored keywords:\n\n{{NEW_LIST}}\n\nFull master list: {{MASTER_LINK}}\n";

pub const EMPTY_DELTA_TEXT: &str = "No new offers today.";

/// Bulleted list of up to `max_in_body` postings, with a truncation
/// notice when more exist.
pub fn format_new_list(new_today: &[Record], max_in_body: usize) -> String {
    if new_today.is_empty() {
        return EMPTY_DELTA_TEXT.to_string();
    }
    let mut lines: Vec<String> = new_today
        .iter()
        .take(max_in_body)
        .map(|record| {
            format!(
                "- {} — {} — {} — {} — {}",
                record.job_title, record.company, record.source, record.pub_date, record.job_url
            )
        })
        .collect();
    if new_today.len() > max_in_body {
        lines.push(format!("... + {} more", new_today.len() - max_in_body));
    }
    lines.join("\n")
}

pub fn render_notification(template: &str, new_today: &[Record], config: &RunConfig) -> String {
    template
        .replace("{{NEW_LIST}}", &format_new_list(new_today, config.max_in_body))
        .replace("{{MASTER_LINK}}", &config.master_link)
}

// --- pipeline -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scraped: usize,
    pub new_today: usize,
    pub master_size: usize,
    pub delta_path: Option<PathBuf>,
}

pub struct Pipeline {
    config: RunConfig,
    store: MasterStore,
    http: HttpFetcher,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Result<Self> {
        let store = MasterStore::new(config.data_dir.clone());
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            delay: config.delay,
        })?;
        Ok(Self {
            config,
            store,
            http,
        })
    }

    /// One full run: load master, scrape every enabled source
    /// sequentially, filter, merge, persist, render the notification.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let run_date = started_at.date_naive();

        let registry = load_source_registry(&self.config.workspace_root)?;
        let master = self.store.load().await?;
        info!(%run_id, master_size = master.len(), "run started");

        let ctx = AdapterContext {
            run_id,
            today: run_date,
        };
        let mut scraped = Vec::new();
        for source in registry.sources.iter().filter(|s| s.enabled) {
            let Some(adapter) = adapter_for_source(&source.source_id) else {
                warn!(
                    source_id = source.source_id.as_str(),
                    "no adapter registered, skipping source"
                );
                continue;
            };
            let pages = match adapter
                .fetch_listing(&self.http, &ctx, &registry.keywords)
                .await
            {
                Ok(pages) => pages,
                Err(err) => {
                    warn!(
                        source_id = source.source_id.as_str(),
                        error = %err,
                        "source fetch failed, contributing no records"
                    );
                    continue;
                }
            };
            for page in &pages {
                match adapter.parse_listing(page, &ctx) {
                    Ok(mut records) => scraped.append(&mut records),
                    Err(err) => warn!(
                        source_id = source.source_id.as_str(),
                        url = page.url.as_str(),
                        error = %err,
                        "listing parse failed, skipping page"
                    ),
                }
            }
        }

        let scraped = filter_candidates(scraped, &registry.keywords);
        let scraped_count = scraped.len();

        let (updated, new_today) = merge(master, scraped);
        self.store.save(&updated).await?;
        let delta_path = self.store.save_delta(&new_today, run_date).await?;

        let template = self.load_template().await;
        let body = render_notification(&template, &new_today, &self.config);
        tokio::fs::write(&self.config.notification_path, body)
            .await
            .with_context(|| {
                format!(
                    "writing notification body {}",
                    self.config.notification_path.display()
                )
            })?;

        info!(
            scraped = scraped_count,
            new = new_today.len(),
            master = updated.len(),
            "run finished"
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            scraped: scraped_count,
            new_today: new_today.len(),
            master_size: updated.len(),
            delta_path,
        })
    }

    async fn load_template(&self) -> String {
        match tokio::fs::read_to_string(&self.config.template_path).await {
            Ok(text) => text,
            Err(err) => {
                debug!(
                    path = %self.config.template_path.display(),
                    error = %err,
                    "template not readable, using builtin"
                );
                DEFAULT_TEMPLATE.to_string()
            }
        }
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    let config = RunConfig::from_env();
    Pipeline::new(config)?.run_once().await
}
