//! Source adapter contracts + per-site listing extractors.

use ajom_core::{squash_whitespace, Record};
use ajom_storage::{FetchError, HttpFetcher};
use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ajom-adapters";

pub const PRACUJ_SOURCE_ID: &str = "pracuj.pl";
pub const ROCKETJOBS_SOURCE_ID: &str = "rocketjobs.pl";
pub const INDEED_SOURCE_ID: &str = "pl.indeed.com";

/// One fetched listing page, ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// Per-run context handed to every adapter call.
#[derive(Debug, Clone, Copy)]
pub struct AdapterContext {
    pub run_id: Uuid,
    /// Current UTC date; relative and unparseable publication dates
    /// resolve against it.
    pub today: NaiveDate,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector: {0}")]
    Selector(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One implementation per monitored site.
///
/// Extraction failures stay local to a source: the default fetch loop
/// skips failed listing URLs, and the pipeline skips pages that fail to
/// parse. Nothing here can abort a run for the other sources.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// One search URL per keyword.
    fn listing_urls(&self, keywords: &[String]) -> Vec<String>;

    /// Fetch every listing URL. The default implementation skips (and
    /// logs) individual URLs that fail; a fully custom fetch may surface
    /// a source-level error instead.
    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        keywords: &[String],
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let mut pages = Vec::new();
        for url in self.listing_urls(keywords) {
            match http.fetch_text(ctx.run_id, self.source_id(), &url).await {
                Ok(body) => pages.push(FetchedPage { url, body }),
                Err(err) => warn!(
                    source_id = self.source_id(),
                    url = url.as_str(),
                    error = %err,
                    "listing fetch failed, skipping url"
                ),
            }
        }
        Ok(pages)
    }

    /// Turn one listing page into records. URLs are absolute and
    /// `pub_date` is already normalized on the way out.
    fn parse_listing(
        &self,
        page: &FetchedPage,
        ctx: &AdapterContext,
    ) -> Result<Vec<Record>, AdapterError>;
}

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        PRACUJ_SOURCE_ID => Some(Box::new(PracujAdapter)),
        ROCKETJOBS_SOURCE_ID => Some(Box::new(RocketJobsAdapter)),
        INDEED_SOURCE_ID => Some(Box::new(IndeedAdapter)),
        _ => None,
    }
}

pub fn all_source_ids() -> [&'static str; 3] {
    [PRACUJ_SOURCE_ID, ROCKETJOBS_SOURCE_ID, INDEED_SOURCE_ID]
}

// --- date normalization -------------------------------------------------

/// Parse a raw date string as an explicit calendar date.
///
/// Accepts ISO dates (a time suffix is tolerated and ignored) and
/// day-month-year forms separated by `.`, `-` or `/`; 2-digit years are
/// assumed in the 2000s. Relative terms are not resolved here.
pub fn try_parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    parse_day_month_year(raw)
}

fn parse_day_month_year(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.splitn(3, ['.', '-', '/']);
    let day = numeric_segment(parts.next()?, 2)?;
    let month = numeric_segment(parts.next()?, 2)?;
    // The year segment may carry trailing text ("2024 r."); take the
    // leading digits only.
    let year_digits: String = parts
        .next()?
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if !(2..=4).contains(&year_digits.len()) {
        return None;
    }
    let year: i32 = year_digits.parse().ok()?;
    let year = if year < 100 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn numeric_segment(segment: &str, max_len: usize) -> Option<u32> {
    let segment = segment.trim();
    if segment.is_empty()
        || segment.len() > max_len
        || !segment.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    segment.parse().ok()
}

/// Extraction-time normalizer: relative terms and unparseable input
/// resolve against `today`.
pub fn normalize_pub_date(raw: Option<&str>, today: NaiveDate) -> String {
    let raw = raw.unwrap_or_default().trim().to_lowercase();
    match raw.as_str() {
        "dzisiaj" | "today" => return today.to_string(),
        "wczoraj" | "yesterday" => return today.pred_opt().unwrap_or(today).to_string(),
        _ => {}
    }
    try_parse_calendar_date(&raw).unwrap_or(today).to_string()
}

// --- extraction helpers -------------------------------------------------

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector(e.to_string()))
}

fn element_text(el: ElementRef<'_>) -> String {
    squash_whitespace(&el.text().collect::<String>())
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn first_attr(scope: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve an href against the site base. Already-absolute hrefs pass
/// through untouched by the join.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|url| url.to_string())
}

fn encode_query(keyword: &str) -> String {
    url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect()
}

// --- pracuj.pl ----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PracujAdapter;

#[async_trait]
impl SourceAdapter for PracujAdapter {
    fn source_id(&self) -> &'static str {
        PRACUJ_SOURCE_ID
    }

    fn listing_urls(&self, keywords: &[String]) -> Vec<String> {
        keywords
            .iter()
            .map(|kw| format!("https://www.pracuj.pl/praca/{};kw?rd=0", encode_query(kw)))
            .collect()
    }

    fn parse_listing(
        &self,
        page: &FetchedPage,
        ctx: &AdapterContext,
    ) -> Result<Vec<Record>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let card_sel = selector("div[data-test='default-offer']")?;
        let title_sel = selector("[data-test='offer-title']")?;
        let link_sel = selector("a[href]")?;
        let company_sel = selector("[data-test='text-company-name']")?;
        let date_sel = selector("time, [data-test='text-added-time']")?;

        let mut records = Vec::new();
        for card in document.root_element().select(&card_sel) {
            let job_url = first_attr(card, &link_sel, "href")
                .and_then(|href| absolutize("https://www.pracuj.pl", &href))
                .unwrap_or_default();
            // Publication date sits in a <time datetime=..> tag or in a
            // plain "added" label.
            let raw_date = card.select(&date_sel).next().map(|el| {
                el.value()
                    .attr("datetime")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(el))
            });
            records.push(Record {
                company: first_text(card, &company_sel).unwrap_or_default(),
                job_title: first_text(card, &title_sel).unwrap_or_default(),
                pub_date: normalize_pub_date(raw_date.as_deref(), ctx.today),
                job_url,
                source: self.source_id().to_string(),
                ..Record::default()
            });
        }
        Ok(records)
    }
}

// --- rocketjobs.pl ------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RocketJobsAdapter;

#[async_trait]
impl SourceAdapter for RocketJobsAdapter {
    fn source_id(&self) -> &'static str {
        ROCKETJOBS_SOURCE_ID
    }

    fn listing_urls(&self, keywords: &[String]) -> Vec<String> {
        keywords
            .iter()
            .map(|kw| format!("https://rocketjobs.pl/s?q={}", encode_query(kw)))
            .collect()
    }

    fn parse_listing(
        &self,
        page: &FetchedPage,
        ctx: &AdapterContext,
    ) -> Result<Vec<Record>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let anchor_sel = selector("a[href*='/oferta/'], a[href*='/praca/']")?;
        let company_sel = selector("[data-testid='company-name']")?;

        let mut records = Vec::new();
        for anchor in document.root_element().select(&anchor_sel) {
            let job_url = anchor
                .value()
                .attr("href")
                .and_then(|href| absolutize("https://rocketjobs.pl", href))
                .unwrap_or_default();
            // The company name sits next to the anchor, not inside it.
            let company = anchor
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|parent| first_text(parent, &company_sel))
                .unwrap_or_default();
            records.push(Record {
                company,
                job_title: element_text(anchor),
                // Listings hide publication dates behind relative labels.
                pub_date: normalize_pub_date(None, ctx.today),
                job_url,
                source: self.source_id().to_string(),
                ..Record::default()
            });
        }
        Ok(records)
    }
}

// --- pl.indeed.com ------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct IndeedAdapter;

#[async_trait]
impl SourceAdapter for IndeedAdapter {
    fn source_id(&self) -> &'static str {
        INDEED_SOURCE_ID
    }

    fn listing_urls(&self, keywords: &[String]) -> Vec<String> {
        keywords
            .iter()
            .map(|kw| {
                format!(
                    "https://pl.indeed.com/jobs?q={}&l=Polska",
                    encode_query(kw)
                )
            })
            .collect()
    }

    fn parse_listing(
        &self,
        page: &FetchedPage,
        ctx: &AdapterContext,
    ) -> Result<Vec<Record>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let card_sel = selector("a.tapItem")?;
        let title_sel = selector("h2.jobTitle span")?;
        let company_sel = selector("span.companyName")?;
        let date_sel = selector("span.date, span.result-footer span")?;

        let mut records = Vec::new();
        for card in document.root_element().select(&card_sel) {
            let job_url = card
                .value()
                .attr("href")
                .and_then(|href| absolutize("https://pl.indeed.com", href))
                .unwrap_or_default();
            let raw_date = first_text(card, &date_sel);
            records.push(Record {
                company: first_text(card, &company_sel).unwrap_or_default(),
                job_title: first_text(card, &title_sel).unwrap_or_default(),
                pub_date: normalize_pub_date(raw_date.as_deref(), ctx.today),
                job_url,
                source: self.source_id().to_string(),
                ..Record::default()
            });
        }
        Ok(records)
    }
}
