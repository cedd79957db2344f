//! Core domain model for the job offer monitor.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ajom-core";

/// Canonical column set of every persisted tabular artifact, in order.
pub const CANONICAL_COLUMNS: [&str; 7] = [
    "company",
    "company_website",
    "industry",
    "job_title",
    "pub_date",
    "job_url",
    "source",
];

/// One observed job posting.
///
/// All fields are plain text; absent data is represented as an empty
/// string rather than an option, matching the persisted CSV shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Record {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub company_website: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub job_title: String,
    /// ISO-8601 calendar date (`YYYY-MM-DD`) once normalized.
    #[serde(default)]
    pub pub_date: String,
    /// Absolute URL of the posting. Required downstream of the
    /// candidate filter.
    #[serde(default)]
    pub job_url: String,
    /// Tag of the originating site, e.g. `pracuj.pl`.
    #[serde(default)]
    pub source: String,
}

impl Record {
    /// A record is only worth keeping when both the title and the URL
    /// carry content.
    pub fn has_required_fields(&self) -> bool {
        !self.job_title.trim().is_empty() && !self.job_url.trim().is_empty()
    }
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn squash_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
