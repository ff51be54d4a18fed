use chrono::Local;
use serde::Serialize;

/// Placeholder for fields a feed entry does not supply.
pub const MISSING: &str = "N/A";

pub const FEED_TITLE_LIMIT: usize = 100;
pub const FEED_SUMMARY_LIMIT: usize = 250;
pub const SCRAPE_SUMMARY_LIMIT: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Error,
}

/// Outcome of fetching one configured source.
///
/// Only constructible through [`SourceResult::success`] and
/// [`SourceResult::failure`], so an error result never carries articles and a
/// successful one never carries an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceResult {
    source_id: String,
    articles: Vec<Article>,
    status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SourceResult {
    pub fn success(source_id: impl Into<String>, articles: Vec<Article>) -> Self {
        Self {
            source_id: source_id.into(),
            articles,
            status: FetchStatus::Success,
            error: None,
        }
    }

    pub fn failure(source_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            articles: Vec::new(),
            status: FetchStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

/// Map key for a source label: lowercase with spaces replaced by underscores.
pub fn normalize_source_key(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

/// `dark_reading` -> `Dark Reading`
pub fn title_case_label(source_id: &str) -> String {
    source_id
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Current local time as `YYYY-MM-DD HH:MM`.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}
