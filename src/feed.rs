use std::time::Duration;

use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{EntryDefect, FetchError};
use crate::model::{
    local_timestamp, truncate_chars, Article, SourceResult, FEED_SUMMARY_LIMIT, FEED_TITLE_LIMIT,
    MISSING,
};

/// Single-shot syndication feed retrieval.
///
/// Everything here blocks the calling thread; the orchestrator runs it on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct FeedFetch {
    pub url: Url,
    pub label: String,
    user_agent: String,
    timeout: Duration,
}

impl FeedFetch {
    pub fn new(url: Url, label: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url,
            label: label.into(),
            user_agent: user_agent.into(),
            timeout,
        }
    }

    pub fn fetch_blocking(&self, source_id: &str, limit: usize) -> SourceResult {
        info!("Fetching feed: {} ({})", self.label, self.url);

        match self.retrieve() {
            Ok(feed) => {
                let articles = articles_from_feed(&feed, &self.url, &self.label, limit);
                info!("Parsed {} articles from feed '{}'", articles.len(), self.label);
                SourceResult::success(source_id, articles)
            }
            Err(e) => {
                error!("Failed to fetch feed '{}': {}", self.label, e);
                SourceResult::failure(source_id, e.to_string())
            }
        }
    }

    fn retrieve(&self) -> Result<Feed, FetchError> {
        // Built per call so the client never outlives the blocking thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| FetchError::FeedUnavailable(e.to_string()))?;

        let response = client
            .get(self.url.as_str())
            .send()
            .map_err(|e| FetchError::FeedUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::FeedUnavailable(format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::FeedUnavailable(e.to_string()))?;

        Ok(parser::parse(&bytes[..])?)
    }
}

/// Convert the first `limit` entries, skipping any that cannot be used.
pub fn articles_from_feed(feed: &Feed, feed_url: &Url, label: &str, limit: usize) -> Vec<Article> {
    feed.entries
        .iter()
        .take(limit)
        .filter_map(|entry| match article_from_entry(entry, feed_url, label) {
            Ok(article) => Some(article),
            Err(defect) => {
                debug!("Skipping entry '{}' in {}: {}", entry.id, label, defect);
                None
            }
        })
        .collect()
}

pub fn article_from_entry(entry: &Entry, feed_url: &Url, label: &str) -> Result<Article, EntryDefect> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_else(|| MISSING.to_string());

    let url = match entry.links.first().map(|l| l.href.trim()) {
        Some(href) if !href.is_empty() => resolve_link(href, feed_url)?,
        _ => MISSING.to_string(),
    };

    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .unwrap_or_default();

    let published = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(local_timestamp);

    let author = entry
        .authors
        .first()
        .map(|person| person.name.trim().to_string())
        .filter(|name| !name.is_empty());

    Ok(Article {
        title: truncate_chars(&title, FEED_TITLE_LIMIT),
        url,
        summary: truncate_chars(&summary, FEED_SUMMARY_LIMIT),
        published: Some(published),
        scraped_at: None,
        source: label.to_string(),
        author,
    })
}

fn resolve_link(href: &str, feed_url: &Url) -> Result<String, EntryDefect> {
    Url::parse(href)
        .or_else(|_| feed_url.join(href))
        .map(|url| url.to_string())
        .map_err(|_| EntryDefect::InvalidLink(href.to_string()))
}
