use thiserror::Error;

/// Failure of a single network attempt or feed retrieval.
///
/// These never escape a fetcher; they are logged and folded into an
/// error-status [`SourceResult`](crate::model::SourceResult).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("no successful response after {0} attempts")]
    Exhausted(u32),

    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("feed could not be parsed: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A single malformed entry inside an otherwise usable document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryDefect {
    #[error("entry has no title element")]
    MissingTitle,

    #[error("entry has no link")]
    MissingLink,

    #[error("entry link {0:?} is not a valid URL")]
    InvalidLink(String),
}

/// Reasons a batch cannot be dispatched at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("no sources to fetch")]
    EmptyBatch,

    #[error("source {0} requested a limit of zero articles")]
    ZeroLimit(String),

    #[error("sources {first} and {second} both map to key {key}")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("limit must be greater than zero")]
    ZeroLimit,

    #[error("retry.max_retries must be at least 1")]
    NoAttempts,

    #[error("refresh_interval must be at least one minute")]
    ZeroRefreshInterval,

    #[error("retry.backoff_factor must be a positive number, got {0}")]
    InvalidBackoffFactor(String),

    #[error("source id {0:?} is used more than once")]
    DuplicateSource(String),

    #[error("source {source_id}: invalid {field} selector {selector:?}")]
    InvalidSelector {
        source_id: String,
        field: &'static str,
        selector: String,
    },

    #[error("source {0}: url is not a valid absolute URL")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}
