use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::export::ExportFormat;
use crate::fetcher::FetchSettings;
use crate::model::{normalize_source_key, title_case_label};
use crate::retry::RetryConfig;
use crate::scrape::ScrapeRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Articles requested per source
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub export_format: ExportFormat,
    /// Refresh interval in minutes; a single run when absent
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    pub sources: Vec<SourceConfig>,
}

fn default_limit() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_prefix() -> String {
    "news".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Feed and scrape sources
    #[default]
    Full,
    /// Feed sources only, for lower latency
    FeedOnly,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    Scrape,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: SourceKind,
    pub url: String,
    /// Feed used in place of the page when running feed-only
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub rules: ScrapeRules,
}

impl SourceConfig {
    /// Human-readable label attached to every article from this source.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| title_case_label(&self.id))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.refresh_interval == Some(0) {
            return Err(ConfigError::ZeroRefreshInterval);
        }
        let factor = self.retry.backoff_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ConfigError::InvalidBackoffFactor(factor.to_string()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(normalize_source_key(&source.id)) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }

            let urls = std::iter::once(&source.url).chain(source.feed_url.as_ref());
            for url in urls {
                Url::parse(url).map_err(|_| ConfigError::InvalidUrl(source.id.clone()))?;
            }

            if source.kind == SourceKind::Scrape {
                source.rules.compile(&source.id)?;
            }
        }

        Ok(())
    }

    /// Delay between scheduled runs, if any.
    pub fn refresh_period(&self) -> Option<Duration> {
        self.refresh_interval
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
