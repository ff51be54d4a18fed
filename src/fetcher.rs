use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::Client;
use tokio::task::{JoinError, JoinHandle};
use tracing::error;

use crate::error::FetchError;
use crate::feed::FeedFetch;
use crate::model::SourceResult;
use crate::scrape::ScrapeFetch;

/// Desktop browser agents used when no user agent is configured.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub user_agent: Option<String>,
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchSettings {
    /// The configured agent, or a random entry from [`USER_AGENTS`].
    pub fn pick_user_agent(&self) -> String {
        match &self.user_agent {
            Some(agent) => agent.clone(),
            None => USER_AGENTS
                .choose(&mut rand::rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
        }
    }

    /// Async client shared by every scrape fetcher in one batch.
    pub fn build_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(self.pick_user_agent())
            .build()
    }
}

/// One unit of fetch work for a configured source.
#[derive(Debug, Clone)]
pub enum SourceFetcher {
    Feed(FeedFetch),
    Scrape(ScrapeFetch),
}

impl SourceFetcher {
    /// Start the fetch on the runtime.
    ///
    /// Feeds go to the blocking pool, scrapes run as async tasks. Must be
    /// called from within a Tokio runtime.
    pub fn spawn(self, source_id: String, limit: usize) -> JoinHandle<SourceResult> {
        match self {
            SourceFetcher::Feed(feed) => {
                tokio::task::spawn_blocking(move || feed.fetch_blocking(&source_id, limit))
            }
            SourceFetcher::Scrape(scrape) => {
                tokio::spawn(async move { scrape.fetch(&source_id, limit).await })
            }
        }
    }

    /// Fetch one source. Never fails: every problem becomes an error result.
    pub async fn fetch(self, source_id: &str, limit: usize) -> SourceResult {
        settle(source_id, self.spawn(source_id.to_string(), limit).await)
    }
}

/// Turn a joined fetch task into its source result.
///
/// A task that panicked or was cancelled becomes an error result.
pub fn settle(source_id: &str, joined: Result<SourceResult, JoinError>) -> SourceResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            let e = FetchError::Task(e);
            error!("Fetch task for '{}' did not complete: {}", source_id, e);
            SourceResult::failure(source_id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use crate::scrape::{ScrapeRules, FETCH_FAILED};
    use std::sync::Arc;
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_default_settings() {
        let settings = FetchSettings::default();
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(settings.user_agent.is_none());
    }

    #[test]
    fn test_configured_user_agent_wins() {
        let settings = FetchSettings {
            user_agent: Some("custom/1.0".to_string()),
            ..FetchSettings::default()
        };
        assert_eq!(settings.pick_user_agent(), "custom/1.0");
    }

    #[test]
    fn test_random_user_agent_from_list() {
        let settings = FetchSettings::default();
        for _ in 0..10 {
            let agent = settings.pick_user_agent();
            assert!(USER_AGENTS.contains(&agent.as_str()));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_feed_variant_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss version="2.0"><channel><title>T</title>
                    <item><title>One</title><link>https://e.com/1</link></item>
                </channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::Feed(FeedFetch::new(
            Url::parse(&server.uri()).unwrap(),
            "Feed",
            "test",
            Duration::from_secs(5),
        ));

        let result = fetcher.fetch("feed", 5).await;
        assert!(result.is_success());
        assert_eq!(result.articles()[0].title, "One");
    }

    #[tokio::test]
    async fn test_panicked_task_becomes_error_result() {
        let handle: JoinHandle<SourceResult> = tokio::spawn(async { panic!("parser exploded") });
        let result = settle("exploding", handle.await);

        assert!(!result.is_success());
        assert_eq!(result.source_id(), "exploding");
        assert!(result.articles().is_empty());
        assert!(result.error().unwrap().starts_with("fetch task failed"));
    }

    #[tokio::test]
    async fn test_finished_task_passes_through() {
        let joined = tokio::spawn(async { SourceResult::success("quiet", Vec::new()) }).await;
        assert_eq!(settle("quiet", joined), SourceResult::success("quiet", Vec::new()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scrape_variant_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::Scrape(ScrapeFetch::new(
            Url::parse(&server.uri()).unwrap(),
            "Page",
            ScrapeRules::default().compile("page").unwrap(),
            Client::new(),
            Arc::new(RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
                backoff_factor: 2.0,
            }),
        ));

        let result = fetcher.fetch("page", 5).await;
        assert_eq!(result.error(), Some(FETCH_FAILED));
    }
}
