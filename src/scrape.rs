//! HTML page scraping.
//!
//! A page is retrieved through the backoff loop in [`fetch_with_retry`], then
//! every item element is reduced to an [`Article`] using layered selectors:
//! a structural primary selector first, a generic fallback second.

use std::sync::Arc;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ConfigError, EntryDefect, FetchError};
use crate::model::{local_timestamp, truncate_chars, Article, SourceResult, SCRAPE_SUMMARY_LIMIT};
use crate::retry::RetryConfig;

/// Error text for a page that never returned a 2xx response.
pub const FETCH_FAILED: &str = "fetch failed";

/// Selector text for each article field, as configured.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScrapeRules {
    #[serde(default = "default_item")]
    pub item: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_title_fallback")]
    pub title_fallback: String,
    #[serde(default = "default_link")]
    pub link: String,
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default = "default_summary_fallback")]
    pub summary_fallback: String,
}

fn default_item() -> String {
    "article".to_string()
}

fn default_title() -> String {
    "h2.entry-title".to_string()
}

fn default_title_fallback() -> String {
    "h2, h3".to_string()
}

fn default_link() -> String {
    "a[href]".to_string()
}

fn default_summary() -> String {
    "div.entry-summary".to_string()
}

fn default_summary_fallback() -> String {
    "p".to_string()
}

impl Default for ScrapeRules {
    fn default() -> Self {
        Self {
            item: default_item(),
            title: default_title(),
            title_fallback: default_title_fallback(),
            link: default_link(),
            summary: default_summary(),
            summary_fallback: default_summary_fallback(),
        }
    }
}

impl ScrapeRules {
    pub fn compile(&self, source_id: &str) -> Result<CompiledRules, ConfigError> {
        let parse = |field: &'static str, text: &str| {
            Selector::parse(text).map_err(|_| ConfigError::InvalidSelector {
                source_id: source_id.to_string(),
                field,
                selector: text.to_string(),
            })
        };

        Ok(CompiledRules {
            item: parse("item", &self.item)?,
            title: parse("title", &self.title)?,
            title_fallback: parse("title_fallback", &self.title_fallback)?,
            link: parse("link", &self.link)?,
            summary: parse("summary", &self.summary)?,
            summary_fallback: parse("summary_fallback", &self.summary_fallback)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRules {
    item: Selector,
    title: Selector,
    title_fallback: Selector,
    link: Selector,
    summary: Selector,
    summary_fallback: Selector,
}

/// Scrapes one HTML page with retries.
#[derive(Debug, Clone)]
pub struct ScrapeFetch {
    pub url: Url,
    pub label: String,
    rules: CompiledRules,
    client: Client,
    retry: Arc<RetryConfig>,
}

impl ScrapeFetch {
    pub fn new(
        url: Url,
        label: impl Into<String>,
        rules: CompiledRules,
        client: Client,
        retry: Arc<RetryConfig>,
    ) -> Self {
        Self {
            url,
            label: label.into(),
            rules,
            client,
            retry,
        }
    }

    pub async fn fetch(&self, source_id: &str, limit: usize) -> SourceResult {
        info!("Scraping page: {} ({})", self.label, self.url);

        let body = match fetch_with_retry(&self.client, self.url.as_str(), &self.retry).await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to scrape '{}': {}", self.label, e);
                return SourceResult::failure(source_id, FETCH_FAILED);
            }
        };

        let articles = extract_articles(&body, &self.url, &self.rules, &self.label, limit);
        info!("Scraped {} articles from '{}'", articles.len(), self.label);
        SourceResult::success(source_id, articles)
    }
}

/// GET `url` up to `retry.max_retries` times, accepting only a 2xx body.
///
/// Attempt `n` is preceded by `retry.delay_for_attempt(n)`.
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    retry: &RetryConfig,
) -> Result<String, FetchError> {
    for attempt in 0..retry.max_retries {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            debug!("Waiting {:?} before attempt {} for {}", delay, attempt + 1, url);
            tokio::time::sleep(delay).await;
        }

        match fetch_once(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) => warn!("Attempt {} for {} failed: {}", attempt + 1, url, e),
        }
    }

    Err(FetchError::Exhausted(retry.max_retries))
}

async fn fetch_once(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(response.text().await?)
}

/// Parse a page into at most `limit` articles, skipping malformed items.
pub fn extract_articles(
    html: &str,
    page_url: &Url,
    rules: &CompiledRules,
    label: &str,
    limit: usize,
) -> Vec<Article> {
    let document = Html::parse_document(html);
    let scraped_at = local_timestamp();

    let mut articles = Vec::new();
    for element in document.select(&rules.item).take(limit) {
        match article_from_element(element, page_url, rules, label, &scraped_at) {
            Ok(article) => articles.push(article),
            Err(defect) => debug!("Skipping item on {}: {}", page_url, defect),
        }
    }
    articles
}

fn article_from_element(
    element: ElementRef<'_>,
    page_url: &Url,
    rules: &CompiledRules,
    label: &str,
    scraped_at: &str,
) -> Result<Article, EntryDefect> {
    let title_elem = first_match(element, &rules.title, &rules.title_fallback)
        .ok_or(EntryDefect::MissingTitle)?;

    let href = title_elem
        .select(&rules.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .ok_or(EntryDefect::MissingLink)?;

    let url = page_url
        .join(href)
        .map_err(|_| EntryDefect::InvalidLink(href.to_string()))?;

    let summary = first_match(element, &rules.summary, &rules.summary_fallback)
        .map(element_text)
        .unwrap_or_default();

    Ok(Article {
        title: element_text(title_elem),
        url: url.to_string(),
        summary: truncate_chars(&summary, SCRAPE_SUMMARY_LIMIT),
        published: None,
        scraped_at: Some(scraped_at.to_string()),
        source: label.to_string(),
        author: None,
    })
}

fn first_match<'a>(
    element: ElementRef<'a>,
    primary: &Selector,
    fallback: &Selector,
) -> Option<ElementRef<'a>> {
    element
        .select(primary)
        .next()
        .or_else(|| element.select(fallback).next())
}

/// Trimmed text fragments joined by single spaces.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KREBS_STYLE_PAGE: &str = r#"
        <html><body>
            <article>
                <h2 class="entry-title"><a href="https://krebsonsecurity.com/2024/12/one/">First Story</a></h2>
                <div class="entry-summary"><p>Summary of the first story.</p></div>
            </article>
            <article>
                <h3><a href="/2024/12/two/">Second Story</a></h3>
                <p>Fallback paragraph summary.</p>
            </article>
            <article>
                <h2 class="entry-title">Story Without Link</h2>
                <p>Should never surface.</p>
            </article>
            <article>
                <div>No heading at all</div>
            </article>
            <article>
                <h2 class="entry-title"><a href="/2024/12/five/">Fifth Story</a></h2>
            </article>
        </body></html>
    "#;

    fn page_url() -> Url {
        Url::parse("https://krebsonsecurity.com/").unwrap()
    }

    fn default_rules() -> CompiledRules {
        ScrapeRules::default().compile("test").unwrap()
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
        }
    }

    mod rules_tests {
        use super::*;

        #[test]
        fn test_default_rules_compile() {
            assert!(ScrapeRules::default().compile("krebs").is_ok());
        }

        #[test]
        fn test_invalid_selector_names_field() {
            let rules = ScrapeRules {
                summary: ":::".to_string(),
                ..ScrapeRules::default()
            };

            let err = rules.compile("krebs").unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidSelector {
                    source_id: "krebs".to_string(),
                    field: "summary",
                    selector: ":::".to_string(),
                }
            );
        }
    }

    mod extract_tests {
        use super::*;

        #[test]
        fn test_primary_selectors() {
            let articles =
                extract_articles(KREBS_STYLE_PAGE, &page_url(), &default_rules(), "Krebs", 10);

            let first = &articles[0];
            assert_eq!(first.title, "First Story");
            assert_eq!(first.url, "https://krebsonsecurity.com/2024/12/one/");
            assert_eq!(first.summary, "Summary of the first story.");
            assert_eq!(first.source, "Krebs");
            assert!(first.scraped_at.is_some());
            assert!(first.published.is_none());
        }

        #[test]
        fn test_fallback_selectors_and_relative_link() {
            let articles =
                extract_articles(KREBS_STYLE_PAGE, &page_url(), &default_rules(), "Krebs", 10);

            let second = &articles[1];
            assert_eq!(second.title, "Second Story");
            assert_eq!(second.url, "https://krebsonsecurity.com/2024/12/two/");
            assert_eq!(second.summary, "Fallback paragraph summary.");
        }

        #[test]
        fn test_items_without_link_or_title_are_skipped() {
            let articles =
                extract_articles(KREBS_STYLE_PAGE, &page_url(), &default_rules(), "Krebs", 10);

            let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
            assert_eq!(titles, vec!["First Story", "Second Story", "Fifth Story"]);
            assert!(articles.iter().all(|a| a.url != crate::model::MISSING));
        }

        #[test]
        fn test_missing_summary_is_empty() {
            let articles =
                extract_articles(KREBS_STYLE_PAGE, &page_url(), &default_rules(), "Krebs", 10);
            assert_eq!(articles[2].summary, "");
        }

        #[test]
        fn test_limit_applies_to_item_elements() {
            // The third and fourth items are dropped, so only two survive a limit of four.
            let articles =
                extract_articles(KREBS_STYLE_PAGE, &page_url(), &default_rules(), "Krebs", 4);
            assert_eq!(articles.len(), 2);
        }

        #[test]
        fn test_summary_truncated_to_300_chars() {
            let long = "x".repeat(1_000);
            let html = format!(
                r#"<article><h2 class="entry-title"><a href="/a">T</a></h2><p>{}</p></article>"#,
                long
            );

            let articles = extract_articles(&html, &page_url(), &default_rules(), "Krebs", 10);
            assert_eq!(articles[0].summary.chars().count(), 300);
        }

        #[test]
        fn test_title_is_not_truncated() {
            let long_title = "t".repeat(400);
            let html = format!(
                r#"<article><h2 class="entry-title"><a href="/a">{}</a></h2></article>"#,
                long_title
            );

            let articles = extract_articles(&html, &page_url(), &default_rules(), "Krebs", 10);
            assert_eq!(articles[0].title, long_title);
        }

        #[test]
        fn test_empty_href_is_missing_link() {
            let html = r#"<article><h2 class="entry-title"><a href="  ">T</a></h2></article>"#;
            let articles = extract_articles(html, &page_url(), &default_rules(), "Krebs", 10);
            assert!(articles.is_empty());
        }

        #[test]
        fn test_custom_rules() {
            let rules = ScrapeRules {
                item: "li.story".to_string(),
                title: "span.headline".to_string(),
                ..ScrapeRules::default()
            }
            .compile("custom")
            .unwrap();

            let html = r#"
                <ul>
                    <li class="story"><span class="headline"><a href="/x">Custom</a></span></li>
                    <li class="other"><h2><a href="/y">Ignored</a></h2></li>
                </ul>
            "#;

            let articles = extract_articles(html, &page_url(), &rules, "Custom", 10);
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].title, "Custom");
            assert_eq!(articles[0].url, "https://krebsonsecurity.com/x");
        }

        #[test]
        fn test_page_without_items() {
            let articles = extract_articles(
                "<html><body><p>nothing</p></body></html>",
                &page_url(),
                &default_rules(),
                "Krebs",
                10,
            );
            assert!(articles.is_empty());
        }
    }

    mod retry_loop_tests {
        use super::*;

        #[tokio::test]
        async fn test_success_on_first_attempt() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
                .expect(1)
                .mount(&server)
                .await;

            let body = fetch_with_retry(&Client::new(), &server.uri(), &fast_retry(3))
                .await
                .unwrap();
            assert_eq!(body, "<html></html>");
        }

        #[tokio::test]
        async fn test_recovers_after_server_errors() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(2)
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
                .expect(1)
                .mount(&server)
                .await;

            let body = fetch_with_retry(&Client::new(), &server.uri(), &fast_retry(3))
                .await
                .unwrap();
            assert_eq!(body, "ok");
        }

        #[tokio::test]
        async fn test_gives_up_after_max_retries() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .expect(3)
                .mount(&server)
                .await;

            let result = fetch_with_retry(&Client::new(), &server.uri(), &fast_retry(3)).await;
            assert!(matches!(result, Err(FetchError::Exhausted(3))));
        }

        #[tokio::test]
        async fn test_client_errors_count_as_failed_attempts() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .expect(2)
                .mount(&server)
                .await;

            let result = fetch_with_retry(&Client::new(), &server.uri(), &fast_retry(2)).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_waits_between_attempts() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;

            let retry = RetryConfig {
                max_retries: 3,
                base_delay_ms: 20,
                max_delay_ms: 1_000,
                backoff_factor: 2.0,
            };

            let started = std::time::Instant::now();
            let _ = fetch_with_retry(&Client::new(), &server.uri(), &retry).await;

            // 40ms before attempt 1, 80ms before attempt 2
            assert!(started.elapsed() >= Duration::from_millis(120));
        }
    }

    mod fetch_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_builds_success_result() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string(KREBS_STYLE_PAGE))
                .mount(&server)
                .await;

            let scrape = ScrapeFetch::new(
                Url::parse(&server.uri()).unwrap(),
                "Krebs on Security",
                default_rules(),
                Client::new(),
                Arc::new(fast_retry(3)),
            );

            let result = scrape.fetch("krebs_security", 10).await;
            assert!(result.is_success());
            assert_eq!(result.source_id(), "krebs_security");
            assert_eq!(result.articles().len(), 3);
        }

        #[tokio::test]
        async fn test_fetch_failure_is_error_result() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(502))
                .mount(&server)
                .await;

            let scrape = ScrapeFetch::new(
                Url::parse(&server.uri()).unwrap(),
                "Krebs on Security",
                default_rules(),
                Client::new(),
                Arc::new(fast_retry(2)),
            );

            let result = scrape.fetch("krebs_security", 10).await;
            assert!(!result.is_success());
            assert_eq!(result.error(), Some(FETCH_FAILED));
            assert!(result.articles().is_empty());
        }
    }
}
