use crate::model::{Article, FetchStatus};
use crate::orchestrator::AggregatedRun;

/// Per-source reporting row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub key: String,
    pub status: FetchStatus,
    pub count: usize,
    pub error: Option<String>,
}

/// Flattened view over a finished run.
///
/// Articles from successful sources are concatenated in run order. Error
/// results contribute nothing but still appear in the summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    articles: Vec<Article>,
    summaries: Vec<SourceSummary>,
}

impl Aggregate {
    pub fn from_run(run: &AggregatedRun) -> Self {
        let mut articles = Vec::new();
        let mut summaries = Vec::with_capacity(run.len());

        for (key, result) in run.iter() {
            if result.is_success() {
                articles.extend_from_slice(result.articles());
            }
            summaries.push(SourceSummary {
                key: key.to_string(),
                status: result.status(),
                count: if result.is_success() {
                    result.articles().len()
                } else {
                    0
                },
                error: result.error().map(str::to_string),
            });
        }

        Self {
            articles,
            summaries,
        }
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn total(&self) -> usize {
        self.articles.len()
    }

    /// At most `n` articles from the front, for display.
    pub fn capped(&self, n: usize) -> &[Article] {
        &self.articles[..n.min(self.articles.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn source_summaries(&self) -> &[SourceSummary] {
        &self.summaries
    }
}
