//! Concurrent batch execution.
//!
//! Every descriptor in a batch is started at once: scrape fetchers as async
//! tasks, feed fetchers on the blocking pool. A single barrier waits for all
//! of them. A fetcher that panics is reported as an error result for its own
//! source and never disturbs the rest of the batch.

use std::collections::HashMap;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::error::OrchestratorError;
use crate::fetcher::SourceFetcher;
use crate::model::{normalize_source_key, SourceResult};

#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub fetcher: SourceFetcher,
    pub limit: usize,
}

impl SourceDescriptor {
    pub fn new(source_id: impl Into<String>, fetcher: SourceFetcher, limit: usize) -> Self {
        Self {
            source_id: source_id.into(),
            fetcher,
            limit,
        }
    }
}

/// Events emitted while a batch runs.
///
/// Exactly one `SourceCompleted` per descriptor, in completion order, then a
/// single `BatchCompleted`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SourceCompleted {
        source_key: String,
        result: SourceResult,
    },
    BatchCompleted {
        sources: usize,
        articles: usize,
    },
}

/// Results of one batch, keyed by normalized source key.
///
/// Iterates in the order the descriptors were submitted, whatever order the
/// fetchers finished in.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRun {
    entries: Vec<(String, SourceResult)>,
}

impl AggregatedRun {
    pub(crate) fn from_entries(entries: Vec<(String, SourceResult)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&SourceResult> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceResult)> {
        self.entries
            .iter()
            .map(|(key, result)| (key.as_str(), result))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
}

/// Check a batch before anything is dispatched, returning each descriptor's key.
pub fn validate_batch(descriptors: &[SourceDescriptor]) -> Result<Vec<String>, OrchestratorError> {
    if descriptors.is_empty() {
        return Err(OrchestratorError::EmptyBatch);
    }

    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut keys = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if descriptor.limit == 0 {
            return Err(OrchestratorError::ZeroLimit(descriptor.source_id.clone()));
        }

        let key = normalize_source_key(&descriptor.source_id);
        if let Some(first) = seen.insert(key.clone(), &descriptor.source_id) {
            return Err(OrchestratorError::DuplicateKey {
                key,
                first: first.to_string(),
                second: descriptor.source_id.clone(),
            });
        }
        keys.push(key);
    }

    Ok(keys)
}

/// Run every descriptor concurrently and wait for all of them.
///
/// Fails only when the batch itself is invalid; individual source failures
/// are carried inside the returned run.
pub async fn run_batch(
    descriptors: Vec<SourceDescriptor>,
    progress: Option<&UnboundedSender<ProgressEvent>>,
) -> Result<AggregatedRun, OrchestratorError> {
    let keys = validate_batch(&descriptors)?;
    info!("Dispatching {} sources", descriptors.len());

    let tasks: Vec<_> = descriptors
        .into_iter()
        .zip(keys)
        .map(|(descriptor, key)| {
            let SourceDescriptor {
                source_id,
                fetcher,
                limit,
            } = descriptor;
            (key, async move { fetcher.fetch(&source_id, limit).await })
        })
        .collect();

    Ok(join_batch(tasks, progress).await)
}

/// Wait for every keyed task, reporting each as it finishes.
async fn join_batch<F>(
    tasks: Vec<(String, F)>,
    progress: Option<&UnboundedSender<ProgressEvent>>,
) -> AggregatedRun
where
    F: Future<Output = SourceResult>,
{
    let total = tasks.len();
    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, (key, task))| async move { (index, key, task.await) })
        .collect();

    let mut slots: Vec<Option<(String, SourceResult)>> = vec![None; total];
    while let Some((index, key, result)) = pending.next().await {
        info!(
            "Source '{}' finished: {:?} with {} articles",
            key,
            result.status(),
            result.articles().len()
        );

        if let Some(tx) = progress {
            // A vanished receiver must not affect the batch.
            let _ = tx.send(ProgressEvent::SourceCompleted {
                source_key: key.clone(),
                result: result.clone(),
            });
        }

        slots[index] = Some((key, result));
    }

    let run = AggregatedRun::from_entries(slots.into_iter().flatten().collect());
    let articles = run
        .iter()
        .filter(|(_, result)| result.is_success())
        .map(|(_, result)| result.articles().len())
        .sum();

    info!(
        "Batch complete: {}/{} sources succeeded, {} articles",
        run.success_count(),
        run.len(),
        articles
    );

    if let Some(tx) = progress {
        let _ = tx.send(ProgressEvent::BatchCompleted {
            sources: run.len(),
            articles,
        });
    }

    run
}
