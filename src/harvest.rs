use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};
use url::Url;

use crate::aggregate::Aggregate;
use crate::config::{Config, Mode, SourceConfig, SourceKind};
use crate::error::ConfigError;
use crate::export::{ExportOutcome, Exporter};
use crate::feed::FeedFetch;
use crate::fetcher::SourceFetcher;
use crate::model::normalize_source_key;
use crate::orchestrator::{run_batch, AggregatedRun, ProgressEvent, SourceDescriptor};
use crate::retry::RetryConfig;
use crate::scrape::ScrapeFetch;

/// Cooperative stop signal shared between the harvester and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub run: AggregatedRun,
    pub aggregate: Aggregate,
    pub export: ExportOutcome,
}

#[derive(Debug, Clone)]
pub enum HarvestOutcome {
    Completed(HarvestReport),
    /// A stop was requested. Carries the finished batch when the stop arrived
    /// after dispatch; its export is [`ExportOutcome::Skipped`].
    Stopped(Option<HarvestReport>),
    /// Another run on this harvester was still in progress.
    AlreadyRunning,
}

pub struct Harvester {
    config: Arc<Config>,
    running: Arc<RwLock<bool>>,
    stop: StopHandle,
}

impl Harvester {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            running: Arc::new(RwLock::new(false)),
            stop: StopHandle::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Build one descriptor per enabled source for the configured mode.
    ///
    /// In `feed_only` mode scrape sources use their `feed_url` when they have
    /// one and are left out otherwise.
    pub fn descriptors(&self) -> anyhow::Result<Vec<SourceDescriptor>> {
        let settings = self.config.fetch_settings();
        let client = settings.build_client()?;
        let retry = Arc::new(self.config.retry.clone());
        let limit = self.config.limit;

        let mut descriptors = Vec::with_capacity(self.config.sources.len());
        for source in &self.config.sources {
            let label = source.label();
            let fetcher = match (source.kind, self.config.mode) {
                (SourceKind::Feed, _) => SourceFetcher::Feed(FeedFetch::new(
                    parse_url(source, &source.url)?,
                    label,
                    settings.pick_user_agent(),
                    settings.timeout,
                )),
                (SourceKind::Scrape, Mode::Full) => SourceFetcher::Scrape(scrape_fetch(
                    source,
                    label,
                    client.clone(),
                    retry.clone(),
                )?),
                (SourceKind::Scrape, Mode::FeedOnly) => match &source.feed_url {
                    Some(feed_url) => SourceFetcher::Feed(FeedFetch::new(
                        parse_url(source, feed_url)?,
                        label,
                        settings.pick_user_agent(),
                        settings.timeout,
                    )),
                    None => {
                        info!("Skipping '{}' in feed-only mode: no feed_url", source.id);
                        continue;
                    }
                },
            };

            descriptors.push(SourceDescriptor::new(source.id.clone(), fetcher, limit));
        }

        Ok(descriptors)
    }

    /// Run one full harvest: fetch, aggregate, export.
    pub async fn run(
        &self,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> anyhow::Result<HarvestOutcome> {
        // Check if already running
        {
            let mut running = self.running.write().await;
            if *running {
                info!("Harvest already in progress, skipping");
                return Ok(HarvestOutcome::AlreadyRunning);
            }
            *running = true;
        }

        let result = self.do_run(progress).await;

        // Clear running flag
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        result
    }

    async fn do_run(
        &self,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> anyhow::Result<HarvestOutcome> {
        if self.stop.is_stop_requested() {
            info!("Stop requested, not starting harvest");
            return Ok(HarvestOutcome::Stopped(None));
        }

        let descriptors = self.descriptors()?;
        info!(
            "Harvesting {} sources ({:?} mode, limit {})",
            descriptors.len(),
            self.config.mode,
            self.config.limit
        );

        let run = run_batch(descriptors, progress).await?;
        let aggregate = Aggregate::from_run(&run);
        self.log_outcomes(&aggregate);

        if self.stop.is_stop_requested() {
            info!("Stop requested, skipping export");
            return Ok(HarvestOutcome::Stopped(Some(HarvestReport {
                run,
                aggregate,
                export: ExportOutcome::Skipped,
            })));
        }

        let export = if aggregate.is_empty() {
            warn!("No articles fetched from any source, export skipped");
            ExportOutcome::NoData
        } else {
            info!("Total articles collected: {}", aggregate.total());
            let exporter = Exporter::new(&self.config.output_dir, &self.config.file_prefix);
            exporter.export(aggregate.articles(), self.config.export_format)?
        };

        Ok(HarvestOutcome::Completed(HarvestReport {
            run,
            aggregate,
            export,
        }))
    }

    fn log_outcomes(&self, aggregate: &Aggregate) {
        let labels: HashMap<String, String> = self
            .config
            .sources
            .iter()
            .map(|source| (normalize_source_key(&source.id), source.label()))
            .collect();

        for summary in aggregate.source_summaries() {
            let label = labels.get(&summary.key).unwrap_or(&summary.key);
            match &summary.error {
                None => info!("{}: {} articles", label, summary.count),
                Some(e) => error!("{}: {}", label, e),
            }
        }
    }

    /// Harvest now, then again every `interval` until a stop is requested.
    ///
    /// Each completed report is handed to `on_report`. Failed runs are logged
    /// and the schedule continues.
    pub async fn run_periodic<F>(
        &self,
        interval: Duration,
        progress: Option<&UnboundedSender<ProgressEvent>>,
        mut on_report: F,
    ) where
        F: FnMut(&HarvestReport),
    {
        info!("Starting initial harvest");
        loop {
            match self.run(progress).await {
                Ok(HarvestOutcome::Completed(report)) => on_report(&report),
                Ok(HarvestOutcome::Stopped(report)) => {
                    if let Some(report) = report {
                        on_report(&report);
                    }
                    break;
                }
                Ok(HarvestOutcome::AlreadyRunning) => {}
                Err(e) => error!("Scheduled harvest failed: {:#}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    info!("Starting scheduled harvest");
                }
                _ = self.stop.stopped() => break,
            }
        }
        info!("Harvest schedule stopped");
    }
}

fn parse_url(source: &SourceConfig, url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|_| ConfigError::InvalidUrl(source.id.clone()))
}

fn scrape_fetch(
    source: &SourceConfig,
    label: String,
    client: reqwest::Client,
    retry: Arc<RetryConfig>,
) -> Result<ScrapeFetch, ConfigError> {
    Ok(ScrapeFetch::new(
        parse_url(source, &source.url)?,
        label,
        source.rules.compile(&source.id)?,
        client,
        retry,
    ))
}
