use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use news_harvest::config::Config;
use news_harvest::export::ExportOutcome;
use news_harvest::harvest::{HarvestOutcome, HarvestReport, Harvester};
use news_harvest::model::truncate_chars;
use news_harvest::orchestrator::ProgressEvent;

const DISPLAY_LIMIT: usize = 200;
const DISPLAY_TITLE_CHARS: usize = 80;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "news_harvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWS_HARVEST_CONFIG").unwrap_or_else(|_| "sources.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} sources from {}", config.sources.len(), config_path);

    let refresh_period = config.refresh_period();
    let harvester = Harvester::new(config);

    // Ctrl-C requests a stop; in-flight fetches still finish
    let stop = harvester.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested");
            stop.request_stop();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::SourceCompleted { source_key, result } => match result.error() {
                    None => println!("  done  {} ({} articles)", source_key, result.articles().len()),
                    Some(e) => println!("  fail  {} ({})", source_key, e),
                },
                ProgressEvent::BatchCompleted { sources, articles } => {
                    println!("Finished {} sources, {} articles", sources, articles);
                }
            }
        }
    });

    match refresh_period {
        Some(interval) => {
            harvester.run_periodic(interval, Some(&tx), print_report).await;
        }
        None => match harvester.run(Some(&tx)).await? {
            HarvestOutcome::Completed(report) => print_report(&report),
            HarvestOutcome::Stopped(Some(report)) => print_report(&report),
            HarvestOutcome::Stopped(None) => info!("Harvest stopped before dispatch"),
            HarvestOutcome::AlreadyRunning => {}
        },
    }

    drop(tx);
    if let Err(e) = progress.await {
        error!("Progress display task failed: {}", e);
    }

    Ok(())
}

fn print_report(report: &HarvestReport) {
    let shown = report.aggregate.capped(DISPLAY_LIMIT);
    println!();
    println!("{} articles collected", report.aggregate.total());
    for article in shown {
        println!(
            "[{}] {}\n    {}",
            article.source,
            truncate_chars(&article.title, DISPLAY_TITLE_CHARS),
            article.url
        );
    }
    if report.aggregate.total() > shown.len() {
        println!("... and {} more", report.aggregate.total() - shown.len());
    }

    match &report.export {
        ExportOutcome::NoData => println!("Nothing exported"),
        ExportOutcome::Skipped => println!("Export skipped after stop request"),
        ExportOutcome::Written { csv, json } => {
            for path in csv.iter().chain(json.iter()) {
                println!("Saved {}", path.display());
            }
        }
    }
}
