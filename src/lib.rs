//! News Harvest - concurrent news collection
//!
//! This crate fetches articles from a configured set of RSS/Atom feeds and
//! scraped HTML pages in parallel, retries flaky pages with exponential
//! backoff, flattens the results and exports them as CSV and JSON.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod export;
pub mod feed;
pub mod fetcher;
pub mod harvest;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod scrape;
