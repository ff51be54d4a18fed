use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::ExportError;
use crate::model::Article;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    #[default]
    Both,
}

impl ExportFormat {
    fn wants_csv(self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::Both)
    }

    fn wants_json(self) -> bool {
        matches!(self, ExportFormat::Json | ExportFormat::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Nothing to write; no files were created.
    NoData,
    /// Export was not attempted because a stop was requested.
    Skipped,
    Written {
        csv: Option<PathBuf>,
        json: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ExportMetadata {
    scraped_at: String,
    total_articles: usize,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    metadata: ExportMetadata,
    articles: &'a [Article],
}

/// Writes article snapshots to timestamped files.
#[derive(Debug, Clone)]
pub struct Exporter {
    output_dir: PathBuf,
    prefix: String,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn export(&self, articles: &[Article], format: ExportFormat) -> Result<ExportOutcome, ExportError> {
        self.export_at(articles, format, Local::now())
    }

    /// Export using `now` for file names and metadata.
    pub fn export_at(
        &self,
        articles: &[Article],
        format: ExportFormat,
        now: DateTime<Local>,
    ) -> Result<ExportOutcome, ExportError> {
        if articles.is_empty() {
            warn!("No articles to export");
            return Ok(ExportOutcome::NoData);
        }

        fs::create_dir_all(&self.output_dir)?;
        let stem = format!("{}_{}", self.prefix, now.format("%Y%m%d_%H%M%S"));

        let csv = if format.wants_csv() {
            let path = self.output_dir.join(format!("{}.csv", stem));
            write_csv(&path, articles)?;
            info!("Saved {} articles to {}", articles.len(), path.display());
            Some(path)
        } else {
            None
        };

        let json = if format.wants_json() {
            let path = self.output_dir.join(format!("{}.json", stem));
            write_json(&path, articles, now)?;
            info!("Saved {} articles to {}", articles.len(), path.display());
            Some(path)
        } else {
            None
        };

        Ok(ExportOutcome::Written { csv, json })
    }
}

fn write_csv(path: &Path, articles: &[Article]) -> Result<(), ExportError> {
    let rows = articles
        .iter()
        .map(|article| match serde_json::to_value(article)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()?;

    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&columns)?;
    for row in &rows {
        writer.write_record(columns.iter().map(|column| cell(row.get(*column))))?;
    }
    writer.flush()?;
    Ok(())
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn write_json(path: &Path, articles: &[Article], now: DateTime<Local>) -> Result<(), ExportError> {
    let document = ExportDocument {
        metadata: ExportMetadata {
            scraped_at: now.to_rfc3339(),
            total_articles: articles.len(),
        },
        articles,
    };
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}
