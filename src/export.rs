//! CSV and JSON renderings of mentions and daily stats, served over HTTP and
//! written to `EXPORT_DIR` after each cycle.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::queries::{list_daily_stats, list_mentions, ExportFilter};
use crate::error::{AppError, Result};

/// Rows as CSV with a header line. No rows renders as an empty string.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// One JSON object per line.
pub fn to_json_lines<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub mentions: usize,
    pub daily_stats: usize,
    pub files: Vec<PathBuf>,
}

/// Full snapshot of both tables into `dir`, replacing earlier files.
pub async fn write_snapshot(pool: &SqlitePool, dir: &Path) -> Result<ExportSummary> {
    tokio::fs::create_dir_all(dir).await?;
    let all = ExportFilter::default();
    let mentions = list_mentions(pool, &all).await?;
    let stats = list_daily_stats(pool, &all).await?;

    let outputs = [
        ("mentions.csv", to_csv(&mentions)?),
        ("mentions.json", to_json_lines(&mentions)?),
        ("daily_stats.csv", to_csv(&stats)?),
        ("daily_stats.json", to_json_lines(&stats)?),
    ];
    let mut files = Vec::with_capacity(outputs.len());
    for (name, body) in outputs {
        let path = dir.join(name);
        tokio::fs::write(&path, body).await?;
        files.push(path);
    }

    info!(
        dir = %dir.display(),
        mentions = mentions.len(),
        daily_stats = stats.len(),
        "Export written"
    );
    Ok(ExportSummary {
        mentions: mentions.len(),
        daily_stats: stats.len(),
        files,
    })
}
