//! Ingestion boundary: adapters that deliver raw posts and comments.
//! Retry and backoff live here and nowhere else in the pipeline.

pub mod file;
pub mod reddit;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{Config, FeedMode};
use crate::error::{AppError, Result};
use crate::types::{FeedBatch, Redditor};

pub use file::FileFeed;
pub use reddit::RedditFeed;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchStats {
    /// Upstream requests issued, including failed ones.
    pub api_calls: u64,
    /// Records dropped for missing required fields.
    pub skipped_records: u64,
    /// Sub-requests that failed without failing the whole fetch.
    pub failed_requests: u64,
    pub attempts: u32,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, stats: &mut FetchStats) -> Result<FeedBatch>;

    /// Profile details for the named authors. Sources without profile data
    /// return nothing and the authors stay unenriched.
    async fn lookup_redditors(
        &self,
        _names: &[String],
        _stats: &mut FetchStats,
    ) -> Result<Vec<Redditor>> {
        Ok(Vec::new())
    }
}

pub fn from_config(cfg: &Config) -> Result<Box<dyn FeedSource>> {
    match cfg.feed_mode {
        FeedMode::Reddit => Ok(Box::new(RedditFeed::new(cfg)?)),
        FeedMode::File => {
            let path = cfg
                .feed_file
                .clone()
                .ok_or_else(|| AppError::Config("FEED_MODE=file requires FEED_FILE".to_string()))?;
            Ok(Box::new(FileFeed::new(path)))
        }
    }
}

/// Calls `source.fetch` until it succeeds, fails permanently, or the backoff
/// schedule runs out. One attempt per schedule entry plus the first.
pub async fn fetch_with_retry(
    source: &dyn FeedSource,
    backoff_ms: &[u64],
    stats: &mut FetchStats,
) -> Result<FeedBatch> {
    let mut delays = backoff_ms.iter();
    loop {
        stats.attempts += 1;
        match source.fetch(stats).await {
            Ok(batch) => return Ok(batch),
            Err(e) if e.is_transient_fetch() => match delays.next() {
                Some(&delay) => {
                    warn!(
                        feed = source.name(),
                        attempt = stats.attempts,
                        "Fetch failed, retrying in {delay}ms: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
