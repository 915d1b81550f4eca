use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::feed::{FeedSource, FetchStats};
use crate::types::{FeedBatch, Subreddit};

/// Replays a JSON batch file of the shape
/// `{"subreddit": {...}, "posts": [...], "comments": [...], "redditors": [...]}`.
/// Re-reading the file each cycle lets an external tool append to it.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FeedSource for FileFeed {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, stats: &mut FetchStats) -> Result<FeedBatch> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let batch = parse_batch(&raw, stats)?;
        info!(
            path = %self.path.display(),
            posts = batch.posts.len(),
            comments = batch.comments.len(),
            skipped = stats.skipped_records,
            "Feed file loaded"
        );
        Ok(batch)
    }
}

/// Parses a batch record by record; a malformed record is skipped, a
/// malformed document is an error.
pub fn parse_batch(raw: &str, stats: &mut FetchStats) -> Result<FeedBatch> {
    let doc: Value = serde_json::from_str(raw)?;
    if !doc.is_object() {
        return Err(AppError::Feed("feed file must contain a JSON object".to_string()));
    }
    let subreddit = match doc.get("subreddit") {
        None | Some(Value::Null) => None,
        Some(v) => match serde_json::from_value::<Subreddit>(v.clone()) {
            Ok(sr) => Some(sr),
            Err(e) => {
                warn!("Skipping malformed subreddit record: {e}");
                stats.skipped_records += 1;
                None
            }
        },
    };
    Ok(FeedBatch {
        subreddit,
        posts: records(&doc, "posts", stats),
        comments: records(&doc, "comments", stats),
        redditors: records(&doc, "redditors", stats),
    })
}

fn records<T: DeserializeOwned>(doc: &Value, key: &str, stats: &mut FetchStats) -> Vec<T> {
    let Some(items) = doc.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping {key}[{i}]: {e}");
                stats.skipped_records += 1;
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BATCH: &str = r#"{
        "subreddit": {"id": "wallstreetbets", "title": "WSB"},
        "posts": [
            {"id": "p1", "subreddit_id": "wallstreetbets", "author": "dfv", "title": "$GME", "created_utc": 1792108800},
            {"id": "p2", "title": "missing subreddit and time"}
        ],
        "comments": [
            {"id": "c1", "post_id": "p1", "body": "AMC too", "created_utc": 1792108900}
        ]
    }"#;

    #[test]
    fn skips_malformed_records_only() {
        let mut stats = FetchStats::default();
        let batch = parse_batch(BATCH, &mut stats).unwrap();
        assert_eq!(batch.posts.len(), 1);
        assert_eq!(batch.comments.len(), 1);
        assert!(batch.redditors.is_empty());
        assert_eq!(stats.skipped_records, 1);
        assert_eq!(batch.subreddit.unwrap().id, "wallstreetbets");
    }

    #[test]
    fn non_object_document_is_an_error() {
        let mut stats = FetchStats::default();
        assert!(parse_batch("[1, 2]", &mut stats).is_err());
        assert!(parse_batch("{not json", &mut stats).is_err());
    }

    #[tokio::test]
    async fn reads_batch_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BATCH.as_bytes()).unwrap();
        let feed = FileFeed::new(file.path().to_path_buf());
        let mut stats = FetchStats::default();
        let batch = feed.fetch(&mut stats).await.unwrap();
        assert_eq!(batch.posts[0].id, "p1");
        assert_eq!(stats.api_calls, 0);
    }
}
