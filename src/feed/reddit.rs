use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, MAX_RETRY_AFTER_SECS};
use crate::error::{AppError, Result};
use crate::feed::{FeedSource, FetchStats};
use crate::types::{Comment, FeedBatch, Post, Redditor, Subreddit};

/// Outcome of one `user/{name}/about.json` request.
enum Profile {
    Found(Value),
    /// Deleted, suspended or shadowbanned account.
    Gone,
    RateLimited(Duration),
}

/// Public Reddit JSON listings: subreddit about page, newest posts, and one
/// comment thread per post.
pub struct RedditFeed {
    client: reqwest::Client,
    base_url: String,
    subreddit: String,
    post_limit: usize,
    comment_limit: usize,
    delay: Duration,
}

impl RedditFeed {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(cfg.reddit_user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.reddit_base_url.trim_end_matches('/').to_string(),
            subreddit: cfg.subreddit.clone(),
            post_limit: cfg.post_limit,
            comment_limit: cfg.comment_limit,
            delay: Duration::from_millis(cfg.request_delay_ms),
        })
    }

    /// One upstream request, followed by the configured pause.
    async fn get_json(&self, path: &str, stats: &mut FetchStats) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        stats.api_calls += 1;
        debug!(%url, "GET");
        let result = async {
            let value = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            Ok::<_, AppError>(value)
        }
        .await;
        self.pause().await;
        result
    }

    async fn get_profile(&self, name: &str, stats: &mut FetchStats) -> Result<Profile> {
        let url = format!("{}/user/{}/about.json", self.base_url, name);
        stats.api_calls += 1;
        debug!(%url, "GET");
        let result = async {
            let resp = self.client.get(&url).send().await?;
            let profile = match resp.status() {
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Profile::Gone,
                StatusCode::TOO_MANY_REQUESTS => {
                    let header = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok());
                    Profile::RateLimited(retry_after(header))
                }
                _ => Profile::Found(resp.error_for_status()?.json::<Value>().await?),
            };
            Ok::<_, AppError>(profile)
        }
        .await;
        self.pause().await;
        result
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl FeedSource for RedditFeed {
    fn name(&self) -> &'static str {
        "reddit"
    }

    async fn fetch(&self, stats: &mut FetchStats) -> Result<FeedBatch> {
        let subreddit = match self
            .get_json(&format!("r/{}/about.json", self.subreddit), stats)
            .await
        {
            Ok(about) => parse_subreddit(&about),
            Err(e) => {
                warn!(subreddit = %self.subreddit, "About page unavailable: {e}");
                stats.failed_requests += 1;
                None
            }
        };

        let listing = self
            .get_json(
                &format!("r/{}/new.json?limit={}", self.subreddit, self.post_limit),
                stats,
            )
            .await?;
        let children = listing_children(&listing)
            .ok_or_else(|| AppError::Feed("new.json did not return a listing".to_string()))?;

        let mut posts = Vec::with_capacity(children.len());
        for child in children {
            match parse_post(child, &self.subreddit) {
                Some(p) => posts.push(p),
                None => stats.skipped_records += 1,
            }
        }

        let mut comments = Vec::new();
        if self.comment_limit > 0 {
            for post in &posts {
                let path = format!("comments/{}.json?limit={}", post.id, self.comment_limit);
                match self.get_json(&path, stats).await {
                    Ok(thread) => {
                        let (mut parsed, skipped) =
                            parse_comment_thread(&thread, &post.id, self.comment_limit);
                        stats.skipped_records += skipped;
                        comments.append(&mut parsed);
                    }
                    Err(e) => {
                        warn!(post_id = %post.id, "Comment thread unavailable: {e}");
                        stats.failed_requests += 1;
                    }
                }
            }
        }

        info!(
            subreddit = %self.subreddit,
            posts = posts.len(),
            comments = comments.len(),
            api_calls = stats.api_calls,
            "Reddit fetch complete"
        );
        Ok(FeedBatch {
            subreddit,
            posts,
            comments,
            redditors: Vec::new(),
        })
    }

    /// One profile request per name. A 429 stops the batch after waiting out
    /// Retry-After; the rest are picked up next cycle.
    async fn lookup_redditors(
        &self,
        names: &[String],
        stats: &mut FetchStats,
    ) -> Result<Vec<Redditor>> {
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            match self.get_profile(name, stats).await {
                Ok(Profile::Found(about)) => match parse_redditor(&about, name) {
                    Some(r) => found.push(r),
                    None => stats.skipped_records += 1,
                },
                Ok(Profile::Gone) => found.push(Redditor::gone(name)),
                Ok(Profile::RateLimited(wait)) => {
                    warn!(author = %name, "Profile lookups rate limited, pausing {}s", wait.as_secs());
                    tokio::time::sleep(wait).await;
                    break;
                }
                Err(e) => {
                    warn!(author = %name, "Profile unavailable: {e}");
                    stats.failed_requests += 1;
                }
            }
        }
        Ok(found)
    }
}

/// Seconds form of Retry-After, capped. Missing or unparseable values wait the cap.
pub fn retry_after(header: Option<&str>) -> Duration {
    let secs = header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(MAX_RETRY_AFTER_SECS);
    Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))
}

fn listing_children(v: &Value) -> Option<&Vec<Value>> {
    v.get("data")?.get("children")?.as_array()
}

fn str_field(d: &Value, key: &str) -> Option<String> {
    d.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(d: &Value, key: &str) -> Option<i64> {
    let v = d.get(key)?;
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn flag(d: &Value, key: &str) -> bool {
    d.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Deleted and removed accounts have no author.
fn author(d: &Value) -> Option<String> {
    d.get("author")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty() && *a != "[deleted]")
        .map(str::to_string)
}

pub fn parse_subreddit(about: &Value) -> Option<Subreddit> {
    let d = about.get("data")?;
    Some(Subreddit {
        id: str_field(d, "display_name")?,
        title: str_field(d, "title"),
        description: str_field(d, "public_description"),
        subscribers: int_field(d, "subscribers"),
        created_utc: int_field(d, "created_utc"),
        quarantine: flag(d, "quarantine"),
    })
}

/// A `t2` about page. Suspended accounts carry no karma and count as gone;
/// None when an active account's karma is missing.
pub fn parse_redditor(about: &Value, name: &str) -> Option<Redditor> {
    let d = about.get("data")?;
    if flag(d, "is_suspended") {
        return Some(Redditor::gone(name));
    }
    Some(Redditor {
        id: name.to_string(),
        link_karma: Some(int_field(d, "link_karma")?),
        comment_karma: int_field(d, "comment_karma"),
        created_utc: int_field(d, "created_utc"),
    })
}

/// A `t3` listing child. None when id, title or creation time is missing.
pub fn parse_post(child: &Value, default_subreddit: &str) -> Option<Post> {
    let d = child.get("data")?;
    Some(Post {
        id: str_field(d, "id")?,
        subreddit_id: str_field(d, "subreddit").unwrap_or_else(|| default_subreddit.to_string()),
        author: author(d),
        title: str_field(d, "title")?,
        body: str_field(d, "selftext").unwrap_or_default(),
        url: str_field(d, "url"),
        permalink: str_field(d, "permalink"),
        score: int_field(d, "score").unwrap_or(0),
        upvote_ratio: d.get("upvote_ratio").and_then(Value::as_f64),
        num_comments: int_field(d, "num_comments").unwrap_or(0),
        created_utc: int_field(d, "created_utc")?,
        is_self: flag(d, "is_self"),
        is_video: flag(d, "is_video"),
        over_18: flag(d, "over_18"),
        spoiler: flag(d, "spoiler"),
        stickied: flag(d, "stickied"),
        locked: flag(d, "locked"),
    })
}

fn parse_comment(d: &Value, post_id: &str, depth: i64) -> Option<Comment> {
    let parent_comment_id = d
        .get("parent_id")
        .and_then(Value::as_str)
        .and_then(|p| p.strip_prefix("t1_"))
        .map(str::to_string);
    Some(Comment {
        id: str_field(d, "id")?,
        post_id: post_id.to_string(),
        parent_comment_id,
        depth,
        author: author(d),
        body: str_field(d, "body").unwrap_or_default(),
        score: int_field(d, "score").unwrap_or(0),
        created_utc: int_field(d, "created_utc")?,
        is_submitter: flag(d, "is_submitter"),
        stickied: flag(d, "stickied"),
        locked: flag(d, "locked"),
    })
}

/// Flattens a `comments/{id}.json` response into at most `limit` comments,
/// shallow ones first. `more` stubs are skipped. Returns the comments and the
/// number of malformed records dropped.
pub fn parse_comment_thread(thread: &Value, post_id: &str, limit: usize) -> (Vec<Comment>, u64) {
    let mut out = Vec::new();
    let mut skipped = 0u64;
    if let Some(listing) = thread.get(1) {
        flatten(listing, post_id, 0, &mut out, &mut skipped);
    }
    out.sort_by_key(|c| c.depth);
    out.truncate(limit);
    (out, skipped)
}

fn flatten(listing: &Value, post_id: &str, depth: i64, out: &mut Vec<Comment>, skipped: &mut u64) {
    for child in listing_children(listing).into_iter().flatten() {
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(d) = child.get("data") else {
            *skipped += 1;
            continue;
        };
        match parse_comment(d, post_id, depth) {
            Some(c) => out.push(c),
            None => {
                *skipped += 1;
                continue;
            }
        }
        if let Some(replies) = d.get("replies").filter(|r| r.is_object()) {
            flatten(replies, post_id, depth + 1, out, skipped);
        }
    }
}
