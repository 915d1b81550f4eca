use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Content records as delivered by the feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subreddit {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscribers: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<i64>,
    #[serde(default)]
    pub quarantine: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Redditor {
    pub id: String,
    #[serde(default)]
    pub link_karma: Option<i64>,
    #[serde(default)]
    pub comment_karma: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<i64>,
}

impl Redditor {
    /// A deleted or suspended account. Zero karma marks it as looked up.
    pub fn gone(name: &str) -> Self {
        Self {
            id: name.to_string(),
            link_karma: Some(0),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub subreddit_id: String,
    /// None for deleted or anonymous authors.
    #[serde(default)]
    pub author: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub num_comments: i64,
    /// Unix seconds.
    pub created_utc: i64,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    /// Parent comment id when this is a reply; None for top-level comments.
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    pub created_utc: i64,
    #[serde(default)]
    pub is_submitter: bool,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub locked: bool,
}

/// Everything one fetch delivered. Comments reference posts of the same batch
/// or posts stored by an earlier cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedBatch {
    #[serde(default)]
    pub subreddit: Option<Subreddit>,
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub redditors: Vec<Redditor>,
}

// ---------------------------------------------------------------------------
// Content unit: the atomic unit of ingestion and dedup scope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Post,
    Comment,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Post => write!(f, "post"),
            SourceKind::Comment => write!(f, "comment"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ContentUnit {
    Post(Post),
    Comment(Comment),
}

impl ContentUnit {
    pub fn kind(&self) -> SourceKind {
        match self {
            ContentUnit::Post(_) => SourceKind::Post,
            ContentUnit::Comment(_) => SourceKind::Comment,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentUnit::Post(p) => &p.id,
            ContentUnit::Comment(c) => &c.id,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            ContentUnit::Post(p) => p.author.as_deref(),
            ContentUnit::Comment(c) => c.author.as_deref(),
        }
    }

    /// Text the extractor scans. Posts scan title and body as one string.
    pub fn text(&self) -> String {
        match self {
            ContentUnit::Post(p) if p.body.is_empty() => p.title.clone(),
            ContentUnit::Post(p) => format!("{}\n{}", p.title, p.body),
            ContentUnit::Comment(c) => c.body.clone(),
        }
    }

    /// Lock key shared by every writer touching this unit.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.kind(), self.id())
    }
}

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionCandidate {
    /// Bare uppercase symbol, never `$`-prefixed.
    pub symbol: String,
    /// Character offset of the bare symbol in the scanned text.
    pub position: usize,
    /// Up to `CONTEXT_WINDOW_CHARS` characters either side of the token.
    pub context: String,
    pub source: SourceKind,
    /// True when the token was written as `$SYMBOL`.
    pub cashtag: bool,
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Pos,
    Neg,
    Neu,
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SentimentLabel::Pos => "pos",
            SentimentLabel::Neg => "neg",
            SentimentLabel::Neu => "neu",
        };
        write!(f, "{s}")
    }
}

impl SentimentLabel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pos" => Some(SentimentLabel::Pos),
            "neg" => Some(SentimentLabel::Neg),
            "neu" => Some(SentimentLabel::Neu),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentiment {
    /// In [-1, 1].
    pub score: f64,
    pub label: SentimentLabel,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// mention_count at or above a fixed threshold.
    VolumeThreshold,
    /// mention_count grew by a percentage over the rolling baseline.
    PercentChange,
}

impl AlertType {
    pub const ALL: [AlertType; 2] = [AlertType::VolumeThreshold, AlertType::PercentChange];
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::VolumeThreshold => "volume_threshold",
            AlertType::PercentChange => "percent_change",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
}

impl AlertPriority {
    /// Band by how far the observed value overshoots its threshold.
    pub fn from_ratio(current: f64, threshold: f64) -> Self {
        use crate::config::priority_bands::*;
        if threshold <= 0.0 {
            return AlertPriority::Medium;
        }
        let ratio = current / threshold;
        if ratio >= HIGH_MULTIPLE {
            AlertPriority::High
        } else if ratio >= MEDIUM_MULTIPLE {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Crawl cycle outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStatus::Success => "success",
            CycleStatus::Partial => "partial",
            CycleStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
