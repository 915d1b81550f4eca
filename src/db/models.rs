//! Row types for the read paths (API, export, alert state). Runtime `query_as`
//! maps them by column name.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MentionRow {
    pub id: i64,
    pub symbol: String,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub source: String,
    pub context: Option<String>,
    pub position: i64,
    pub dedup_key: String,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: String,
    /// UTC day of the parent content unit.
    pub content_date: String,
}

/// One per (symbol, date). No wall-clock columns, so unchanged input yields
/// an identical row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DailyStatRow {
    pub symbol: String,
    pub date: String,
    pub mention_count: i64,
    pub post_mentions: i64,
    pub comment_mentions: i64,
    pub avg_sentiment: Option<f64>,
    pub sentiment_std: Option<f64>,
    pub pos_cnt: i64,
    pub neg_cnt: i64,
    pub neu_cnt: i64,
    pub total_score: i64,
    pub avg_score: Option<f64>,
    pub unique_authors: i64,
    pub trend_score: f64,
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TrendAlertRow {
    pub id: i64,
    pub symbol: String,
    pub alert_type: String,
    pub threshold: f64,
    pub current_value: f64,
    pub percent_change: Option<f64>,
    pub window_minutes: i64,
    pub message: String,
    pub priority: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CrawlLogRow {
    pub run_id: String,
    pub subreddit_id: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub posts_processed: i64,
    pub comments_processed: i64,
    pub mentions_found: i64,
    pub error_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub api_calls: i64,
    pub elapsed_seconds: f64,
}

/// Day-over-day growth of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct GrowthRow {
    pub symbol: String,
    pub today: i64,
    /// None when the symbol has no row for the previous day.
    pub yesterday: Option<i64>,
    /// None when the previous day is missing or zero.
    pub growth: Option<f64>,
}
