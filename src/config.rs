use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const REDDIT_BASE_URL: &str = "https://www.reddit.com";
pub const REDDIT_USER_AGENT: &str = "reddit-ticker-scanner/0.1";

/// Characters of surrounding text kept on each side of a mention.
pub const CONTEXT_WINDOW_CHARS: usize = 40;

/// Longest symbol the extractor will consider.
pub const MAX_SYMBOL_LEN: usize = 5;

/// Feed fetch backoff schedule in milliseconds. One attempt per entry plus the first.
pub const FETCH_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 4_000];

/// Transaction retry backoff in milliseconds, applied per content unit.
pub const WRITE_BACKOFF_MS: &[u64] = &[50, 200, 800];

/// How long a connection waits on a locked database before reporting SQLITE_BUSY.
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 10;

/// Channel capacity for alert events heading to the notification sink.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Alert evaluation window recorded on every alert row (one day).
pub const ALERT_WINDOW_MINUTES: i64 = 1_440;

/// Longest pause honoured from a Retry-After header during author enrichment.
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Rows returned by the report endpoints.
pub const REPORT_TOP_N: i64 = 15;

/// Priority bands as multiples of the alert threshold.
pub mod priority_bands {
    pub const HIGH_MULTIPLE: f64 = 3.0;
    pub const MEDIUM_MULTIPLE: f64 = 1.5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Reddit,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentMode {
    None,
    Lexicon,
}

/// Thresholds and baseline policy for the trend alert evaluator.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// mention_count at or above which a volume alert fires (ALERT_THRESHOLD)
    pub volume_threshold: i64,
    /// Percent increase over baseline at or above which a change alert fires (PERCENT_CHANGE_THRESHOLD)
    pub percent_change_threshold: f64,
    /// Minimum mention_count before a change alert is considered (MIN_MENTIONS)
    pub min_mentions: i64,
    /// Trailing days averaged into the baseline (BASELINE_DAYS)
    pub baseline_days: u32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            volume_threshold: 10,
            percent_change_threshold: 100.0,
            min_mentions: 5,
            baseline_days: 7,
        }
    }
}

/// Weights of the composite daily trend score.
#[derive(Debug, Clone, Copy)]
pub struct TrendWeights {
    pub mention_weight: f64,
    pub author_weight: f64,
}

impl Default for TrendWeights {
    fn default() -> Self {
        Self {
            mention_weight: 1.0,
            author_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Delimited symbol list (WHITELIST_PATH)
    pub whitelist_path: PathBuf,
    /// Optional one-word-per-line stoplist (STOPLIST_PATH); built-in list when unset
    pub stoplist_path: Option<PathBuf>,
    pub feed_mode: FeedMode,
    /// JSON batch replayed when FEED_MODE=file (FEED_FILE)
    pub feed_file: Option<PathBuf>,
    pub reddit_base_url: String,
    pub reddit_user_agent: String,
    pub subreddit: String,
    pub post_limit: usize,
    pub comment_limit: usize,
    /// Pause between upstream requests (REQUEST_DELAY_MS)
    pub request_delay_ms: u64,
    pub cycle_interval_secs: u64,
    /// Run a single cycle and exit (RUN_ONCE)
    pub run_once: bool,
    /// Content units written concurrently (INGEST_WORKERS)
    pub ingest_workers: usize,
    /// Author profiles looked up per cycle; 0 disables enrichment (ENRICH_AUTHORS_PER_CYCLE)
    pub enrich_authors_per_cycle: usize,
    pub alert_policy: AlertPolicy,
    pub trend_weights: TrendWeights,
    pub sentiment: SentimentMode,
    /// Directory receiving CSV/JSON snapshots after each cycle (EXPORT_DIR)
    pub export_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let feed_mode = match env_or("FEED_MODE", "reddit").to_ascii_lowercase().as_str() {
            "reddit" => FeedMode::Reddit,
            "file" => FeedMode::File,
            other => {
                return Err(AppError::Config(format!(
                    "FEED_MODE must be 'reddit' or 'file', got '{other}'"
                )))
            }
        };
        let sentiment = match env_or("SENTIMENT", "none").to_ascii_lowercase().as_str() {
            "none" => SentimentMode::None,
            "lexicon" => SentimentMode::Lexicon,
            other => {
                return Err(AppError::Config(format!(
                    "SENTIMENT must be 'none' or 'lexicon', got '{other}'"
                )))
            }
        };

        let defaults = AlertPolicy::default();
        let weights = TrendWeights::default();

        let cfg = Self {
            log_level: env_or("LOG_LEVEL", "info"),
            db_path: env_or("DB_PATH", "reddit_stock.db"),
            api_port: parse_env("API_PORT", 3000u16)?,
            whitelist_path: PathBuf::from(env_or("WHITELIST_PATH", "tickers_nasdaq.csv")),
            stoplist_path: optional_path("STOPLIST_PATH"),
            feed_mode,
            feed_file: optional_path("FEED_FILE"),
            reddit_base_url: env_or("REDDIT_BASE_URL", REDDIT_BASE_URL),
            reddit_user_agent: env_or("REDDIT_USER_AGENT", REDDIT_USER_AGENT),
            subreddit: env_or("SUBREDDIT", "wallstreetbets"),
            post_limit: parse_env("POST_LIMIT", 25usize)?,
            comment_limit: parse_env("COMMENT_LIMIT", 100usize)?,
            request_delay_ms: parse_env("REQUEST_DELAY_MS", 1_000u64)?,
            cycle_interval_secs: parse_env("CYCLE_INTERVAL_SECS", 900u64)?,
            run_once: parse_env("RUN_ONCE", false)?,
            ingest_workers: parse_env("INGEST_WORKERS", 4usize)?,
            enrich_authors_per_cycle: parse_env("ENRICH_AUTHORS_PER_CYCLE", 50usize)?,
            alert_policy: AlertPolicy {
                volume_threshold: parse_env("ALERT_THRESHOLD", defaults.volume_threshold)?,
                percent_change_threshold: parse_env(
                    "PERCENT_CHANGE_THRESHOLD",
                    defaults.percent_change_threshold,
                )?,
                min_mentions: parse_env("MIN_MENTIONS", defaults.min_mentions)?,
                baseline_days: parse_env("BASELINE_DAYS", defaults.baseline_days)?,
            },
            trend_weights: TrendWeights {
                mention_weight: parse_env("TREND_MENTION_WEIGHT", weights.mention_weight)?,
                author_weight: parse_env("TREND_AUTHOR_WEIGHT", weights.author_weight)?,
            },
            sentiment,
            export_dir: optional_path("EXPORT_DIR"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings that would make a run meaningless. Called once at startup;
    /// a failure here aborts before anything is written.
    pub fn validate(&self) -> Result<()> {
        let p = &self.alert_policy;
        if p.volume_threshold < 1 {
            return Err(AppError::Config("ALERT_THRESHOLD must be >= 1".to_string()));
        }
        if !p.percent_change_threshold.is_finite() || p.percent_change_threshold <= 0.0 {
            return Err(AppError::Config(
                "PERCENT_CHANGE_THRESHOLD must be a positive number".to_string(),
            ));
        }
        if p.min_mentions < 1 {
            return Err(AppError::Config("MIN_MENTIONS must be >= 1".to_string()));
        }
        if p.baseline_days < 1 {
            return Err(AppError::Config("BASELINE_DAYS must be >= 1".to_string()));
        }

        let w = self.trend_weights;
        if !(w.mention_weight.is_finite() && w.author_weight.is_finite())
            || w.mention_weight < 0.0
            || w.author_weight < 0.0
            || (w.mention_weight == 0.0 && w.author_weight == 0.0)
        {
            return Err(AppError::Config(
                "TREND_*_WEIGHT must be non-negative and not both zero".to_string(),
            ));
        }

        if self.ingest_workers == 0 {
            return Err(AppError::Config("INGEST_WORKERS must be >= 1".to_string()));
        }
        if self.feed_mode == FeedMode::File && self.feed_file.is_none() {
            return Err(AppError::Config("FEED_MODE=file requires FEED_FILE".to_string()));
        }
        if self.subreddit.trim().is_empty() {
            return Err(AppError::Config("SUBREDDIT must not be empty".to_string()));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        log_level: "debug".to_string(),
        db_path: ":memory:".to_string(),
        api_port: 0,
        whitelist_path: PathBuf::from("tickers.csv"),
        stoplist_path: None,
        feed_mode: FeedMode::File,
        feed_file: Some(PathBuf::from("batch.json")),
        reddit_base_url: REDDIT_BASE_URL.to_string(),
        reddit_user_agent: REDDIT_USER_AGENT.to_string(),
        subreddit: "wallstreetbets".to_string(),
        post_limit: 25,
        comment_limit: 100,
        request_delay_ms: 0,
        cycle_interval_secs: 60,
        run_once: true,
        ingest_workers: 2,
        enrich_authors_per_cycle: 10,
        alert_policy: AlertPolicy::default(),
        trend_weights: TrendWeights::default(),
        sentiment: SentimentMode::None,
        export_dir: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn zero_threshold_is_fatal() {
        let mut cfg = test_config();
        cfg.alert_policy.volume_threshold = 0;
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn both_weights_zero_is_fatal() {
        let mut cfg = test_config();
        cfg.trend_weights = TrendWeights {
            mention_weight: 0.0,
            author_weight: 0.0,
        };
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn negative_weight_is_fatal() {
        let mut cfg = test_config();
        cfg.trend_weights.author_weight = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_mode_needs_a_file() {
        let mut cfg = test_config();
        cfg.feed_file = None;
        assert!(cfg.validate().is_err());
    }
}
