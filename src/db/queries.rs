//! Read-only queries shared by the HTTP routes and the file export.

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::models::{CrawlLogRow, DailyStatRow, GrowthRow, MentionRow, TrendAlertRow};
use crate::error::Result;

/// Optional date/symbol narrowing. A missing limit means all rows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportFilter {
    pub date: Option<NaiveDate>,
    pub symbol: Option<String>,
    pub limit: Option<i64>,
}

impl ExportFilter {
    fn date_str(&self) -> Option<String> {
        self.date.map(|d| d.to_string())
    }

    fn symbol_upper(&self) -> Option<String> {
        self.symbol.as_ref().map(|s| s.trim().to_ascii_uppercase())
    }

    fn limit_or_all(&self) -> i64 {
        self.limit.filter(|l| *l > 0).unwrap_or(-1)
    }
}

pub async fn list_mentions(pool: &SqlitePool, filter: &ExportFilter) -> Result<Vec<MentionRow>> {
    let rows = sqlx::query_as::<_, MentionRow>(
        r"
        SELECT m.id, m.symbol, m.post_id, m.comment_id, m.source, m.context, m.position,
               m.dedup_key, m.sentiment_score, m.sentiment_label, m.confidence, m.created_at,
               date(COALESCE(p.created_utc, c.created_utc), 'unixepoch') AS content_date
        FROM mentions m
        LEFT JOIN posts p ON p.id = m.post_id
        LEFT JOIN comments c ON c.id = m.comment_id
        WHERE (?1 IS NULL OR m.symbol = ?1)
          AND (?2 IS NULL OR date(COALESCE(p.created_utc, c.created_utc), 'unixepoch') = ?2)
        ORDER BY m.id
        LIMIT ?3
        ",
    )
    .bind(filter.symbol_upper())
    .bind(filter.date_str())
    .bind(filter.limit_or_all())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

const DAILY_STAT_COLUMNS: &str = "symbol, date, mention_count, post_mentions, comment_mentions, \
    avg_sentiment, sentiment_std, pos_cnt, neg_cnt, neu_cnt, total_score, avg_score, \
    unique_authors, trend_score, rank";

pub async fn list_daily_stats(
    pool: &SqlitePool,
    filter: &ExportFilter,
) -> Result<Vec<DailyStatRow>> {
    let sql = format!(
        "SELECT {DAILY_STAT_COLUMNS} FROM daily_stats \
         WHERE (?1 IS NULL OR symbol = ?1) AND (?2 IS NULL OR date = ?2) \
         ORDER BY date DESC, rank ASC, symbol ASC LIMIT ?3"
    );
    let rows = sqlx::query_as::<_, DailyStatRow>(&sql)
        .bind(filter.symbol_upper())
        .bind(filter.date_str())
        .bind(filter.limit_or_all())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// All daily rows of one date, in rank order.
#[cfg(test)]
pub async fn daily_stats_for(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<DailyStatRow>> {
    list_daily_stats(
        pool,
        &ExportFilter {
            date: Some(date),
            ..Default::default()
        },
    )
    .await
}

pub async fn list_alerts(
    pool: &SqlitePool,
    active: Option<bool>,
    symbol: Option<&str>,
) -> Result<Vec<TrendAlertRow>> {
    let rows = sqlx::query_as::<_, TrendAlertRow>(
        r"
        SELECT id, symbol, alert_type, threshold, current_value, percent_change, window_minutes,
               message, priority, active, created_at, updated_at, closed_at
        FROM trend_alerts
        WHERE (?1 IS NULL OR active = ?1) AND (?2 IS NULL OR symbol = ?2)
        ORDER BY created_at DESC, id DESC
        ",
    )
    .bind(active)
    .bind(symbol.map(|s| s.to_ascii_uppercase()))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_crawl_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<CrawlLogRow>> {
    let rows = sqlx::query_as::<_, CrawlLogRow>(
        r"
        SELECT run_id, subreddit_id, started_at, finished_at, posts_processed,
               comments_processed, mentions_found, error_count, status, error_message,
               api_calls, elapsed_seconds
        FROM crawl_logs
        ORDER BY id DESC
        LIMIT ?1
        ",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_crawl_log(pool: &SqlitePool, log: &CrawlLogRow) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO crawl_logs (
            run_id, subreddit_id, started_at, finished_at, posts_processed,
            comments_processed, mentions_found, error_count, status, error_message,
            api_calls, elapsed_seconds
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ",
    )
    .bind(&log.run_id)
    .bind(&log.subreddit_id)
    .bind(&log.started_at)
    .bind(&log.finished_at)
    .bind(log.posts_processed)
    .bind(log.comments_processed)
    .bind(log.mentions_found)
    .bind(log.error_count)
    .bind(&log.status)
    .bind(&log.error_message)
    .bind(log.api_calls)
    .bind(log.elapsed_seconds)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most-mentioned symbols of a date.
pub async fn top_symbols(pool: &SqlitePool, date: NaiveDate, n: i64) -> Result<Vec<DailyStatRow>> {
    let sql = format!(
        "SELECT {DAILY_STAT_COLUMNS} FROM daily_stats WHERE date = ?1 \
         ORDER BY mention_count DESC, symbol ASC LIMIT ?2"
    );
    let rows = sqlx::query_as::<_, DailyStatRow>(&sql)
        .bind(date.to_string())
        .bind(n)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Authors whose profile has never been looked up, oldest-name order.
pub async fn redditors_missing_karma(pool: &SqlitePool, limit: i64) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM redditors WHERE link_karma IS NULL ORDER BY id LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Up to `limit` symbols with at least `min_mentions` on `date` whose count
/// more than doubled against the previous day. Symbols with no count the
/// previous day qualify too; their growth is NULL and they sort last.
pub async fn growth_report(
    pool: &SqlitePool,
    date: NaiveDate,
    min_mentions: i64,
    limit: i64,
) -> Result<Vec<GrowthRow>> {
    let yesterday = date.pred_opt().unwrap_or(date);
    let rows = sqlx::query_as::<_, GrowthRow>(
        r"
        SELECT t.symbol AS symbol,
               t.mention_count AS today,
               y.mention_count AS yesterday,
               ROUND(CAST(t.mention_count AS REAL) / NULLIF(y.mention_count, 0), 2) AS growth
        FROM daily_stats t
        LEFT JOIN daily_stats y ON y.symbol = t.symbol AND y.date = ?2
        WHERE t.date = ?1
          AND t.mention_count >= ?3
          AND (y.mention_count IS NULL OR t.mention_count > 2 * y.mention_count)
        ORDER BY growth IS NULL, growth DESC, t.symbol ASC
        LIMIT ?4
        ",
    )
    .bind(date.to_string())
    .bind(yesterday.to_string())
    .bind(min_mentions)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn seed_stat(pool: &SqlitePool, symbol: &str, date: &str, count: i64) {
        sqlx::query("INSERT OR IGNORE INTO tickers (symbol) VALUES (?1)")
            .bind(symbol)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO daily_stats (symbol, date, mention_count, trend_score, rank) VALUES (?1, ?2, ?3, ?3, 1)",
        )
        .bind(symbol)
        .bind(date)
        .bind(count)
        .execute(pool)
        .await
        .unwrap();
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn growth_needs_more_than_double_and_min_mentions() {
        let pool = test_pool().await;
        seed_stat(&pool, "GME", "2026-10-15", 4).await;
        seed_stat(&pool, "GME", "2026-10-16", 12).await;
        seed_stat(&pool, "AMC", "2026-10-15", 5).await;
        seed_stat(&pool, "AMC", "2026-10-16", 10).await;
        seed_stat(&pool, "TSLA", "2026-10-15", 1).await;
        seed_stat(&pool, "TSLA", "2026-10-16", 4).await;
        seed_stat(&pool, "NVDA", "2026-10-16", 50).await;

        let rows = growth_report(&pool, day("2026-10-16"), 5, 15).await.unwrap();
        let got: Vec<_> = rows
            .iter()
            .map(|r| (r.symbol.as_str(), r.today, r.yesterday, r.growth))
            .collect();
        // AMC only doubled, TSLA is under the floor.
        assert_eq!(
            got,
            vec![("GME", 12, Some(4), Some(3.0)), ("NVDA", 50, None, None)]
        );
    }

    #[tokio::test]
    async fn growth_includes_new_and_zero_baseline_symbols() {
        let pool = test_pool().await;
        seed_stat(&pool, "GME", "2026-10-15", 0).await;
        seed_stat(&pool, "GME", "2026-10-16", 6).await;
        seed_stat(&pool, "AMC", "2026-10-16", 9).await;
        seed_stat(&pool, "TSLA", "2026-10-15", 2).await;
        seed_stat(&pool, "TSLA", "2026-10-16", 7).await;

        let rows = growth_report(&pool, day("2026-10-16"), 5, 15).await.unwrap();
        let got: Vec<_> = rows.iter().map(|r| (r.symbol.as_str(), r.growth)).collect();
        assert_eq!(got, vec![("TSLA", Some(3.5)), ("AMC", None), ("GME", None)]);
        assert_eq!(rows[2].yesterday, Some(0));

        let capped = growth_report(&pool, day("2026-10-16"), 5, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn only_unenriched_redditors_are_selected() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO redditors (id, link_karma, comment_karma) VALUES \
             ('zed', NULL, NULL), ('amy', NULL, 5), ('bob', 0, NULL), ('cat', 120, 300), ('dan', NULL, NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(redditors_missing_karma(&pool, 10).await.unwrap(), vec!["amy", "dan", "zed"]);
        assert_eq!(redditors_missing_karma(&pool, 2).await.unwrap(), vec!["amy", "dan"]);
    }

    #[tokio::test]
    async fn top_symbols_orders_by_count_then_symbol() {
        let pool = test_pool().await;
        seed_stat(&pool, "TSLA", "2026-10-16", 7).await;
        seed_stat(&pool, "AMC", "2026-10-16", 7).await;
        seed_stat(&pool, "GME", "2026-10-16", 9).await;
        seed_stat(&pool, "GME", "2026-10-15", 99).await;

        let rows = top_symbols(&pool, day("2026-10-16"), 2).await.unwrap();
        let got: Vec<_> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(got, vec!["GME", "AMC"]);
    }

    #[tokio::test]
    async fn crawl_logs_newest_first() {
        let pool = test_pool().await;
        for run in ["run-1", "run-2"] {
            insert_crawl_log(
                &pool,
                &CrawlLogRow {
                    run_id: run.to_string(),
                    subreddit_id: Some("wallstreetbets".to_string()),
                    started_at: "2026-10-16T00:00:00Z".to_string(),
                    finished_at: "2026-10-16T00:00:05Z".to_string(),
                    posts_processed: 1,
                    comments_processed: 0,
                    mentions_found: 2,
                    error_count: 0,
                    status: "success".to_string(),
                    error_message: None,
                    api_calls: 3,
                    elapsed_seconds: 5.0,
                },
            )
            .await
            .unwrap();
        }
        let logs = list_crawl_logs(&pool, 10).await.unwrap();
        assert_eq!(logs[0].run_id, "run-2");
        assert_eq!(logs.len(), 2);
    }
}
