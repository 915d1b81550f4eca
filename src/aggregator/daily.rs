use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::TrendWeights;
use crate::db::models::DailyStatRow;
use crate::error::Result;
use crate::types::SentimentLabel;

/// One stored mention joined with its parent content unit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MentionFact {
    pub symbol: String,
    pub source: String,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
    /// "post:<id>" or "comment:<id>"
    pub unit_key: String,
    pub unit_score: i64,
    pub author_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSummary {
    pub upserted: usize,
    pub removed: usize,
}

/// Rebuilds `daily_stats` for one UTC day from the mentions table.
/// Always a full recomputation; running it twice over the same mentions
/// leaves identical rows.
pub struct DailyAggregator {
    pool: SqlitePool,
    weights: TrendWeights,
}

impl DailyAggregator {
    pub fn new(pool: SqlitePool, weights: TrendWeights) -> Self {
        Self { pool, weights }
    }

    /// Recomputes `date` for the given symbols (all symbols when None) and
    /// re-ranks every row of the date.
    pub async fn aggregate(
        &self,
        date: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<AggregateSummary> {
        let (from, to) = day_bounds(date);
        let facts = sqlx::query_as::<_, MentionFact>(
            r"
            SELECT m.symbol AS symbol,
                   m.source AS source,
                   m.sentiment_score AS sentiment_score,
                   m.sentiment_label AS sentiment_label,
                   CASE WHEN m.post_id IS NOT NULL THEN 'post:' || m.post_id
                        ELSE 'comment:' || m.comment_id END AS unit_key,
                   COALESCE(p.score, c.score, 0) AS unit_score,
                   CASE WHEN m.post_id IS NOT NULL THEN p.author_id
                        ELSE c.author_id END AS author_id
            FROM mentions m
            LEFT JOIN posts p ON p.id = m.post_id
            LEFT JOIN comments c ON c.id = m.comment_id
            WHERE COALESCE(p.created_utc, c.created_utc) >= ?1
              AND COALESCE(p.created_utc, c.created_utc) < ?2
            ",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let date_str = date.to_string();
        let scope: Option<HashSet<&str>> =
            symbols.map(|s| s.iter().map(String::as_str).collect());
        let in_scope = |symbol: &str| scope.as_ref().map_or(true, |s| s.contains(symbol));

        let fresh: Vec<DailyStatRow> = compute_daily_stats(&date_str, &facts, self.weights)
            .into_iter()
            .filter(|row| in_scope(row.symbol.as_str()))
            .collect();
        let fresh_symbols: HashSet<&str> = fresh.iter().map(|r| r.symbol.as_str()).collect();

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT symbol FROM daily_stats WHERE date = ?1")
                .bind(&date_str)
                .fetch_all(&self.pool)
                .await?;
        let stale: Vec<&String> = existing
            .iter()
            .filter(|s| in_scope(s.as_str()) && !fresh_symbols.contains(s.as_str()))
            .collect();

        let mut tx = self.pool.begin().await?;
        for symbol in &stale {
            sqlx::query("DELETE FROM daily_stats WHERE symbol = ?1 AND date = ?2")
                .bind(symbol.as_str())
                .bind(&date_str)
                .execute(&mut *tx)
                .await?;
        }
        for row in &fresh {
            upsert_row(&mut tx, row).await?;
        }

        let stored: Vec<(String, f64, i64)> = sqlx::query_as(
            "SELECT symbol, trend_score, mention_count FROM daily_stats WHERE date = ?1",
        )
        .bind(&date_str)
        .fetch_all(&mut *tx)
        .await?;
        for (symbol, rank) in rank_order(stored) {
            sqlx::query(
                "UPDATE daily_stats SET rank = ?1 WHERE symbol = ?2 AND date = ?3 AND rank IS NOT ?1",
            )
            .bind(rank)
            .bind(&symbol)
            .bind(&date_str)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let summary = AggregateSummary {
            upserted: fresh.len(),
            removed: stale.len(),
        };
        info!(
            date = %date_str,
            upserted = summary.upserted,
            removed = summary.removed,
            "Daily stats rebuilt"
        );
        Ok(summary)
    }
}

async fn upsert_row(conn: &mut sqlx::SqliteConnection, row: &DailyStatRow) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO daily_stats (
            symbol, date, mention_count, post_mentions, comment_mentions,
            avg_sentiment, sentiment_std, pos_cnt, neg_cnt, neu_cnt,
            total_score, avg_score, unique_authors, trend_score
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(symbol, date) DO UPDATE SET
            mention_count = excluded.mention_count,
            post_mentions = excluded.post_mentions,
            comment_mentions = excluded.comment_mentions,
            avg_sentiment = excluded.avg_sentiment,
            sentiment_std = excluded.sentiment_std,
            pos_cnt = excluded.pos_cnt,
            neg_cnt = excluded.neg_cnt,
            neu_cnt = excluded.neu_cnt,
            total_score = excluded.total_score,
            avg_score = excluded.avg_score,
            unique_authors = excluded.unique_authors,
            trend_score = excluded.trend_score
        ",
    )
    .bind(&row.symbol)
    .bind(&row.date)
    .bind(row.mention_count)
    .bind(row.post_mentions)
    .bind(row.comment_mentions)
    .bind(row.avg_sentiment)
    .bind(row.sentiment_std)
    .bind(row.pos_cnt)
    .bind(row.neg_cnt)
    .bind(row.neu_cnt)
    .bind(row.total_score)
    .bind(row.avg_score)
    .bind(row.unique_authors)
    .bind(row.trend_score)
    .execute(conn)
    .await?;
    Ok(())
}

/// [start, end) of a UTC day in unix seconds.
pub fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    (start, start + 86_400)
}

#[derive(Default)]
struct Acc {
    mentions: i64,
    posts: i64,
    comments: i64,
    sentiments: Vec<f64>,
    pos: i64,
    neg: i64,
    neu: i64,
    units: HashMap<String, (i64, Option<String>)>,
}

/// Pure per-symbol rollup of one day's mentions. Rows come back in symbol
/// order with `rank` filled by [`rank_order`].
pub fn compute_daily_stats(
    date: &str,
    facts: &[MentionFact],
    weights: TrendWeights,
) -> Vec<DailyStatRow> {
    let mut by_symbol: BTreeMap<&str, Acc> = BTreeMap::new();
    for f in facts {
        let acc = by_symbol.entry(f.symbol.as_str()).or_default();
        acc.mentions += 1;
        if f.source == "post" {
            acc.posts += 1;
        } else {
            acc.comments += 1;
        }
        if let Some(s) = f.sentiment_score {
            acc.sentiments.push(s);
        }
        match f.sentiment_label.as_deref().and_then(SentimentLabel::parse) {
            Some(SentimentLabel::Pos) => acc.pos += 1,
            Some(SentimentLabel::Neg) => acc.neg += 1,
            Some(SentimentLabel::Neu) => acc.neu += 1,
            None => {}
        }
        acc.units
            .entry(f.unit_key.clone())
            .or_insert_with(|| (f.unit_score, f.author_id.clone()));
    }

    let mut rows: Vec<DailyStatRow> = by_symbol
        .into_iter()
        .map(|(symbol, acc)| {
            let (avg_sentiment, sentiment_std) = mean_and_std(&acc.sentiments);
            let total_score: i64 = acc.units.values().map(|(score, _)| score).sum();
            let avg_score =
                (!acc.units.is_empty()).then(|| total_score as f64 / acc.units.len() as f64);
            let unique_authors = acc
                .units
                .values()
                .filter_map(|(_, author)| author.as_deref())
                .collect::<HashSet<_>>()
                .len() as i64;
            DailyStatRow {
                symbol: symbol.to_string(),
                date: date.to_string(),
                mention_count: acc.mentions,
                post_mentions: acc.posts,
                comment_mentions: acc.comments,
                avg_sentiment,
                sentiment_std,
                pos_cnt: acc.pos,
                neg_cnt: acc.neg,
                neu_cnt: acc.neu,
                total_score,
                avg_score,
                unique_authors,
                trend_score: weights.mention_weight * acc.mentions as f64
                    + weights.author_weight * unique_authors as f64,
                rank: None,
            }
        })
        .collect();

    let ranks: HashMap<String, i64> = rank_order(
        rows.iter()
            .map(|r| (r.symbol.clone(), r.trend_score, r.mention_count))
            .collect(),
    )
    .into_iter()
    .collect();
    for row in &mut rows {
        row.rank = ranks.get(&row.symbol).copied();
    }
    rows
}

/// Ranks (symbol, trend_score, mention_count) by trend_score desc, then
/// mention_count desc, then symbol asc. Ranks start at 1 and are unique.
pub fn rank_order(mut rows: Vec<(String, f64, i64)>) -> Vec<(String, i64)> {
    rows.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    rows.into_iter()
        .enumerate()
        .map(|(i, (symbol, _, _))| (symbol, i as i64 + 1))
        .collect()
}

/// Mean and population standard deviation; (None, None) for no samples.
fn mean_and_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (Some(mean), Some(var.sqrt()))
}
