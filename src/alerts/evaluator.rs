use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::alerts::baseline::{percent_change, rolling_baseline};
use crate::config::{AlertPolicy, ALERT_WINDOW_MINUTES};
use crate::db::models::TrendAlertRow;
use crate::error::Result;
use crate::types::{AlertPriority, AlertType};

/// Transition handed to the notification sink once committed.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Opened(TrendAlertRow),
    Closed(TrendAlertRow),
}

/// A condition that currently holds for one (symbol, alert_type).
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub threshold: f64,
    pub current_value: f64,
    pub percent_change: Option<f64>,
    pub priority: AlertPriority,
    pub message: String,
}

/// Per-day inputs of one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolDay {
    pub mention_count: i64,
    pub baseline: Option<f64>,
}

/// Opens, refreshes and closes trend alerts from one date's daily stats.
///
/// Per (symbol, alert_type): nothing -> active when the condition fires,
/// active rows are refreshed in place while it keeps firing, and closed
/// (terminal) once it stops. A later crossing opens a new row.
pub struct TrendAlertEvaluator {
    pool: SqlitePool,
    policy: AlertPolicy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    opened: usize,
    refreshed: usize,
    closed: usize,
}

impl TrendAlertEvaluator {
    pub fn new(pool: SqlitePool, policy: AlertPolicy) -> Self {
        Self { pool, policy }
    }

    /// Evaluates `date` and commits every transition in one transaction.
    pub async fn evaluate(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Vec<AlertEvent>> {
        let date_str = date.to_string();
        let now_str = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let days = self.load_days(date).await?;
        let active = self.load_active().await?;

        // Duplicate actives for one pair are collapsed onto the newest row.
        let mut current: HashMap<(String, String), TrendAlertRow> = HashMap::new();
        let mut duplicates: Vec<TrendAlertRow> = Vec::new();
        for row in active {
            let key = (row.symbol.clone(), row.alert_type.clone());
            let newer_kept = current.get(&key).map_or(false, |kept| kept.id > row.id);
            if newer_kept {
                duplicates.push(row);
            } else if let Some(old) = current.insert(key, row) {
                duplicates.push(old);
            }
        }

        let mut symbols: Vec<String> = days.keys().cloned().collect();
        for (symbol, _) in current.keys() {
            if !days.contains_key(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols.sort();
        symbols.dedup();

        let mut events = Vec::new();
        let mut tally = Tally::default();
        let mut tx = self.pool.begin().await?;

        for row in duplicates {
            warn!(id = row.id, symbol = %row.symbol, "Closing duplicate active alert");
            let closed = close_alert(&mut tx, row, &now_str).await?;
            events.push(AlertEvent::Closed(closed));
            tally.closed += 1;
        }

        for symbol in &symbols {
            let day = days.get(symbol).copied().unwrap_or(SymbolDay {
                mention_count: 0,
                baseline: None,
            });
            for alert_type in AlertType::ALL {
                let firing = self.check(alert_type, symbol, &date_str, day);
                let existing = current.remove(&(symbol.clone(), alert_type.to_string()));
                match (existing, firing) {
                    (None, Some(f)) => {
                        let row = open_alert(&mut tx, symbol, alert_type, &f, &now_str).await?;
                        events.push(AlertEvent::Opened(row));
                        tally.opened += 1;
                    }
                    (Some(row), Some(f)) => {
                        refresh_alert(&mut tx, row.id, &f, &now_str).await?;
                        tally.refreshed += 1;
                    }
                    (Some(row), None) => {
                        let closed = close_alert(&mut tx, row, &now_str).await?;
                        events.push(AlertEvent::Closed(closed));
                        tally.closed += 1;
                    }
                    (None, None) => {}
                }
            }
        }
        tx.commit().await?;

        if tally == Tally::default() {
            debug!(date = %date_str, "No alert transitions");
        } else {
            info!(
                date = %date_str,
                opened = tally.opened,
                refreshed = tally.refreshed,
                closed = tally.closed,
                "Trend alerts evaluated"
            );
        }
        Ok(events)
    }

    /// The condition for one alert type, or None when it does not hold.
    /// A missing percent change never fires a percent alert.
    pub fn check(
        &self,
        alert_type: AlertType,
        symbol: &str,
        date: &str,
        day: SymbolDay,
    ) -> Option<Firing> {
        let count = day.mention_count;
        let pct = percent_change(count, day.baseline);
        match alert_type {
            AlertType::VolumeThreshold => {
                let threshold = self.policy.volume_threshold as f64;
                (count >= self.policy.volume_threshold).then(|| Firing {
                    threshold,
                    current_value: count as f64,
                    percent_change: pct,
                    priority: AlertPriority::from_ratio(count as f64, threshold),
                    message: format!(
                        "{symbol} mentioned {count} times on {date} (threshold {})",
                        self.policy.volume_threshold
                    ),
                })
            }
            AlertType::PercentChange => {
                let threshold = self.policy.percent_change_threshold;
                let pct = pct?;
                let baseline = day.baseline?;
                (count >= self.policy.min_mentions && pct >= threshold).then(|| Firing {
                    threshold,
                    current_value: pct,
                    percent_change: Some(pct),
                    priority: AlertPriority::from_ratio(pct, threshold),
                    message: format!(
                        "{symbol} mentions up {pct:.1}% on {date}: {count} vs {}-day baseline {baseline:.1}",
                        self.policy.baseline_days
                    ),
                })
            }
        }
    }

    /// Mention counts of `date` with each symbol's rolling baseline.
    async fn load_days(&self, date: NaiveDate) -> Result<BTreeMap<String, SymbolDay>> {
        let date_str = date.to_string();
        let window_start = date
            .checked_sub_days(Days::new(u64::from(self.policy.baseline_days)))
            .unwrap_or(NaiveDate::MIN)
            .to_string();

        let today: Vec<(String, i64)> =
            sqlx::query_as("SELECT symbol, mention_count FROM daily_stats WHERE date = ?1")
                .bind(&date_str)
                .fetch_all(&self.pool)
                .await?;
        let window: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT symbol, date, mention_count FROM daily_stats WHERE date >= ?1 AND date < ?2",
        )
        .bind(&window_start)
        .bind(&date_str)
        .fetch_all(&self.pool)
        .await?;
        let firsts: Vec<(String, String)> = sqlx::query_as(
            "SELECT symbol, MIN(date) FROM daily_stats WHERE date < ?1 GROUP BY symbol",
        )
        .bind(&date_str)
        .fetch_all(&self.pool)
        .await?;

        let mut history: HashMap<String, Vec<(NaiveDate, i64)>> = HashMap::new();
        for (symbol, day, count) in window {
            if let Ok(d) = day.parse::<NaiveDate>() {
                history.entry(symbol).or_default().push((d, count));
            }
        }
        let firsts: HashMap<String, NaiveDate> = firsts
            .into_iter()
            .filter_map(|(s, d)| d.parse().ok().map(|d| (s, d)))
            .collect();

        Ok(today
            .into_iter()
            .map(|(symbol, mention_count)| {
                let window = history.get(&symbol).map(Vec::as_slice).unwrap_or(&[]);
                let baseline = rolling_baseline(
                    firsts.get(&symbol).copied(),
                    window,
                    date,
                    self.policy.baseline_days,
                );
                (
                    symbol,
                    SymbolDay {
                        mention_count,
                        baseline,
                    },
                )
            })
            .collect())
    }

    async fn load_active(&self) -> Result<Vec<TrendAlertRow>> {
        let rows = sqlx::query_as::<_, TrendAlertRow>(
            r"
            SELECT id, symbol, alert_type, threshold, current_value, percent_change,
                   window_minutes, message, priority, active, created_at, updated_at, closed_at
            FROM trend_alerts
            WHERE active = 1
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn open_alert(
    conn: &mut sqlx::SqliteConnection,
    symbol: &str,
    alert_type: AlertType,
    f: &Firing,
    now: &str,
) -> Result<TrendAlertRow> {
    let done = sqlx::query(
        r"
        INSERT INTO trend_alerts (
            symbol, alert_type, threshold, current_value, percent_change, window_minutes,
            message, priority, active, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
        ",
    )
    .bind(symbol)
    .bind(alert_type.to_string())
    .bind(f.threshold)
    .bind(f.current_value)
    .bind(f.percent_change)
    .bind(ALERT_WINDOW_MINUTES)
    .bind(&f.message)
    .bind(f.priority.to_string())
    .bind(now)
    .execute(conn)
    .await?;

    Ok(TrendAlertRow {
        id: done.last_insert_rowid(),
        symbol: symbol.to_string(),
        alert_type: alert_type.to_string(),
        threshold: f.threshold,
        current_value: f.current_value,
        percent_change: f.percent_change,
        window_minutes: ALERT_WINDOW_MINUTES,
        message: f.message.clone(),
        priority: f.priority.to_string(),
        active: true,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        closed_at: None,
    })
}

/// created_at and threshold stay as opened.
async fn refresh_alert(
    conn: &mut sqlx::SqliteConnection,
    id: i64,
    f: &Firing,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE trend_alerts
        SET current_value = ?1, percent_change = ?2, message = ?3, priority = ?4, updated_at = ?5
        WHERE id = ?6 AND active = 1
        ",
    )
    .bind(f.current_value)
    .bind(f.percent_change)
    .bind(&f.message)
    .bind(f.priority.to_string())
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn close_alert(
    conn: &mut sqlx::SqliteConnection,
    mut row: TrendAlertRow,
    now: &str,
) -> Result<TrendAlertRow> {
    sqlx::query(
        "UPDATE trend_alerts SET active = 0, closed_at = ?1, updated_at = ?1 WHERE id = ?2",
    )
    .bind(now)
    .bind(row.id)
    .execute(conn)
    .await?;
    row.active = false;
    row.closed_at = Some(now.to_string());
    row.updated_at = now.to_string();
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::list_alerts;
    use crate::db::test_pool;
    use chrono::TimeZone;

    async fn set_count(pool: &SqlitePool, symbol: &str, date: &str, count: i64) {
        sqlx::query("INSERT OR IGNORE INTO tickers (symbol) VALUES (?1)")
            .bind(symbol)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            r"
            INSERT INTO daily_stats (symbol, date, mention_count, trend_score, rank)
            VALUES (?1, ?2, ?3, ?3, 1)
            ON CONFLICT(symbol, date) DO UPDATE SET mention_count = excluded.mention_count
            ",
        )
        .bind(symbol)
        .bind(date)
        .bind(count)
        .execute(pool)
        .await
        .unwrap();
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        "2026-10-16".parse().unwrap()
    }

    #[tokio::test]
    async fn volume_alert_opens_then_closes_in_place() {
        let pool = test_pool().await;
        let eval = TrendAlertEvaluator::new(pool.clone(), AlertPolicy::default());
        set_count(&pool, "XYZ", "2026-10-16", 12).await;

        let events = eval.evaluate(today(), at(9)).await.unwrap();
        assert_eq!(events.len(), 1);
        let AlertEvent::Opened(opened) = &events[0] else {
            panic!("expected an opened alert, got {events:?}");
        };
        assert_eq!(opened.alert_type, "volume_threshold");
        assert_eq!(opened.threshold, 10.0);
        assert_eq!(opened.current_value, 12.0);
        assert_eq!(opened.priority, "low");
        assert_eq!(opened.percent_change, None);

        set_count(&pool, "XYZ", "2026-10-16", 8).await;
        let events = eval.evaluate(today(), at(10)).await.unwrap();
        let AlertEvent::Closed(closed) = &events[0] else {
            panic!("expected a closed alert, got {events:?}");
        };
        assert_eq!(closed.id, opened.id);

        let all = list_alerts(&pool, None, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].active);
        assert_eq!(all[0].closed_at.as_deref(), Some("2026-10-16T10:00:00Z"));
    }

    #[tokio::test]
    async fn refresh_keeps_created_at_and_emits_nothing() {
        let pool = test_pool().await;
        let eval = TrendAlertEvaluator::new(pool.clone(), AlertPolicy::default());
        set_count(&pool, "GME", "2026-10-16", 10).await;
        eval.evaluate(today(), at(9)).await.unwrap();

        set_count(&pool, "GME", "2026-10-16", 31).await;
        let events = eval.evaluate(today(), at(11)).await.unwrap();
        assert!(events.is_empty());

        let active = list_alerts(&pool, Some(true), Some("GME")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].created_at, "2026-10-16T09:00:00Z");
        assert_eq!(active[0].updated_at, "2026-10-16T11:00:00Z");
        assert_eq!(active[0].current_value, 31.0);
        assert_eq!(active[0].priority, "high");
    }

    #[tokio::test]
    async fn a_new_crossing_after_close_opens_a_new_row() {
        let pool = test_pool().await;
        let eval = TrendAlertEvaluator::new(pool.clone(), AlertPolicy::default());
        set_count(&pool, "AMC", "2026-10-16", 15).await;
        eval.evaluate(today(), at(9)).await.unwrap();
        set_count(&pool, "AMC", "2026-10-16", 1).await;
        eval.evaluate(today(), at(10)).await.unwrap();
        set_count(&pool, "AMC", "2026-10-16", 15).await;
        eval.evaluate(today(), at(11)).await.unwrap();

        let all = list_alerts(&pool, None, Some("AMC")).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|a| a.active).count(), 1);
    }

    #[tokio::test]
    async fn percent_alert_needs_baseline_and_min_mentions() {
        let pool = test_pool().await;
        let eval = TrendAlertEvaluator::new(pool.clone(), AlertPolicy::default());
        for day in 9..=15 {
            set_count(&pool, "TSLA", &format!("2026-10-{day:02}"), 3).await;
        }
        set_count(&pool, "TSLA", "2026-10-16", 9).await;
        set_count(&pool, "NEW", "2026-10-16", 9).await;

        let events = eval.evaluate(today(), at(9)).await.unwrap();
        assert_eq!(events.len(), 1);
        let AlertEvent::Opened(row) = &events[0] else {
            panic!("expected an opened alert");
        };
        assert_eq!(row.symbol, "TSLA");
        assert_eq!(row.alert_type, "percent_change");
        assert_eq!(row.percent_change, Some(200.0));
        assert_eq!(row.threshold, 100.0);
        assert_eq!(row.priority, "medium");
    }

    #[tokio::test]
    async fn vanished_symbol_closes_its_alert() {
        let pool = test_pool().await;
        let eval = TrendAlertEvaluator::new(pool.clone(), AlertPolicy::default());
        set_count(&pool, "BB", "2026-10-16", 20).await;
        eval.evaluate(today(), at(9)).await.unwrap();
        sqlx::query("DELETE FROM daily_stats")
            .execute(&pool)
            .await
            .unwrap();

        let events = eval.evaluate(today(), at(10)).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Closed(r)] if r.symbol == "BB"));
    }

    #[tokio::test]
    async fn small_counts_never_fire_percent_alerts() {
        let eval = TrendAlertEvaluator::new(test_pool().await, AlertPolicy::default());
        let day = SymbolDay {
            mention_count: 4,
            baseline: Some(1.0),
        };
        assert!(eval.check(AlertType::PercentChange, "X", "2026-10-16", day).is_none());
        let day = SymbolDay {
            mention_count: 5,
            baseline: Some(1.0),
        };
        assert!(eval.check(AlertType::PercentChange, "X", "2026-10-16", day).is_some());
    }
}
