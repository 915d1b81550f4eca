use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::aggregator::DailyAggregator;
use crate::alerts::{AlertEvent, TrendAlertEvaluator};
use crate::api::health::HealthState;
use crate::api::latency::IngestLatency;
use crate::config::{Config, FETCH_BACKOFF_MS};
use crate::db::models::CrawlLogRow;
use crate::db::queries::{insert_crawl_log, redditors_missing_karma};
use crate::db::MentionWriter;
use crate::error::{AppError, Result};
use crate::export;
use crate::feed::{fetch_with_retry, FeedSource, FetchStats};
use crate::types::{ContentUnit, CycleStatus, FeedBatch, SourceKind};

/// Messages kept for the crawl log; later errors are counted only.
const MAX_RECORDED_ERRORS: usize = 20;

/// Counters of one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CycleTally {
    posts_ok: i64,
    comments_ok: i64,
    units_failed: i64,
    /// Fetch, upsert, aggregation, alert and export failures.
    other_errors: i64,
    mentions: i64,
    /// Committed units that had been processed by an earlier cycle.
    refetched: i64,
    /// UTC days of units that produced at least one candidate.
    touched: BTreeSet<NaiveDate>,
    messages: Vec<String>,
}

impl CycleTally {
    fn note(&mut self, msg: String) {
        if self.messages.len() < MAX_RECORDED_ERRORS {
            self.messages.push(msg);
        }
    }

    fn phase_error(&mut self, msg: String) {
        self.other_errors += 1;
        self.note(msg);
    }

    fn error_count(&self) -> i64 {
        self.units_failed + self.other_errors
    }
}

/// One polling cycle: fetch, write posts then comments, enrich authors,
/// aggregate the touched days, evaluate today's alerts, export, and log the run.
pub struct CycleRunner {
    pool: SqlitePool,
    feed: Box<dyn FeedSource>,
    writer: Arc<MentionWriter>,
    aggregator: DailyAggregator,
    evaluator: TrendAlertEvaluator,
    health: Arc<HealthState>,
    latency: Arc<IngestLatency>,
    alert_tx: mpsc::Sender<AlertEvent>,
    subreddit: String,
    workers: usize,
    enrich_cap: usize,
    export_dir: Option<PathBuf>,
    backoff_ms: &'static [u64],
    seq: u64,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &Config,
        pool: SqlitePool,
        feed: Box<dyn FeedSource>,
        writer: Arc<MentionWriter>,
        health: Arc<HealthState>,
        latency: Arc<IngestLatency>,
        alert_tx: mpsc::Sender<AlertEvent>,
    ) -> Self {
        Self {
            aggregator: DailyAggregator::new(pool.clone(), cfg.trend_weights),
            evaluator: TrendAlertEvaluator::new(pool.clone(), cfg.alert_policy.clone()),
            pool,
            feed,
            writer,
            health,
            latency,
            alert_tx,
            subreddit: cfg.subreddit.clone(),
            workers: cfg.ingest_workers.max(1),
            enrich_cap: cfg.enrich_authors_per_cycle,
            export_dir: cfg.export_dir.clone(),
            backoff_ms: FETCH_BACKOFF_MS,
            seq: 0,
        }
    }

    /// Runs one cycle, abandoning it as failed if `cancel` completes first.
    pub async fn run_cycle_until(&mut self, cancel: impl Future<Output = ()>) -> Result<CrawlLogRow> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Runs one cycle as if started at `now`. Exactly one crawl log row is
    /// written whatever the outcome, including cancellation; only a failure to
    /// write it is returned. Units committed before a cancel stay committed.
    pub async fn run_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        cancel: impl Future<Output = ()>,
    ) -> Result<CrawlLogRow> {
        self.seq += 1;
        let run_id = format!("{}-{:04}", now.format("%Y%m%dT%H%M%SZ"), self.seq);
        let started = Instant::now();
        self.health.cycle_started();
        info!(run_id = %run_id, feed = self.feed.name(), "Cycle started");

        let mut stats = FetchStats::default();
        let mut tally = CycleTally::default();
        let mut subreddit_id = self.subreddit.clone();

        let finished_work = {
            let work = self.fetch_and_process(&run_id, now, &mut stats, &mut tally, &mut subreddit_id);
            tokio::select! {
                status = work => Some(status),
                _ = cancel => None,
            }
        };
        let status = finished_work.unwrap_or_else(|| {
            warn!(run_id = %run_id, "Cycle cancelled; uncommitted units are retried next run");
            tally.phase_error("cancelled before completion".to_string());
            CycleStatus::Failed
        });

        let elapsed = started.elapsed();
        let finished =
            now + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let log = CrawlLogRow {
            run_id,
            subreddit_id: Some(subreddit_id),
            started_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            finished_at: finished.to_rfc3339_opts(SecondsFormat::Secs, true),
            posts_processed: tally.posts_ok,
            comments_processed: tally.comments_ok,
            mentions_found: tally.mentions,
            error_count: tally.error_count(),
            status: status.to_string(),
            error_message: (!tally.messages.is_empty()).then(|| tally.messages.join("; ")),
            api_calls: stats.api_calls as i64,
            elapsed_seconds: elapsed.as_secs_f64(),
        };

        self.health.cycle_finished(status, finished.timestamp());
        insert_crawl_log(&self.pool, &log).await?;
        info!(
            run_id = %log.run_id,
            status = %log.status,
            posts = log.posts_processed,
            comments = log.comments_processed,
            mentions = log.mentions_found,
            refetched = tally.refetched,
            errors = log.error_count,
            api_calls = log.api_calls,
            "Cycle finished in {:.2}s",
            log.elapsed_seconds,
        );
        Ok(log)
    }

    async fn fetch_and_process(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
        stats: &mut FetchStats,
        tally: &mut CycleTally,
        subreddit_id: &mut String,
    ) -> CycleStatus {
        match fetch_with_retry(self.feed.as_ref(), self.backoff_ms, stats).await {
            Err(e) => {
                error!(run_id = %run_id, attempts = stats.attempts, "Fetch failed: {e}");
                tally.phase_error(format!("fetch: {e}"));
                CycleStatus::Failed
            }
            Ok(batch) => {
                if let Some(sr) = &batch.subreddit {
                    *subreddit_id = sr.id.clone();
                }
                if stats.failed_requests > 0 {
                    tally.other_errors += stats.failed_requests as i64;
                    tally.note(format!("{} feed sub-requests failed", stats.failed_requests));
                }
                self.process_batch(batch, now, stats, tally).await
            }
        }
    }

    async fn process_batch(
        &self,
        batch: FeedBatch,
        now: DateTime<Utc>,
        stats: &mut FetchStats,
        tally: &mut CycleTally,
    ) -> CycleStatus {
        if let Some(sr) = &batch.subreddit {
            if let Err(e) = self.writer.upsert_subreddit(sr).await {
                warn!(subreddit = %sr.id, "Subreddit upsert failed: {e}");
                tally.phase_error(format!("subreddit {}: {e}", sr.id));
            }
        }
        if !batch.redditors.is_empty() {
            if let Err(e) = self.writer.upsert_redditors(&batch.redditors).await {
                warn!("Redditor upsert failed: {e}");
                tally.phase_error(format!("redditors: {e}"));
            }
        }

        let total = (batch.posts.len() + batch.comments.len()) as i64;
        // Posts first so comments find their parents.
        self.ingest_all(batch.posts.into_iter().map(ContentUnit::Post).collect(), tally)
            .await;
        self.ingest_all(batch.comments.into_iter().map(ContentUnit::Comment).collect(), tally)
            .await;
        self.enrich_authors(stats, tally).await;

        if let Err(e) = self.post_ingest(now, &tally.touched).await {
            error!("Post-ingest phase failed: {e}");
            tally.phase_error(format!("post-ingest: {e}"));
            return CycleStatus::Failed;
        }
        if let Some(dir) = &self.export_dir {
            if let Err(e) = export::write_snapshot(&self.pool, dir).await {
                warn!("Export failed: {e}");
                tally.phase_error(format!("export: {e}"));
            }
        }

        if total > 0 && tally.units_failed == total {
            CycleStatus::Failed
        } else if tally.error_count() > 0 {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        }
    }

    async fn ingest_all(&self, units: Vec<ContentUnit>, tally: &mut CycleTally) {
        let writer = &self.writer;
        let latency = &self.latency;
        let results: Vec<(ContentUnit, Result<_>)> = stream::iter(units)
            .map(|unit| async move {
                let t0 = Instant::now();
                let result = writer.ingest(&unit).await;
                match &result {
                    Ok(_) => latency.record(unit.kind(), t0.elapsed()),
                    Err(_) => latency.record_failure(unit.kind()),
                }
                (unit, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for (unit, result) in results {
            match result {
                Ok(outcome) => {
                    match unit.kind() {
                        SourceKind::Post => tally.posts_ok += 1,
                        SourceKind::Comment => tally.comments_ok += 1,
                    }
                    tally.mentions += outcome.inserted as i64;
                    if outcome.refetched {
                        tally.refetched += 1;
                    }
                    if outcome.candidates > 0 {
                        if let Some(day) = unit_day(&unit) {
                            tally.touched.insert(day);
                        }
                    }
                }
                Err(e) => {
                    warn!(unit = %unit.lock_key(), "Unit failed, retried next cycle: {e}");
                    tally.units_failed += 1;
                    tally.note(format!("{}: {e}", unit.lock_key()));
                }
            }
        }
    }

    /// Looks up karma for up to `enrich_cap` authors never enriched before.
    /// Failed lookups count as cycle errors; the authors are retried next cycle.
    async fn enrich_authors(&self, stats: &mut FetchStats, tally: &mut CycleTally) {
        if self.enrich_cap == 0 {
            return;
        }
        let names = match redditors_missing_karma(&self.pool, self.enrich_cap as i64).await {
            Ok(names) if names.is_empty() => return,
            Ok(names) => names,
            Err(e) => {
                warn!("Author selection failed: {e}");
                tally.phase_error(format!("authors: {e}"));
                return;
            }
        };

        let failed_before = stats.failed_requests;
        let found = match self.feed.lookup_redditors(&names, stats).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Author lookup failed: {e}");
                tally.phase_error(format!("authors: {e}"));
                return;
            }
        };
        let failed = stats.failed_requests - failed_before;
        if failed > 0 {
            tally.other_errors += failed as i64;
            tally.note(format!("{failed} author lookups failed"));
        }
        if found.is_empty() {
            return;
        }
        match self.writer.upsert_redditors(&found).await {
            Ok(n) => info!(requested = names.len(), enriched = n, "Authors enriched"),
            Err(e) => {
                warn!("Author upsert failed: {e}");
                tally.phase_error(format!("authors: {e}"));
            }
        }
    }

    /// Aggregates every touched day plus today, then evaluates today's alerts
    /// and hands the transitions to the notification sink.
    async fn post_ingest(&self, now: DateTime<Utc>, touched: &BTreeSet<NaiveDate>) -> Result<()> {
        let today = now.date_naive();
        let mut days = touched.clone();
        days.insert(today);
        for day in days {
            self.aggregator.aggregate(day, None).await?;
        }

        let events = self.evaluator.evaluate(today, now).await?;
        for event in events {
            self.alert_tx
                .send(event)
                .await
                .map_err(|e| AppError::ChannelSend(e.to_string()))?;
        }
        Ok(())
    }
}

fn unit_day(unit: &ContentUnit) -> Option<NaiveDate> {
    let ts = match unit {
        ContentUnit::Post(p) => p.created_utc,
        ContentUnit::Comment(c) => c.created_utc,
    };
    DateTime::<Utc>::from_timestamp(ts, 0).map(|t| t.date_naive())
}
