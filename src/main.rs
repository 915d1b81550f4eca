mod aggregator;
mod alerts;
mod api;
mod config;
mod db;
mod error;
mod export;
mod extractor;
mod feed;
mod pipeline;
mod sentiment;
mod types;
mod whitelist;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::AlertEvent;
use crate::api::health::HealthState;
use crate::api::latency::IngestLatency;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY, CONTEXT_WINDOW_CHARS};
use crate::db::models::TrendAlertRow;
use crate::db::MentionWriter;
use crate::error::{AppError, Result};
use crate::extractor::TickerExtractor;
use crate::pipeline::CycleRunner;
use crate::sentiment::{scorer_for, SentimentScorer};
use crate::whitelist::{Stoplist, WhitelistIndex};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;

    // --- Whitelist and stoplist snapshots ---
    let whitelist = Arc::new(WhitelistIndex::load(&cfg.whitelist_path)?);
    if whitelist.active_count() == 0 {
        return Err(AppError::Whitelist(format!(
            "{} has no active symbols",
            cfg.whitelist_path.display()
        )));
    }
    let stoplist = Arc::new(match &cfg.stoplist_path {
        Some(path) => Stoplist::load(path)?,
        None => Stoplist::default(),
    });
    let synced = db::sync_tickers(&pool, &whitelist).await?;
    info!(
        active = whitelist.active_count(),
        stopwords = stoplist.len(),
        "Synced {synced} tickers"
    );

    // --- Writer, feed and shared state ---
    let extractor = TickerExtractor::new(Arc::clone(&whitelist), Arc::clone(&stoplist))
        .with_context_chars(CONTEXT_WINDOW_CHARS);
    let scorer: Arc<dyn SentimentScorer> = Arc::from(scorer_for(cfg.sentiment));
    let writer = Arc::new(MentionWriter::new(pool.clone(), extractor, scorer));
    let feed = feed::from_config(&cfg)?;
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(IngestLatency::new());

    // --- Alert notification sink ---
    let (alert_tx, alert_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let sink_health = Arc::clone(&health);
    let sink = tokio::spawn(async move { alert_consumer(alert_rx, sink_health).await });

    // --- HTTP API server ---
    if !cfg.run_once {
        let api_state = ApiState {
            pool: pool.clone(),
            health: Arc::clone(&health),
            latency: Arc::clone(&latency),
            min_mentions: cfg.alert_policy.min_mentions,
        };
        let app = router(api_state);
        let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!("HTTP API listening on {bind_addr}");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP API stopped: {e}");
            }
        });
    }

    let mut runner = CycleRunner::new(
        &cfg,
        pool.clone(),
        feed,
        writer,
        Arc::clone(&health),
        Arc::clone(&latency),
        alert_tx,
    );

    // --- Shutdown signal ---
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("Ctrl-C handler unavailable: {e}");
                // Keep the sender alive so no cycle is cancelled.
                std::future::pending::<()>().await;
            }
        }
    });

    // --- Cycle loop ---
    if cfg.run_once {
        runner.run_cycle_until(shutdown(shutdown_rx.clone())).await?;
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.cycle_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = cfg.cycle_interval_secs,
            subreddit = %cfg.subreddit,
            "Polling started"
        );
        loop {
            tokio::select! {
                Ok(()) = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = runner.run_cycle_until(shutdown(shutdown_rx.clone())).await {
                        error!("Cycle could not be logged: {e}");
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    // Dropping the runner closes the alert channel so the sink drains and exits.
    drop(runner);
    if let Err(e) = sink.await {
        warn!("Alert sink ended abnormally: {e}");
    }
    pool.close().await;
    Ok(())
}

/// Resolves once shutdown has been requested. Never resolves if the signal
/// sender is gone without having requested it.
async fn shutdown(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Consumes committed alert transitions and renders them to the log.
async fn alert_consumer(mut rx: mpsc::Receiver<AlertEvent>, health: Arc<HealthState>) {
    while let Some(event) = rx.recv().await {
        match &event {
            AlertEvent::Opened(row) => log_alert_opened(row),
            AlertEvent::Closed(row) => log_alert_closed(row),
        }
        health.inc_alerts_emitted();
    }
}

fn log_alert_opened(a: &TrendAlertRow) {
    let pct = a
        .percent_change
        .map(|p| format!("{p:+.0}%"))
        .unwrap_or_else(|| "n/a".to_string());
    info!(
        event = "ALERT_OPEN",
        id = a.id,
        symbol = %a.symbol,
        alert_type = %a.alert_type,
        threshold = a.threshold,
        current_value = a.current_value,
        priority = %a.priority,
        "ALERT OPEN   | {} | {} | value: {:.1} (threshold {:.1}) | vs baseline: {} | priority: {}",
        a.symbol, a.alert_type, a.current_value, a.threshold, pct, a.priority,
    );
}

fn log_alert_closed(a: &TrendAlertRow) {
    let closed_at = a.closed_at.as_deref().unwrap_or("n/a");
    info!(
        event = "ALERT_CLOSE",
        id = a.id,
        symbol = %a.symbol,
        alert_type = %a.alert_type,
        opened_at = %a.created_at,
        closed_at = %closed_at,
        "ALERT CLOSE  | {} | {} | opened: {} | closed: {}",
        a.symbol, a.alert_type, a.created_at, closed_at,
    );
}
