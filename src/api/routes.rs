use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::{IngestLatency, LatencySummary};
use crate::config::REPORT_TOP_N;
use crate::db::models::{CrawlLogRow, DailyStatRow, GrowthRow, MentionRow, TrendAlertRow};
use crate::db::queries::{self, ExportFilter};
use crate::error::AppError;
use crate::export::to_csv;
use crate::types::{CycleStatus, SourceKind};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
    pub latency: Arc<IngestLatency>,
    /// Floor of the growth report (MIN_MENTIONS).
    pub min_mentions: i64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/mentions", get(get_mentions))
        .route("/mentions.csv", get(get_mentions_csv))
        .route("/daily_stats", get(get_daily_stats))
        .route("/daily_stats.csv", get(get_daily_stats_csv))
        .route("/alerts", get(get_alerts))
        .route("/crawl_logs", get(get_crawl_logs))
        .route("/report/top", get(get_report_top))
        .route("/report/growth", get(get_report_growth))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AlertsQuery {
    pub active: Option<bool>,
    pub symbol: Option<String>,
}

#[derive(Deserialize)]
pub struct CrawlLogsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    /// Defaults to today (UTC).
    pub date: Option<NaiveDate>,
    pub n: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cycle_running: bool,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<String>,
    pub last_status: Option<CycleStatus>,
    pub alerts_emitted: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub posts: LatencySummary,
    pub comments: LatencySummary,
}

#[derive(Serialize)]
pub struct TopReport {
    pub date: NaiveDate,
    pub symbols: Vec<DailyStatRow>,
}

#[derive(Serialize)]
pub struct GrowthReport {
    pub date: NaiveDate,
    pub min_mentions: i64,
    pub symbols: Vec<GrowthRow>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn csv_response(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body)
}

async fn get_mentions(
    State(state): State<ApiState>,
    Query(filter): Query<ExportFilter>,
) -> Result<Json<Vec<MentionRow>>, AppError> {
    Ok(Json(queries::list_mentions(&state.pool, &filter).await?))
}

async fn get_mentions_csv(
    State(state): State<ApiState>,
    Query(filter): Query<ExportFilter>,
) -> Result<impl IntoResponse, AppError> {
    let rows = queries::list_mentions(&state.pool, &filter).await?;
    Ok(csv_response(to_csv(&rows)?))
}

async fn get_daily_stats(
    State(state): State<ApiState>,
    Query(filter): Query<ExportFilter>,
) -> Result<Json<Vec<DailyStatRow>>, AppError> {
    Ok(Json(queries::list_daily_stats(&state.pool, &filter).await?))
}

async fn get_daily_stats_csv(
    State(state): State<ApiState>,
    Query(filter): Query<ExportFilter>,
) -> Result<impl IntoResponse, AppError> {
    let rows = queries::list_daily_stats(&state.pool, &filter).await?;
    Ok(csv_response(to_csv(&rows)?))
}

async fn get_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<TrendAlertRow>>, AppError> {
    let symbol = params.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(queries::list_alerts(&state.pool, params.active, symbol).await?))
}

async fn get_crawl_logs(
    State(state): State<ApiState>,
    Query(params): Query<CrawlLogsQuery>,
) -> Result<Json<Vec<CrawlLogRow>>, AppError> {
    let limit = params.limit.unwrap_or(50);
    if limit < 1 {
        return Err(AppError::BadRequest("limit must be >= 1".to_string()));
    }
    Ok(Json(queries::list_crawl_logs(&state.pool, limit).await?))
}

async fn get_report_top(
    State(state): State<ApiState>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<TopReport>, AppError> {
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let n = params.n.unwrap_or(REPORT_TOP_N);
    if n < 1 {
        return Err(AppError::BadRequest("n must be >= 1".to_string()));
    }
    let symbols = queries::top_symbols(&state.pool, date, n).await?;
    Ok(Json(TopReport { date, symbols }))
}

async fn get_report_growth(
    State(state): State<ApiState>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<GrowthReport>, AppError> {
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let n = params.n.unwrap_or(REPORT_TOP_N);
    if n < 1 {
        return Err(AppError::BadRequest("n must be >= 1".to_string()));
    }
    let symbols = queries::growth_report(&state.pool, date, state.min_mentions, n).await?;
    Ok(Json(GrowthReport {
        date,
        min_mentions: state.min_mentions,
        symbols,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last_cycle_at = h
        .last_cycle_at()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
    Json(HealthResponse {
        status: "ok",
        cycle_running: h.cycle_running(),
        cycles_completed: h.cycles_completed(),
        last_cycle_at,
        last_status: h.last_status(),
        alerts_emitted: h.alerts_emitted(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        posts: state.latency.summary(SourceKind::Post),
        comments: state.latency.summary(SourceKind::Comment),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use axum::http::StatusCode;
    use std::time::Duration;

    async fn state() -> ApiState {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO tickers (symbol) VALUES ('GME'), ('AMC'), ('TSLA')")
            .execute(&pool)
            .await
            .unwrap();
        for (symbol, date, count) in [
            ("GME", "2026-10-15", 4),
            ("GME", "2026-10-16", 12),
            ("AMC", "2026-10-15", 5),
            ("AMC", "2026-10-16", 6),
            ("TSLA", "2026-10-16", 7),
        ] {
            sqlx::query(
                "INSERT INTO daily_stats (symbol, date, mention_count, trend_score) VALUES (?1, ?2, ?3, ?3)",
            )
            .bind(symbol)
            .bind(date)
            .bind(count)
            .execute(&pool)
            .await
            .unwrap();
        }
        ApiState {
            pool,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(IngestLatency::new()),
            min_mentions: 5,
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn top_report_orders_by_mentions() {
        let st = state().await;
        let Json(report) = get_report_top(
            State(st),
            Query(ReportQuery {
                date: Some(day("2026-10-16")),
                n: Some(2),
            }),
        )
        .await
        .unwrap();
        let symbols: Vec<_> = report.symbols.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["GME", "TSLA"]);
    }

    #[tokio::test]
    async fn growth_report_needs_doubling_and_floor() {
        let st = state().await;
        let Json(report) = get_report_growth(
            State(st),
            Query(ReportQuery {
                date: Some(day("2026-10-16")),
                n: None,
            }),
        )
        .await
        .unwrap();
        // AMC grew 5 -> 6. TSLA is new today and sorts after GME.
        let got: Vec<_> = report
            .symbols
            .iter()
            .map(|r| (r.symbol.as_str(), r.yesterday, r.growth))
            .collect();
        assert_eq!(got, vec![("GME", Some(4), Some(3.0)), ("TSLA", None, None)]);
    }

    #[tokio::test]
    async fn growth_report_respects_n() {
        let st = state().await;
        let Json(report) = get_report_growth(
            State(st.clone()),
            Query(ReportQuery {
                date: Some(day("2026-10-16")),
                n: Some(1),
            }),
        )
        .await
        .unwrap();
        assert_eq!(report.symbols.len(), 1);
        assert_eq!(report.symbols[0].symbol, "GME");

        let err = get_report_growth(
            State(st),
            Query(ReportQuery {
                date: Some(day("2026-10-16")),
                n: Some(0),
            }),
        )
        .await;
        assert!(matches!(err, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn daily_stats_csv_sets_content_type() {
        let st = state().await;
        let filter = ExportFilter {
            symbol: Some("gme".to_string()),
            ..Default::default()
        };
        let resp = get_daily_stats_csv(State(st), Query(filter))
            .await
            .unwrap()
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn zero_limit_is_a_bad_request() {
        let st = state().await;
        let err = get_crawl_logs(State(st), Query(CrawlLogsQuery { limit: Some(0) }))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_latency_reflect_shared_state() {
        let st = state().await;
        st.health.cycle_finished(CycleStatus::Success, 1_792_108_800);
        st.latency.record(SourceKind::Comment, Duration::from_micros(250));
        st.latency.record_failure(SourceKind::Post);

        let Json(health) = get_health(State(st.clone())).await;
        assert_eq!(health.cycles_completed, 1);
        assert_eq!(health.last_status, Some(CycleStatus::Success));
        assert_eq!(health.last_cycle_at.as_deref(), Some("2026-10-16T00:00:00Z"));

        let Json(latency) = get_stats_latency(State(st)).await;
        assert_eq!((latency.comments.samples, latency.comments.failures), (1, 0));
        assert!(latency.comments.p50_us.is_some());
        assert_eq!((latency.posts.samples, latency.posts.failures), (0, 1));
        assert_eq!(latency.posts.p50_us, None);
    }
}
