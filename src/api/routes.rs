use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::engine::analyzer::{AnalysisOutcome, ThreatAnalyzer};
use crate::models::event::RawEvent;
use crate::storage::ThreatStore;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ThreatStore>,
    pub analyzer: Arc<ThreatAnalyzer>,
    pub api_key: String,
    pub start_time: Instant,
}

/// `POST /api/logs` -- the ingestion endpoint. The body is parsed by
/// hand rather than through the `Json` extractor so malformed payloads
/// get the flat `{"error": ...}` shape log shippers expect.
pub async fn ingest_log(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let event: RawEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected malformed ingestion payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON"})),
            );
        }
    };

    match state.analyzer.analyze(&event) {
        Ok(AnalysisOutcome::Skipped) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Ok(AnalysisOutcome::Analyzed { .. }) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => {
            error!(error = %e, "Event analysis failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

/// `GET /api/status` -- uptime and headline counters.
pub async fn get_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let last_24h = Utc::now() - ChronoDuration::hours(24);
    let blocked = state.store.blocked_sources()?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "requests_24h": state.store.count_log_entries_since(last_24h)?,
        "blocked_ips": blocked.len(),
    })))
}

/// `GET /api/dashboard-data` -- the aggregates the reporting dashboard
/// renders: KPI counters, chart series, the blocked-IP list, and a
/// short live tail of the raw log.
pub async fn get_dashboard_data(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let last_24h = Utc::now() - ChronoDuration::hours(24);
    let store = &state.store;

    let blocked = store.blocked_sources()?;
    let kpis = json!({
        "total_requests": store.count_log_entries_since(last_24h)?,
        "blocked_ips_count": blocked.len(),
        "top_attacked_urls": pairs_to_json(store.top_attacked_urls_since(last_24h, 5)?, "url"),
        "top_countries": pairs_to_json(store.top_countries_since(last_24h, 5)?, "country"),
    });

    let (avg_bot, avg_human) = store.avg_time_delta_split()?;
    let charts = json!({
        "threat_over_time": store
            .threat_score_timeline_since(last_24h)?
            .into_iter()
            .map(|(minute, total)| json!({"minute": minute, "total_score": total}))
            .collect::<Vec<_>>(),
        "anomaly_types": pairs_to_json(store.anomalies_by_reason_since(last_24h)?, "reason"),
        "requests_by_country": pairs_to_json(store.requests_by_country_since(last_24h, 10)?, "country"),
        "avg_request_time": {"bot": avg_bot, "human": avg_human},
    });

    let blocked_ips = blocked
        .iter()
        .map(|s| json!({"ip": s.ip, "country": s.country, "score": s.score}))
        .collect::<Vec<_>>();

    let live_logs = store
        .recent_log_entries(10)?
        .into_iter()
        .map(|e| {
            json!({
                "timestamp": e.timestamp.format("%H:%M:%S").to_string(),
                "ip": e.ip,
                "country": e.country,
                "url": e.url,
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "kpis": kpis,
        "charts": charts,
        "modal_data": {"blocked_ips": blocked_ips},
        "live_logs": live_logs,
    })))
}

/// `POST /api/reset-blocked` -- flip every blocked source back to
/// Active with a zeroed score.
pub async fn reset_blocked(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let reset = state.store.reset_blocked()?;
    info!(reset = reset, "Blocked sources reset by admin request");
    Ok(Json(json!({"status": "ok", "reset": reset})))
}

/// `POST /api/wipe` -- drop all sources, anomalies, and log entries.
pub async fn wipe_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.store.wipe_all()?;
    info!("All engine state wiped by admin request");
    Ok(Json(json!({"status": "ok"})))
}

fn pairs_to_json(pairs: Vec<(String, u64)>, key: &str) -> Vec<Value> {
    pairs
        .into_iter()
        .map(|(name, count)| json!({key: name, "count": count}))
        .collect()
}

/// Storage failures inside admin handlers surface as 500s with the
/// error text in the body.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        error!(error = %self.0, "Admin API request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": self.0.to_string()})),
        )
            .into_response()
    }
}
