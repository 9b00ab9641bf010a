use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::FetchMode;
use crate::services::metrics;
use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "AceStream Proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "runtime": "rust"
    }))
}

/// Cache stats
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStats {
    entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_built_at: Option<DateTime<Utc>>,
    ttl_secs: i64,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime: u64,
    fetch_mode: &'static str,
    cache: CacheStats,
}

/// GET /health - Service and cache status
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let stats = state.builder.stats().await;

    // Nothing built yet is not an error: the warm-up may still be running
    let status = if stats.entries > 0 { "ok" } else { "warming" };

    let health = HealthResponse {
        status: status.to_string(),
        uptime,
        fetch_mode: match state.config.fetch_mode {
            FetchMode::Paged => "paged",
            FetchMode::FanOut => "fanout",
        },
        cache: CacheStats {
            entries: stats.entries,
            last_built_at: stats.last_built_at,
            ttl_secs: state.builder.ttl_secs(),
        },
    };

    Json(health)
}

/// GET /metrics - counters in Prometheus text format
pub async fn metrics() -> Response {
    match metrics::encode() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /live - the process is up and serving
pub async fn live() -> StatusCode {
    StatusCode::NO_CONTENT
}
