use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::ProxyError;
use crate::models::{PlaylistParams, RefreshResponse};
use crate::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegurl; charset=utf-8";
const PLAYLIST_DISPOSITION: &str = "attachment; filename=playlist.m3u8";

/// GET|HEAD /playlist(.m3u8)[/] - Aggregated playlist
///
/// Query parameters are forwarded upstream and select the cached document.
pub async fn serve_playlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, ProxyError> {
    let params = PlaylistParams::new(query);
    let payload = state.builder.build(&params).await?;

    let cache_control = format!("max-age={}, private, must-revalidate", state.builder.ttl_secs());

    let mut response = payload.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_CONTENT_TYPE));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(PLAYLIST_DISPOSITION));
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    Ok(response)
}

/// POST /refresh - Rebuild the playlist now
pub async fn refresh_playlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<RefreshResponse>, ProxyError> {
    let params = PlaylistParams::new(query);
    let items = state.builder.refresh(&params).await?;

    tracing::info!(items = items, "Playlist refreshed on request");

    Ok(Json(RefreshResponse {
        updated: true,
        items,
    }))
}
