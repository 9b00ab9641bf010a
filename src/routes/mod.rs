pub mod health;
pub mod playlist;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

/// Full HTTP surface with middleware
///
/// Playlist paths are served with and without a trailing slash instead of
/// redirecting; some IPTV clients do not follow redirects.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/live", get(health::live))
        // Playlist endpoints (GET also answers HEAD)
        .route("/playlist", get(playlist::serve_playlist))
        .route("/playlist/", get(playlist::serve_playlist))
        .route("/playlist.m3u8", get(playlist::serve_playlist))
        .route("/playlist.m3u8/", get(playlist::serve_playlist))
        .route("/refresh", post(playlist::refresh_playlist))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
