mod config;
mod error;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::{
    builder::PlaylistBuilder,
    cache::SystemClock,
    warmup::{start_warmup_task, WarmupConfig},
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub builder: Arc<PlaylistBuilder>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acestream_proxy=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting AceStream Proxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        fetch_mode = ?config.fetch_mode,
        rewrite_policy = %config.rewrite_policy,
        engine_mode = %config.engine_mode,
        cache_backend = ?config.cache_backend,
        ttl_secs = config.playlist_ttl_secs,
        "Configuration loaded"
    );

    let builder = Arc::new(PlaylistBuilder::new(&config, Arc::new(SystemClock))?);
    tracing::info!("Playlist builder initialized");

    // Build the default playlist in the background so the listener comes up immediately
    tokio::spawn(start_warmup_task(
        builder.clone(),
        WarmupConfig {
            attempts: config.warmup_attempts,
            delay: Duration::from_secs(config.warmup_delay_secs),
        },
    ));

    // Build application state
    let state = Arc::new(AppState {
        config,
        builder,
        start_time: Instant::now(),
    });

    let app = routes::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
