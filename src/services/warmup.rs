//! Startup warm-up for the default playlist
//!
//! Runs once as a background task so the first client request finds a
//! document ready. Retries a fixed number of times, stopping at the first
//! success. With the file backend an existing document counts as success.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::models::PlaylistParams;
use crate::services::builder::PlaylistBuilder;

/// Configuration for the warm-up task
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// Build attempts before giving up
    pub attempts: u32,
    /// Pause between failed attempts
    pub delay: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

/// Result of a warm-up run
#[derive(Debug, Default)]
pub struct WarmupResult {
    pub attempts: u32,
    pub bytes: usize,
    pub errors: Vec<String>,
}

impl WarmupResult {
    pub fn is_success(&self) -> bool {
        self.bytes > 0
    }
}

/// Build the default playlist, retrying on failure
pub async fn run_warmup(builder: &PlaylistBuilder, config: &WarmupConfig) -> WarmupResult {
    let mut result = WarmupResult::default();
    let params = PlaylistParams::default();

    for attempt in 1..=config.attempts {
        result.attempts = attempt;

        match builder.build(&params).await {
            Ok(payload) => {
                result.bytes = payload.len();
                tracing::info!(attempt = attempt, bytes = payload.len(), "Startup playlist initialization complete");
                return result;
            }
            Err(e) => {
                tracing::warn!(attempt = attempt, error = %e, "Startup playlist initialization attempt failed");
                result.errors.push(e.to_string());
            }
        }

        if attempt < config.attempts {
            tracing::info!("Retrying in {}s", config.delay.as_secs());
            time::sleep(config.delay).await;
        }
    }

    tracing::error!(
        attempts = config.attempts,
        "Failed to initialize playlist after several attempts during startup"
    );
    result
}

/// Start the background warm-up task
///
/// This should be spawned as a background task using `tokio::spawn`.
pub async fn start_warmup_task(builder: Arc<PlaylistBuilder>, config: WarmupConfig) {
    tracing::info!(
        "Starting playlist warm-up (attempts: {}, delay: {}s)",
        config.attempts,
        config.delay.as_secs()
    );

    run_warmup(&builder, &config).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FetchMode};
    use crate::models::CategoryGroup;
    use crate::services::cache::test_clock::ManualClock;
    use crate::services::cache::CacheBackendKind;
    use crate::services::test_support::spawn_upstream;
    use axum::{http::StatusCode, routing::get, Router};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(fail_first: usize) -> WarmupConfig {
        WarmupConfig {
            attempts: (fail_first + 2) as u32,
            delay: Duration::from_millis(10),
        }
    }

    async fn flaky_builder(fail_first: usize, hits: Arc<AtomicUsize>) -> PlaylistBuilder {
        let router = Router::new().route(
            "/playlist",
            get(move || {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < fail_first {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok("#EXTINF:-1,ok\nhttp://127.0.0.1:6878/ace/getstream?infohash=ok\n")
                    }
                }
            }),
        );
        let base = spawn_upstream(router).await;

        let mut config = Config::default();
        config.fetch_mode = FetchMode::FanOut;
        config.category_url = format!("{}/playlist", base);
        config.categories = vec![CategoryGroup::new("sport", "Спорт")];
        config.cache_backend = CacheBackendKind::Memory;

        PlaylistBuilder::new(&config, ManualClock::new(Utc::now())).unwrap()
    }

    #[tokio::test]
    async fn test_warmup_retries_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let builder = flaky_builder(2, hits.clone()).await;

        let result = run_warmup(&builder, &fast_config(2)).await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_warmup_gives_up_after_configured_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let builder = flaky_builder(usize::MAX, hits.clone()).await;
        let config = WarmupConfig {
            attempts: 3,
            delay: Duration::from_millis(1),
        };

        let result = run_warmup(&builder, &config).await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
