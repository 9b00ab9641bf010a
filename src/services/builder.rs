//! Playlist assembly: fetch, transform, render, cache.

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::config::{Config, FetchMode};
use crate::error::ProxyError;
use crate::models::{CategoryGroup, PlaylistParams};
use crate::services::cache::{CacheBackend, CacheBackendKind, CacheKey, CacheStats, Clock, PlaylistCache};
use crate::services::fetcher::UpstreamFetcher;
use crate::services::m3u_transformer::{self, PlaylistTransformer};
use crate::services::metrics;
use crate::services::rewriter::{EngineMode, EngineTarget, RewritePolicy, StreamRewriter};

/// Where playlist content comes from
#[derive(Debug, Clone)]
pub enum PlaylistSource {
    Paged {
        search_url: Url,
        page_size: usize,
    },
    FanOut {
        category_url: Url,
        categories: Vec<CategoryGroup>,
        concurrency: usize,
    },
}

impl PlaylistSource {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(match config.fetch_mode {
            FetchMode::Paged => PlaylistSource::Paged {
                search_url: Url::parse(&config.search_url)?,
                page_size: config.page_size,
            },
            FetchMode::FanOut => PlaylistSource::FanOut {
                category_url: Url::parse(&config.category_url)?,
                categories: config.categories.clone(),
                concurrency: config.fanout_concurrency,
            },
        })
    }

    fn mode(&self) -> &'static str {
        match self {
            PlaylistSource::Paged { .. } => "paged",
            PlaylistSource::FanOut { .. } => "fanout",
        }
    }
}

/// Builds playlist documents and keeps them cached
pub struct PlaylistBuilder {
    source: PlaylistSource,
    fetcher: UpstreamFetcher,
    transformer: PlaylistTransformer,
    cache: PlaylistCache,
    policy: RewritePolicy,
    engine_mode: EngineMode,
    engine: EngineTarget,
    content_param: String,
    epg_url: Option<String>,
    catchup_days: u32,
}

impl PlaylistBuilder {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if config.engine_mode == EngineMode::CallerSupplied
            && config.cache_backend == CacheBackendKind::File
        {
            anyhow::bail!(
                "ENGINE_MODE=caller-supplied-engine needs CACHE_BACKEND=memory: \
                 the file backend keeps one document for every caller"
            );
        }

        let backend = match config.cache_backend {
            CacheBackendKind::Memory => CacheBackend::Memory {
                max_entries: config.cache_max_entries,
            },
            CacheBackendKind::File => CacheBackend::File {
                path: config.playlist_file.clone(),
            },
        };

        Ok(Self {
            source: PlaylistSource::from_config(config)?,
            fetcher: UpstreamFetcher::new(
                &config.user_agent,
                config.fetch_timeouts(),
                config.fanout_concurrency,
            )?,
            transformer: PlaylistTransformer::new(
                config.default_group.clone(),
                config.passthrough_directives.clone(),
            )
            .with_grouping(config.grouping()),
            cache: PlaylistCache::new(backend, config.playlist_ttl(), clock),
            policy: config.rewrite_policy,
            engine_mode: config.engine_mode,
            engine: config.engine(),
            content_param: config.content_id_param.clone(),
            epg_url: config.epg_url.clone(),
            catchup_days: config.catchup_days,
        })
    }

    pub fn ttl_secs(&self) -> i64 {
        self.cache.ttl().num_seconds()
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Validate parameters and resolve the rewriter and cache key for one request
    fn prepare(&self, params: &PlaylistParams) -> Result<(StreamRewriter, CacheKey), ProxyError> {
        let engine = self.engine.for_request(self.engine_mode, params)?;
        let rewriter = StreamRewriter::new(self.policy, engine, self.content_param.clone());

        let key = if self.cache.is_keyed() {
            CacheKey::from_params(params)
        } else {
            CacheKey::global()
        };

        Ok((rewriter, key))
    }

    /// Cached playlist document for `params`, rebuilt when stale
    pub async fn build(&self, params: &PlaylistParams) -> Result<Bytes, ProxyError> {
        let (rewriter, key) = self.prepare(params)?;
        self.cache
            .get_or_build(&key, || self.render(params, &rewriter))
            .await
    }

    /// Rebuild regardless of freshness; returns the number of entries served
    pub async fn refresh(&self, params: &PlaylistParams) -> Result<usize, ProxyError> {
        let (rewriter, key) = self.prepare(params)?;
        let payload = self
            .cache
            .refresh(&key, || self.render(params, &rewriter))
            .await?;
        Ok(count_entries(&payload))
    }

    async fn render(&self, params: &PlaylistParams, rewriter: &StreamRewriter) -> Result<Bytes, ProxyError> {
        let result = self.fetch_and_render(params, rewriter).await;
        metrics::record_build(result.is_ok());
        result
    }

    async fn fetch_and_render(
        &self,
        params: &PlaylistParams,
        rewriter: &StreamRewriter,
    ) -> Result<Bytes, ProxyError> {
        let header = m3u_transformer::document_header(self.epg_url.as_deref(), self.catchup_days);

        let entries = match &self.source {
            PlaylistSource::Paged {
                search_url,
                page_size,
            } => {
                let channels = self
                    .fetcher
                    .fetch_search_pages(search_url, *page_size, params)
                    .await?;

                let transformed = self
                    .transformer
                    .entries_from_search(&channels, search_url, rewriter);

                tracing::info!(
                    channels = channels.len(),
                    entries = transformed.entries.len(),
                    skipped = transformed.skipped,
                    filtered = transformed.filtered,
                    "Search results converted"
                );
                transformed.entries
            }
            PlaylistSource::FanOut {
                category_url,
                categories,
                concurrency,
            } => {
                let results = self
                    .fetcher
                    .fetch_categories(category_url, categories, params, *concurrency)
                    .await;

                if !results.is_empty() && results.iter().all(|r| !r.is_success()) {
                    return Err(ProxyError::CacheBuildFailure(format!(
                        "all {} category requests failed",
                        results.len()
                    )));
                }

                let mut entries = Vec::new();
                for (category, result) in categories.iter().zip(results) {
                    let Ok(body) = result.body else {
                        continue;
                    };

                    let transformed = self.transformer.transform_playlist(
                        &body,
                        Some(&category.display_label),
                        rewriter,
                    );
                    for warning in &transformed.warnings {
                        tracing::debug!(category = %category.upstream_key, "{}", warning);
                    }
                    if transformed.skipped > 0 {
                        tracing::info!(
                            category = %category.upstream_key,
                            skipped = transformed.skipped,
                            "Entries without content identifier skipped"
                        );
                    }
                    entries.extend(transformed.entries);
                }
                entries
            }
        };

        tracing::info!(mode = self.source.mode(), entries = entries.len(), "Playlist built");

        Ok(Bytes::from(m3u_transformer::render_document(&header, &entries)))
    }
}

lazy_static! {
    static ref GROUP_TITLE_REGEX: Regex = Regex::new(r#" group-title="[^"]*""#).unwrap();
}

/// Distinct entries in a rendered document
///
/// An entry listed under several groups is rendered once per group; blocks
/// that differ only in their group count once.
fn count_entries(payload: &[u8]) -> usize {
    let text = String::from_utf8_lossy(payload);
    let mut seen: HashSet<(String, Option<&str>)> = HashSet::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("#EXTINF:") {
            continue;
        }
        let info = GROUP_TITLE_REGEX.replace(line, "").into_owned();

        let mut url = None;
        while let Some(next) = lines.peek() {
            if next.starts_with("#EXTINF:") {
                break;
            }
            if !next.starts_with('#') && !next.trim().is_empty() {
                url = Some(*next);
            }
            lines.next();
        }
        seen.insert((info, url));
    }

    seen.len()
}
