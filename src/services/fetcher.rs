//! Upstream HTTP access
//!
//! Two strategies share one client and one timeout policy:
//!
//! - **paged**: walk a JSON search endpoint page by page; any failure aborts
//! - **fan-out**: one playlist request per category, concurrently; failures
//!   are logged and left out

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::ProxyError;
use crate::models::{CategoryGroup, PlaylistParams, RawUpstreamResult, SearchChannel, SearchResponse};
use crate::services::metrics;

/// Query parameters the fetcher sets itself
pub const RESERVED_PARAMS: &[&str] = &["page", "page_size", "category"];

/// Hard stop for upstreams that keep reporting a larger total
const MAX_PAGES: u32 = 1000;

/// Timeout policy applied to every upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    /// Establishing the TCP/TLS connection
    pub connect: Duration,
    /// Reading the response body once headers arrived
    pub read: Duration,
    /// Sending the request until response headers arrive
    pub write: Duration,
    /// Keeping idle pooled connections around
    pub pool_idle: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(15),
            write: Duration::from_secs(10),
            pool_idle: Duration::from_secs(90),
        }
    }
}

/// HTTP client for the search/category service
///
/// Every request, from every build, takes a permit from one shared limiter,
/// so distinct cache keys rebuilding at once cannot multiply upstream load.
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: Client,
    timeouts: FetchTimeouts,
    limiter: Arc<Semaphore>,
}

impl UpstreamFetcher {
    pub fn new(
        user_agent: &str,
        timeouts: FetchTimeouts,
        max_in_flight: usize,
    ) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeouts.connect)
            .pool_idle_timeout(timeouts.pool_idle)
            .timeout(timeouts.connect + timeouts.write + timeouts.read)
            .gzip(true)
            .build()
            .map_err(|e| ProxyError::transport("<client>", e))?;

        Ok(Self {
            client,
            timeouts,
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
        })
    }

    /// GET a URL and return its body as text
    async fn get_text(&self, url: &Url) -> Result<String, ProxyError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProxyError::transport(url.as_str(), "request limiter closed"))?;

        let response = tokio::time::timeout(self.timeouts.write, self.client.get(url.clone()).send())
            .await
            .map_err(|_| ProxyError::transport(url.as_str(), "timed out waiting for response"))?
            .map_err(|e| ProxyError::transport(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::time::timeout(self.timeouts.read, response.text())
            .await
            .map_err(|_| ProxyError::transport(url.as_str(), "timed out reading body"))?
            .map_err(|e| ProxyError::transport(url.as_str(), e))
    }

    /// Collect every search result, page by page
    ///
    /// Stops once the collected count reaches the reported total or a page
    /// comes back empty. The first failing page fails the whole fetch.
    pub async fn fetch_search_pages(
        &self,
        search_url: &Url,
        page_size: usize,
        params: &PlaylistParams,
    ) -> Result<Vec<SearchChannel>, ProxyError> {
        let mut collected: Vec<SearchChannel> = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut url = search_url.clone();
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in params.forwarded(RESERVED_PARAMS) {
                    query.append_pair(key, value);
                }
                query
                    .append_pair("page", &page.to_string())
                    .append_pair("page_size", &page_size.to_string());
            }

            tracing::info!(page = page, "Fetching search results");

            let body = self.get_text(&url).await.map_err(|e| {
                metrics::record_upstream_failure("paged");
                tracing::error!(page = page, error = %e, "Search page request failed");
                e
            })?;

            let parsed: SearchResponse = serde_json::from_str(&body).map_err(|e| {
                metrics::record_upstream_failure("paged");
                ProxyError::MalformedUpstreamBody {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            })?;

            let total = parsed.result.total.unwrap_or(0) as usize;
            let results = parsed.result.results;

            if results.is_empty() {
                tracing::info!(page = page, "No more results found");
                break;
            }

            collected.extend(results);
            tracing::info!(collected = collected.len(), total = total, "Collected search results");

            if collected.len() >= total {
                break;
            }

            if page >= MAX_PAGES {
                tracing::warn!(page = page, total = total, "Search pagination stopped at page limit");
                break;
            }

            page += 1;
        }

        Ok(collected)
    }

    async fn fetch_category(
        &self,
        category_url: &Url,
        category: &CategoryGroup,
        params: &PlaylistParams,
    ) -> Result<String, ProxyError> {
        let mut url = category_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params.forwarded(RESERVED_PARAMS) {
                query.append_pair(key, value);
            }
            query.append_pair("category", &category.upstream_key);
        }

        self.get_text(&url).await
    }

    /// Fetch every category concurrently, at most `concurrency` at a time
    ///
    /// Results come back in category declaration order regardless of which
    /// request finished first.
    pub async fn fetch_categories(
        &self,
        category_url: &Url,
        categories: &[CategoryGroup],
        params: &PlaylistParams,
        concurrency: usize,
    ) -> Vec<RawUpstreamResult> {
        let concurrency = concurrency.clamp(1, categories.len().max(1));

        // Futures are built up front; a lazily mapped stream over borrowed
        // categories is not Send for every lifetime the handlers need.
        let requests: Vec<BoxFuture<'_, (usize, Result<String, ProxyError>)>> = categories
            .iter()
            .enumerate()
            .map(|(index, category)| {
                async move { (index, self.fetch_category(category_url, category, params).await) }
                    .boxed()
            })
            .collect();

        let completed: Vec<(usize, Result<String, ProxyError>)> = stream::iter(requests)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut slots: Vec<Option<Result<String, ProxyError>>> =
            std::iter::repeat_with(|| None).take(categories.len()).collect();
        for (index, body) in completed {
            slots[index] = Some(body);
        }

        categories
            .iter()
            .zip(slots)
            .map(|(category, slot)| {
                let body = slot.unwrap_or_else(|| {
                    Err(ProxyError::transport(category_url.as_str(), "request never completed"))
                });

                if let Err(e) = &body {
                    metrics::record_upstream_failure("fanout");
                    tracing::warn!(category = %category.upstream_key, error = %e, "Category fetch failed, omitting");
                }

                RawUpstreamResult {
                    source: category.upstream_key.clone(),
                    body,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::spawn_upstream;
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_timeouts() -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(500),
            write: Duration::from_millis(300),
            pool_idle: Duration::from_secs(5),
        }
    }

    fn fetcher() -> UpstreamFetcher {
        UpstreamFetcher::new("acestream-proxy-test", fast_timeouts(), 8).unwrap()
    }

    /// Search endpoint serving `total` numbered channels
    async fn search_upstream(total: usize, hits: Arc<AtomicUsize>) -> Url {
        let router = Router::new().route(
            "/search",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let page: usize = q["page"].parse().unwrap();
                    let size: usize = q["page_size"].parse().unwrap();
                    let start = (page - 1) * size;
                    let end = (start + size).min(total);
                    let results: Vec<_> = (start..end.max(start))
                        .map(|i| serde_json::json!({ "name": format!("ch{}", i), "items": [] }))
                        .collect();
                    axum::Json(serde_json::json!({ "result": { "results": results, "total": total } }))
                }
            }),
        );
        let base = spawn_upstream(router).await;
        Url::parse(&format!("{}/search", base)).unwrap()
    }

    #[tokio::test]
    async fn test_pagination_stops_at_total() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = search_upstream(25, hits.clone()).await;

        let channels = fetcher()
            .fetch_search_pages(&url, 10, &PlaylistParams::default())
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(channels.len(), 25);
        assert_eq!(channels[24].name.as_deref(), Some("ch24"));
    }

    #[tokio::test]
    async fn test_pagination_with_zero_total() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = search_upstream(0, hits.clone()).await;

        let channels = fetcher()
            .fetch_search_pages(&url, 10, &PlaylistParams::default())
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_failure_is_fatal() {
        let router = Router::new().route(
            "/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q["page"] == "1" {
                    Ok(axum::Json(serde_json::json!({
                        "result": { "results": [{ "name": "a" }], "total": 5 }
                    })))
                } else {
                    Err(StatusCode::SERVICE_UNAVAILABLE)
                }
            }),
        );
        let base = spawn_upstream(router).await;
        let url = Url::parse(&format!("{}/search", base)).unwrap();

        let err = fetcher()
            .fetch_search_pages(&url, 1, &PlaylistParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_malformed_search_body() {
        let router = Router::new().route("/search", get(|| async { "<html>oops</html>" }));
        let base = spawn_upstream(router).await;
        let url = Url::parse(&format!("{}/search", base)).unwrap();

        let err = fetcher()
            .fetch_search_pages(&url, 10, &PlaylistParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::MalformedUpstreamBody { .. }));
    }

    #[tokio::test]
    async fn test_search_forwards_caller_params() {
        let router = Router::new().route(
            "/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let token_ok = q.get("token").map(String::as_str) == Some("secret");
                let page_ok = q.get("page").map(String::as_str) == Some("1");
                if token_ok && page_ok {
                    Ok(axum::Json(serde_json::json!({ "result": { "results": [], "total": 0 } })))
                } else {
                    Err(StatusCode::BAD_REQUEST)
                }
            }),
        );
        let base = spawn_upstream(router).await;
        let url = Url::parse(&format!("{}/search", base)).unwrap();
        let params = PlaylistParams::new(vec![
            ("token".to_string(), "secret".to_string()),
            ("page".to_string(), "99".to_string()),
        ]);

        assert!(fetcher().fetch_search_pages(&url, 10, &params).await.is_ok());
    }

    #[tokio::test]
    async fn test_fan_out_keeps_declaration_order_and_omits_failures() {
        let router = Router::new().route(
            "/playlist",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let category = q["category"].clone();
                match category.as_str() {
                    "slow" => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(String::new())
                    }
                    "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
                    "first" => {
                        // finishes last among the successful ones
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(format!("#EXTINF:-1,{}\n", category))
                    }
                    _ => Ok(format!("#EXTINF:-1,{}\n", category)),
                }
            }),
        );
        let base = spawn_upstream(router).await;
        let url = Url::parse(&format!("{}/playlist", base)).unwrap();
        let categories = vec![
            CategoryGroup::new("first", "First"),
            CategoryGroup::new("slow", "Slow"),
            CategoryGroup::new("broken", "Broken"),
            CategoryGroup::new("last", "Last"),
        ];

        let results = fetcher()
            .fetch_categories(&url, &categories, &PlaylistParams::default(), 4)
            .await;

        let sources: Vec<&str> = results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["first", "slow", "broken", "last"]);
        assert_eq!(results[0].body.as_deref().unwrap(), "#EXTINF:-1,first\n");
        assert!(matches!(results[1].body, Err(ProxyError::UpstreamTransport { .. })));
        assert!(matches!(results[2].body, Err(ProxyError::UpstreamStatus { status: 500, .. })));
        assert!(results[3].is_success());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_error() {
        let url = Url::parse("http://127.0.0.1:9/playlist").unwrap();
        let categories = vec![CategoryGroup::new("sport", "Спорт")];
        let results = fetcher()
            .fetch_categories(&url, &categories, &PlaylistParams::default(), 8)
            .await;
        assert!(matches!(results[0].body, Err(ProxyError::UpstreamTransport { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_fan_outs_share_request_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let router = Router::new().route(
            "/playlist",
            get(move || {
                let (active, peak) = (a.clone(), p.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    "#EXTM3U\n".to_string()
                }
            }),
        );
        let base = spawn_upstream(router).await;
        let url = Url::parse(&format!("{}/playlist", base)).unwrap();
        let categories: Vec<CategoryGroup> = (0..6)
            .map(|i| CategoryGroup::new(format!("c{}", i), format!("C{}", i)))
            .collect();

        let fetcher = UpstreamFetcher::new("acestream-proxy-test", fast_timeouts(), 3).unwrap();
        let params: Vec<PlaylistParams> = (0..4)
            .map(|i| PlaylistParams::new(vec![("token".to_string(), i.to_string())]))
            .collect();

        let builds = params
            .iter()
            .map(|p| fetcher.fetch_categories(&url, &categories, p, 3));
        let results = futures::future::join_all(builds).await;

        assert!(results.iter().flatten().all(|r| r.is_success()));
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {}", peak.load(Ordering::SeqCst));
    }
}
