use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Cache lookups by outcome (hit, miss, stale)
    static ref CACHE_LOOKUPS: IntCounterVec = register_int_counter_vec!(
        "acestream_proxy_cache_lookups_total",
        "Playlist cache lookups by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Failed upstream requests by fetch mode
    static ref UPSTREAM_FAILURES: IntCounterVec = register_int_counter_vec!(
        "acestream_proxy_upstream_failures_total",
        "Failed upstream requests by fetch mode",
        &["mode"]
    )
    .unwrap();

    /// Completed playlist builds by result (ok, error)
    static ref PLAYLIST_BUILDS: IntCounterVec = register_int_counter_vec!(
        "acestream_proxy_playlist_builds_total",
        "Playlist builds by result",
        &["result"]
    )
    .unwrap();
}

pub fn record_cache(outcome: &str) {
    CACHE_LOOKUPS.with_label_values(&[outcome]).inc();
}

pub fn record_upstream_failure(mode: &str) {
    UPSTREAM_FAILURES.with_label_values(&[mode]).inc();
}

pub fn record_build(ok: bool) {
    PLAYLIST_BUILDS
        .with_label_values(&[if ok { "ok" } else { "error" }])
        .inc();
}

/// Text exposition of every registered metric, with its content type
pub fn encode() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
