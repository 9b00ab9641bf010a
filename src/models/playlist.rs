use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Upstream category and the label it is published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub upstream_key: String,
    pub display_label: String,
}

impl CategoryGroup {
    pub fn new(upstream_key: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            upstream_key: upstream_key.into(),
            display_label: display_label.into(),
        }
    }
}

/// Single playlist entry, emitted once per group label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub title: String,
    /// EXTINF duration, `-1` already normalized to `0`
    pub duration: i64,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub tvg_logo: Option<String>,
    pub groups: Vec<String>,
    /// EXTINF attributes without a dedicated field, in source order
    pub attributes: Vec<(String, String)>,
    /// Whitelisted directive lines attached to this entry
    pub directives: Vec<String>,
    pub stream_url: Option<String>,
}

/// Outcome of one upstream call (one category or one search run)
#[derive(Debug)]
pub struct RawUpstreamResult {
    pub source: String,
    pub body: Result<String, ProxyError>,
}

impl RawUpstreamResult {
    pub fn is_success(&self) -> bool {
        self.body.is_ok()
    }
}

/// Caller query parameters forwarded upstream and folded into the cache key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistParams {
    pairs: Vec<(String, String)>,
}

impl PlaylistParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Pairs sorted by key then value, so arrival order never matters
    pub fn sorted(&self) -> Vec<(String, String)> {
        let mut sorted = self.pairs.clone();
        sorted.sort();
        sorted
    }

    /// Pairs to forward upstream, minus names the fetcher sets itself
    pub fn forwarded<'a>(
        &'a self,
        reserved: &'a [&'a str],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| !reserved.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============ Search endpoint payloads ============

/// Top-level search response: `{ "result": { "results": [...], "total": N } }`
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub result: SearchPage,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<SearchChannel>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// One channel in the search results, carrying one or more stream items
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchChannel {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channel_id: Option<serde_json::Value>,
    #[serde(default)]
    pub icons: Vec<ChannelIcon>,
    #[serde(default)]
    pub epg: Vec<EpgProgram>,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub infohash: Option<String>,
    #[serde(default)]
    pub channel_id: Option<serde_json::Value>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelIcon {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpgProgram {
    #[serde(default)]
    pub name: Option<String>,
}

/// Render a JSON identifier (string or number) as an attribute value
pub fn json_id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============ HTTP responses ============

/// Response for a forced refresh
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub updated: bool,
    pub items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_params_ignore_arrival_order() {
        let a = PlaylistParams::new(vec![
            ("port".to_string(), "6878".to_string()),
            ("ip".to_string(), "10.0.0.2".to_string()),
        ]);
        let b = PlaylistParams::new(vec![
            ("ip".to_string(), "10.0.0.2".to_string()),
            ("port".to_string(), "6878".to_string()),
        ]);
        assert_eq!(a.sorted(), b.sorted());
    }

    #[test]
    fn test_forwarded_skips_reserved() {
        let params = PlaylistParams::new(vec![
            ("page".to_string(), "9".to_string()),
            ("token".to_string(), "abc".to_string()),
        ]);
        let forwarded: Vec<_> = params.forwarded(&["page", "page_size"]).collect();
        assert_eq!(forwarded, vec![("token", "abc")]);
    }

    #[test]
    fn test_search_response_tolerates_missing_fields() {
        let body = r#"{"result":{"results":[{"name":"Channel One","channel_id":42,
            "items":[{"infohash":"abc","countries":["ru"]}]}],"total":1},"extra":true}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.total, Some(1));
        let channel = &parsed.result.results[0];
        assert_eq!(json_id_to_string(channel.channel_id.as_ref().unwrap()).as_deref(), Some("42"));
        assert!(channel.icons.is_empty());
        assert_eq!(channel.items[0].countries, vec!["ru".to_string()]);
    }
}
