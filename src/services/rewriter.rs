//! Stream URL rewriting
//!
//! Upstream playlists reference streams through the engine's `getstream`
//! endpoint, e.g.:
//! ```text
//! http://127.0.0.1:6878/ace/getstream?infohash=<hash>
//! ```
//!
//! Two output shapes are supported, selected per deployment:
//!
//! - **manifest-rewrite**: `<engine>/ace/manifest.m3u8?infohash=<hash>`
//! - **host-only-passthrough**: engine scheme/host/port swapped in, original
//!   path and query kept as they were
//!
//! Rewriting never fails: anything unrecognized comes back unchanged.

use std::net::IpAddr;
use std::str::FromStr;

use url::Url;

use crate::error::ProxyError;
use crate::models::PlaylistParams;

/// Path the engine serves HLS manifests from
const MANIFEST_PATH: &str = "/ace/manifest.m3u8";

/// Last path segment of a recognized stream reference
const GETSTREAM_SEGMENT: &str = "getstream";

/// Output shape of rewritten stream URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewritePolicy {
    #[default]
    ManifestRewrite,
    HostOnlyPassthrough,
}

impl FromStr for RewritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manifest-rewrite" | "manifest" => Ok(Self::ManifestRewrite),
            "host-only-passthrough" | "host-only" | "passthrough" => {
                Ok(Self::HostOnlyPassthrough)
            }
            other => Err(format!("unknown rewrite policy '{}'", other)),
        }
    }
}

impl std::fmt::Display for RewritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewritePolicy::ManifestRewrite => write!(f, "manifest-rewrite"),
            RewritePolicy::HostOnlyPassthrough => write!(f, "host-only-passthrough"),
        }
    }
}

/// Where the engine address in rewritten URLs comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Always the configured engine
    #[default]
    Fixed,
    /// `ip` / `port` query parameters of the request, configured engine otherwise
    CallerSupplied,
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed-engine" | "fixed" => Ok(Self::Fixed),
            "caller-supplied-engine" | "caller-supplied" | "caller" => Ok(Self::CallerSupplied),
            other => Err(format!("unknown engine mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::Fixed => write!(f, "fixed-engine"),
            EngineMode::CallerSupplied => write!(f, "caller-supplied-engine"),
        }
    }
}

/// Engine address written into rewritten URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTarget {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl EngineTarget {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// Resolve the engine for one request
    ///
    /// In caller-supplied mode `ip` must be an IP address and `port` a
    /// non-zero port; either one may be omitted.
    pub fn for_request(
        &self,
        mode: EngineMode,
        params: &PlaylistParams,
    ) -> Result<EngineTarget, ProxyError> {
        if mode == EngineMode::Fixed {
            return Ok(self.clone());
        }

        let mut target = self.clone();

        if let Some(ip) = params.get("ip").filter(|v| !v.is_empty()) {
            let addr: IpAddr = ip
                .parse()
                .map_err(|_| ProxyError::invalid_parameter("ip", format!("'{}' is not an IP address", ip)))?;
            target.host = addr.to_string();
        }

        if let Some(port) = params.get("port").filter(|v| !v.is_empty()) {
            let port: u16 = port
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ProxyError::invalid_parameter("port", format!("'{}' is not a valid port", port)))?;
            target.port = Some(port);
        }

        Ok(target)
    }

    fn apply_to(&self, url: &mut Url) -> bool {
        if url.scheme() != self.scheme && url.set_scheme(&self.scheme).is_err() {
            return false;
        }

        let host_ok = match self.host.parse::<IpAddr>() {
            Ok(ip) => url.set_ip_host(ip).is_ok(),
            Err(_) => url.set_host(Some(&self.host)).is_ok(),
        };

        host_ok && url.set_port(self.port).is_ok()
    }

    /// `scheme://host[:port]/ace/manifest.m3u8`
    fn manifest_url(&self) -> Option<Url> {
        let mut url = Url::parse(&format!("{}://localhost{}", self.scheme, MANIFEST_PATH)).ok()?;
        self.apply_to(&mut url).then_some(url)
    }
}

/// Result of rewriting one stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten(String),
    /// Not a stream reference (or unparseable); returned as given
    Unchanged(String),
    /// A stream reference without its content identifier; returned as given
    MissingIdentifier(String),
}

impl RewriteOutcome {
    pub fn into_url(self) -> String {
        match self {
            RewriteOutcome::Rewritten(url)
            | RewriteOutcome::Unchanged(url)
            | RewriteOutcome::MissingIdentifier(url) => url,
        }
    }
}

/// Rewrites upstream stream references to engine URLs
#[derive(Debug, Clone)]
pub struct StreamRewriter {
    policy: RewritePolicy,
    engine: EngineTarget,
    content_param: String,
}

impl StreamRewriter {
    pub fn new(policy: RewritePolicy, engine: EngineTarget, content_param: impl Into<String>) -> Self {
        Self {
            policy,
            engine,
            content_param: content_param.into(),
        }
    }

    pub fn content_param(&self) -> &str {
        &self.content_param
    }

    pub fn rewrite(&self, raw: &str) -> RewriteOutcome {
        let unchanged = || RewriteOutcome::Unchanged(raw.to_string());

        let Ok(parsed) = Url::parse(raw) else {
            return unchanged();
        };

        if !is_getstream_path(parsed.path()) {
            return unchanged();
        }

        let content_id = parsed
            .query_pairs()
            .find(|(k, _)| k == self.content_param.as_str())
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());

        let Some(content_id) = content_id else {
            return RewriteOutcome::MissingIdentifier(raw.to_string());
        };

        let rewritten = match self.policy {
            RewritePolicy::ManifestRewrite => self.engine.manifest_url().map(|mut url| {
                url.query_pairs_mut()
                    .append_pair(&self.content_param, &content_id);
                url
            }),
            RewritePolicy::HostOnlyPassthrough => {
                let mut url = parsed;
                self.engine.apply_to(&mut url).then_some(url)
            }
        };

        match rewritten {
            Some(url) => RewriteOutcome::Rewritten(url.to_string()),
            None => unchanged(),
        }
    }
}

fn is_getstream_path(path: &str) -> bool {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map_or(false, |segment| segment.eq_ignore_ascii_case(GETSTREAM_SEGMENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EngineTarget {
        EngineTarget::new("http", "10.0.0.5", Some(6878))
    }

    fn sorted_pairs(url: &str) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_manifest_rewrite() {
        let rewriter = StreamRewriter::new(RewritePolicy::ManifestRewrite, engine(), "infohash");
        let outcome = rewriter.rewrite("http://127.0.0.1:6878/ace/getstream?infohash=abc123&pid=1");
        assert_eq!(
            outcome,
            RewriteOutcome::Rewritten("http://10.0.0.5:6878/ace/manifest.m3u8?infohash=abc123".to_string())
        );
    }

    #[test]
    fn test_host_only_keeps_query_pairs() {
        let rewriter = StreamRewriter::new(RewritePolicy::HostOnlyPassthrough, engine(), "infohash");
        let input = "https://upstream.example:9000/ace/getstream?infohash=abc&pid=7&token=a%20b&pid=8";
        let out = rewriter.rewrite(input).into_url();

        assert!(out.starts_with("http://10.0.0.5:6878/ace/getstream?"));
        assert_eq!(sorted_pairs(&out), sorted_pairs(input));
    }

    #[test]
    fn test_non_stream_url_is_byte_identical() {
        let rewriter = StreamRewriter::new(RewritePolicy::ManifestRewrite, engine(), "infohash");
        let input = "http://cdn.example.com/live/Channel%20One/index.m3u8?infohash=zzz";
        assert_eq!(rewriter.rewrite(input), RewriteOutcome::Unchanged(input.to_string()));
    }

    #[test]
    fn test_malformed_url_is_returned_unchanged() {
        let rewriter = StreamRewriter::new(RewritePolicy::HostOnlyPassthrough, engine(), "infohash");
        for input in ["not a url", "", "http://[broken/ace/getstream?infohash=x"] {
            assert_eq!(rewriter.rewrite(input), RewriteOutcome::Unchanged(input.to_string()));
        }
    }

    #[test]
    fn test_missing_identifier_is_tagged() {
        let rewriter = StreamRewriter::new(RewritePolicy::ManifestRewrite, engine(), "infohash");
        let input = "http://127.0.0.1:6878/ace/getstream?id=abc";
        assert_eq!(
            rewriter.rewrite(input),
            RewriteOutcome::MissingIdentifier(input.to_string())
        );
    }

    #[test]
    fn test_custom_content_param() {
        let rewriter = StreamRewriter::new(RewritePolicy::ManifestRewrite, engine(), "id");
        let out = rewriter.rewrite("http://127.0.0.1:6878/ace/getstream/?id=cid42").into_url();
        assert_eq!(out, "http://10.0.0.5:6878/ace/manifest.m3u8?id=cid42");
    }

    #[test]
    fn test_caller_supplied_engine() {
        let params = PlaylistParams::new(vec![
            ("ip".to_string(), "192.168.1.20".to_string()),
            ("port".to_string(), "8621".to_string()),
        ]);
        let target = engine().for_request(EngineMode::CallerSupplied, &params).unwrap();
        assert_eq!(target, EngineTarget::new("http", "192.168.1.20", Some(8621)));

        // fixed mode ignores the caller
        let fixed = engine().for_request(EngineMode::Fixed, &params).unwrap();
        assert_eq!(fixed, engine());
    }

    #[test]
    fn test_caller_supplied_engine_rejects_bad_values() {
        let bad_ip = PlaylistParams::new(vec![("ip".to_string(), "999.1.1.1".to_string())]);
        let err = engine().for_request(EngineMode::CallerSupplied, &bad_ip).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParameter { ref name, .. } if name == "ip"));

        let bad_port = PlaylistParams::new(vec![("port".to_string(), "0".to_string())]);
        let err = engine().for_request(EngineMode::CallerSupplied, &bad_port).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParameter { ref name, .. } if name == "port"));
    }

    #[test]
    fn test_ipv6_engine() {
        let target = EngineTarget::new("http", "::1", Some(6878));
        let rewriter = StreamRewriter::new(RewritePolicy::ManifestRewrite, target, "infohash");
        let out = rewriter.rewrite("http://127.0.0.1/ace/getstream?infohash=h").into_url();
        assert_eq!(out, "http://[::1]:6878/ace/manifest.m3u8?infohash=h");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("manifest-rewrite".parse::<RewritePolicy>(), Ok(RewritePolicy::ManifestRewrite));
        assert_eq!(
            "HOST-ONLY-PASSTHROUGH".parse::<RewritePolicy>(),
            Ok(RewritePolicy::HostOnlyPassthrough)
        );
        assert!("rewrite-everything".parse::<RewritePolicy>().is_err());
        assert_eq!("caller-supplied-engine".parse::<EngineMode>(), Ok(EngineMode::CallerSupplied));
    }
}
