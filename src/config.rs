use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::CategoryGroup;
use crate::services::cache::CacheBackendKind;
use crate::services::fetcher::FetchTimeouts;
use crate::services::grouping::{self, CategoryRemap, GroupOrder, GroupingRules, InfohashOverride};
use crate::services::locale;
use crate::services::rewriter::{EngineMode, EngineTarget, RewritePolicy};

/// How upstream listings are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Walk the JSON search endpoint page by page
    #[default]
    Paged,
    /// One playlist request per category, concurrently
    FanOut,
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paged" | "search" => Ok(Self::Paged),
            "fanout" | "fan-out" | "categories" => Ok(Self::FanOut),
            other => Err(format!("unknown fetch mode '{}'", other)),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Upstream
    pub fetch_mode: FetchMode,
    pub search_url: String,
    pub page_size: usize,
    pub category_url: String,
    pub categories: Vec<CategoryGroup>,
    pub fanout_concurrency: usize,

    // Timeouts
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub pool_idle_timeout_ms: u64,

    // Engine / rewriting
    pub rewrite_policy: RewritePolicy,
    pub engine_mode: EngineMode,
    pub engine_scheme: String,
    pub engine_host: String,
    pub engine_port: Option<u16>,
    pub content_id_param: String,

    // Cache
    pub cache_backend: CacheBackendKind,
    pub playlist_file: PathBuf,
    pub playlist_ttl_secs: u64,
    pub cache_max_entries: usize,

    // Output
    pub default_group: String,
    pub epg_url: Option<String>,
    pub catchup_days: u32,
    pub passthrough_directives: Vec<String>,

    // Search grouping
    pub category_remap: Vec<CategoryRemap>,
    pub category_overrides: Vec<InfohashOverride>,
    pub country_overrides: Vec<InfohashOverride>,
    pub known_groups_only: bool,
    pub group_order: GroupOrder,

    // Startup
    pub warmup_attempts: u32,
    pub warmup_delay_secs: u64,

    // Misc
    pub user_agent: String,
}

/// Parse an enum-like value, warning and keeping the default when it is unrecognized
fn parse_choice<T: FromStr<Err = String> + Default>(name: &str, raw: Option<String>) -> T {
    match raw.filter(|v| !v.trim().is_empty()) {
        Some(value) => value.parse().unwrap_or_else(|e| {
            tracing::warn!(variable = name, error = %e, "Invalid configuration value, using default");
            T::default()
        }),
        None => T::default(),
    }
}

/// Comma-separated list, blanks removed
fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// `key:label,key:label`; entries without a label are published under their key
fn parse_categories(raw: Option<String>) -> Vec<CategoryGroup> {
    let parsed: Vec<CategoryGroup> = parse_list(raw)
        .into_iter()
        .map(|item| match item.split_once(':') {
            Some((key, label)) if !label.trim().is_empty() => {
                CategoryGroup::new(key.trim(), label.trim())
            }
            Some((key, _)) => CategoryGroup::new(key.trim(), key.trim()),
            None => CategoryGroup::new(item.as_str(), item.as_str()),
        })
        .collect();

    if parsed.is_empty() {
        locale::default_categories()
    } else {
        parsed
    }
}

/// `Label=hash|hash;Label=hash`
fn parse_overrides(raw: Option<String>) -> Vec<InfohashOverride> {
    grouping::parse_label_map(raw.as_deref().unwrap_or_default())
        .into_iter()
        .map(|(label, infohashes)| InfohashOverride { label, infohashes })
        .collect()
}

/// `Label=category|category;...`; unset or empty keeps the built-in table
fn parse_remap(raw: Option<String>) -> Vec<CategoryRemap> {
    let parsed: Vec<CategoryRemap> = grouping::parse_label_map(raw.as_deref().unwrap_or_default())
        .into_iter()
        .map(|(label, sources)| CategoryRemap { label, sources })
        .collect();

    if parsed.is_empty() {
        grouping::default_category_remap()
    } else {
        parsed
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let fetch_mode: FetchMode = parse_choice("FETCH_MODE", lookup("FETCH_MODE"));

        // Paged deployments keep one long-lived document on disk, fan-out ones a short in-memory cache
        let (default_backend, default_ttl) = match fetch_mode {
            FetchMode::Paged => ("file", "3600"),
            FetchMode::FanOut => ("memory", "30"),
        };

        let engine_mode: EngineMode = parse_choice("ENGINE_MODE", lookup("ENGINE_MODE"));

        // A single on-disk document cannot hold per-caller engine addresses
        let default_backend = match engine_mode {
            EngineMode::CallerSupplied => "memory",
            EngineMode::Fixed => default_backend,
        };

        let cache_backend = CacheBackendKind::from_str(&var("CACHE_BACKEND", default_backend))
            .unwrap_or_else(|e| {
                tracing::warn!(variable = "CACHE_BACKEND", error = %e, "Invalid configuration value, using default");
                CacheBackendKind::from_str(default_backend).unwrap_or(CacheBackendKind::Memory)
            });

        Self {
            // Server
            port: var("PORT", "8000").parse().unwrap_or(8000),

            // Upstream
            fetch_mode,
            search_url: var("ACESTREAM_SEARCH_URL", "http://acestream-engine:6878/search"),
            page_size: var("ACESTREAM_PAGE_SIZE", "10")
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(10),
            category_url: var("CATEGORY_URL", "http://acestream-engine:6878/playlist"),
            categories: parse_categories(lookup("FANOUT_CATEGORIES")),
            fanout_concurrency: var("FANOUT_CONCURRENCY", "8")
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(8),

            // Timeouts
            connect_timeout_ms: var("CONNECT_TIMEOUT_MS", "5000").parse().unwrap_or(5_000),
            read_timeout_ms: var("READ_TIMEOUT_MS", "15000").parse().unwrap_or(15_000),
            write_timeout_ms: var("WRITE_TIMEOUT_MS", "10000").parse().unwrap_or(10_000),
            pool_idle_timeout_ms: var("POOL_IDLE_TIMEOUT_MS", "90000").parse().unwrap_or(90_000),

            // Engine / rewriting
            rewrite_policy: parse_choice("REWRITE_POLICY", lookup("REWRITE_POLICY")),
            engine_mode,
            engine_scheme: var("ENGINE_SCHEME", "http"),
            engine_host: var("ENGINE_HOST", "127.0.0.1"),
            // empty ENGINE_PORT means "scheme default"
            engine_port: match lookup("ENGINE_PORT") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(v.trim().parse().unwrap_or(6878)),
                None => Some(6878),
            },
            content_id_param: var("CONTENT_ID_PARAM", "infohash"),

            // Cache
            cache_backend,
            playlist_file: PathBuf::from(var("PLAYLIST_FILE", "playlist.m3u8")),
            playlist_ttl_secs: var("PLAYLIST_TTL", default_ttl)
                .parse()
                .unwrap_or_else(|_| default_ttl.parse().unwrap_or(30)),
            cache_max_entries: var("CACHE_MAX_ENTRIES", "256")
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(256),

            // Output
            default_group: var("DEFAULT_GROUP", locale::DEFAULT_GROUP),
            epg_url: lookup("EPG_URL").filter(|v| !v.trim().is_empty()),
            catchup_days: var("CATCHUP_DAYS", "7").parse().unwrap_or(7),
            passthrough_directives: parse_list(lookup("PASSTHROUGH_DIRECTIVES")),

            // Search grouping
            category_remap: parse_remap(lookup("CATEGORY_REMAP")),
            category_overrides: parse_overrides(lookup("INFOHASH_CATEGORY_OVERRIDE")),
            country_overrides: parse_overrides(lookup("INFOHASH_COUNTRY_OVERRIDE")),
            known_groups_only: parse_flag(lookup("KNOWN_GROUPS_ONLY")),
            group_order: parse_choice("GROUP_ORDER", lookup("GROUP_ORDER")),

            // Startup
            warmup_attempts: var("WARMUP_ATTEMPTS", "10").parse().unwrap_or(10),
            warmup_delay_secs: var("WARMUP_DELAY_SECS", "5").parse().unwrap_or(5),

            // Misc - Use VLC user agent to avoid IPTV server blocks
            user_agent: var("USER_AGENT", "VLC/3.0.20 LibVLC/3.0.20"),
        }
    }

    pub fn fetch_timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
            pool_idle: Duration::from_millis(self.pool_idle_timeout_ms),
        }
    }

    pub fn playlist_ttl(&self) -> Duration {
        Duration::from_secs(self.playlist_ttl_secs)
    }

    pub fn engine(&self) -> EngineTarget {
        EngineTarget::new(&self.engine_scheme, &self.engine_host, self.engine_port)
    }

    pub fn grouping(&self) -> GroupingRules {
        GroupingRules {
            category_remap: self.category_remap.clone(),
            category_overrides: self.category_overrides.clone(),
            country_overrides: self.country_overrides.clone(),
            known_only: self.known_groups_only,
            order: self.group_order,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.fetch_mode, FetchMode::Paged);
        assert_eq!(config.cache_backend, CacheBackendKind::File);
        assert_eq!(config.playlist_ttl_secs, 3600);
        assert_eq!(config.page_size, 10);
        assert_eq!(config.content_id_param, "infohash");
        assert_eq!(config.default_group, "Прочее");
        assert_eq!(config.categories.len(), 17);
        assert_eq!(config.engine_port, Some(6878));
    }

    #[test]
    fn test_fanout_defaults_to_short_memory_cache() {
        let config = config_from(&[("FETCH_MODE", "fanout")]);
        assert_eq!(config.cache_backend, CacheBackendKind::Memory);
        assert_eq!(config.playlist_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_choices_fall_back() {
        let config = config_from(&[
            ("REWRITE_POLICY", "bogus"),
            ("ENGINE_MODE", "caller-supplied-engine"),
            ("PORT", "not-a-port"),
        ]);
        assert_eq!(config.rewrite_policy, RewritePolicy::ManifestRewrite);
        assert_eq!(config.engine_mode, EngineMode::CallerSupplied);
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_timeouts_are_independent() {
        let config = config_from(&[("CONNECT_TIMEOUT_MS", "100"), ("READ_TIMEOUT_MS", "2500")]);
        let timeouts = config.fetch_timeouts();
        assert_eq!(timeouts.connect, Duration::from_millis(100));
        assert_eq!(timeouts.read, Duration::from_millis(2500));
        assert_eq!(timeouts.write, Duration::from_millis(10_000));
    }

    #[test]
    fn test_custom_categories_and_directives() {
        let config = config_from(&[
            ("FANOUT_CATEGORIES", "sport:Спорт, news , music:"),
            ("PASSTHROUGH_DIRECTIVES", "#EXTVLCOPT, #KODIPROP"),
            ("ENGINE_PORT", ""),
        ]);
        assert_eq!(
            config.categories,
            vec![
                CategoryGroup::new("sport", "Спорт"),
                CategoryGroup::new("news", "news"),
                CategoryGroup::new("music", "music"),
            ]
        );
        assert_eq!(config.passthrough_directives, vec!["#EXTVLCOPT", "#KODIPROP"]);
        assert_eq!(config.engine_port, None);
    }

    #[test]
    fn test_caller_supplied_engine_defaults_to_memory_cache() {
        let config = config_from(&[("ENGINE_MODE", "caller-supplied-engine")]);
        assert_eq!(config.fetch_mode, FetchMode::Paged);
        assert_eq!(config.cache_backend, CacheBackendKind::Memory);

        // an explicit choice is kept and rejected when the builder is created
        let explicit = config_from(&[
            ("ENGINE_MODE", "caller-supplied-engine"),
            ("CACHE_BACKEND", "file"),
        ]);
        assert_eq!(explicit.cache_backend, CacheBackendKind::File);
    }

    #[test]
    fn test_grouping_variables() {
        let config = config_from(&[
            ("CATEGORY_REMAP", "Кино=movies|documentaries;Спорт=sport"),
            ("INFOHASH_COUNTRY_OVERRIDE", "Беларусь=aaa|bbb"),
            ("KNOWN_GROUPS_ONLY", "true"),
            ("GROUP_ORDER", "grouped"),
        ]);
        let rules = config.grouping();

        assert_eq!(rules.category_remap.len(), 2);
        assert_eq!(rules.category_remap[0].sources, vec!["movies", "documentaries"]);
        assert!(rules.category_overrides.is_empty());
        assert_eq!(rules.country_overrides[0].infohashes, vec!["aaa", "bbb"]);
        assert!(rules.known_only);
        assert_eq!(rules.order, GroupOrder::Grouped);

        let defaults = Config::default().grouping();
        assert_eq!(defaults.category_remap.len(), 2);
        assert!(!defaults.known_only);
        assert_eq!(defaults.order, GroupOrder::Source);
    }
}
