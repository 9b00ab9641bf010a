use bytes::Bytes;
use chrono::{DateTime, Utc};
use lru::LruCache;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::ProxyError;
use crate::models::PlaylistParams;
use crate::services::metrics;

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cache key derived from the sorted request parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_params(params: &PlaylistParams) -> Self {
        let mut hasher = Sha1::new();
        for (name, value) in params.sorted() {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"&");
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Single key for deployments that keep one document regardless of parameters
    pub fn global() -> Self {
        Self("global".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where rendered documents are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, bounded by entry count
    Memory { max_entries: usize },
    /// One document on disk; its mtime decides staleness
    File { path: PathBuf },
}

/// Backend kind as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    File,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Rendered document with its lifetime
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Bytes,
    built_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Per-key state; holding its lock is what makes a rebuild single-flight
#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    /// Last failed rebuild, so queued callers don't repeat it
    last_failure: Option<(DateTime<Utc>, String)>,
    /// mtime of the persisted document `entry` corresponds to (file backend)
    disk_mtime: Option<DateTime<Utc>>,
}

type SharedSlot = Arc<tokio::sync::Mutex<Slot>>;

/// Snapshot for health reporting
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub last_built_at: Option<DateTime<Utc>>,
}

enum Store {
    Memory {
        slots: Mutex<LruCache<CacheKey, SharedSlot>>,
    },
    File {
        path: PathBuf,
        slot: SharedSlot,
    },
}

/// Playlist document cache with TTL, single-flight rebuilds and stale-if-error
pub struct PlaylistCache {
    store: Store,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl PlaylistCache {
    pub fn new(backend: CacheBackend, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let store = match backend {
            CacheBackend::Memory { max_entries } => Store::Memory {
                slots: Mutex::new(LruCache::new(
                    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
                )),
            },
            CacheBackend::File { path } => Store::File {
                path,
                slot: SharedSlot::default(),
            },
        };

        Self {
            store,
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500)),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// The file backend keeps a single document whatever the key
    pub fn is_keyed(&self) -> bool {
        matches!(self.store, Store::Memory { .. })
    }

    fn slot(&self, key: &CacheKey) -> SharedSlot {
        match &self.store {
            Store::Memory { slots } => {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                slots.get_or_insert(key.clone(), SharedSlot::default).clone()
            }
            Store::File { slot, .. } => slot.clone(),
        }
    }

    /// Return the fresh document for `key`, building it when missing or expired
    ///
    /// On build failure the previous document is served if there is one.
    pub async fn get_or_build<F, Fut>(&self, key: &CacheKey, build: F) -> Result<Bytes, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, ProxyError>>,
    {
        self.resolve(key, build, false).await
    }

    /// Rebuild `key` now, regardless of freshness (still stale-if-error)
    pub async fn refresh<F, Fut>(&self, key: &CacheKey, build: F) -> Result<Bytes, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, ProxyError>>,
    {
        self.resolve(key, build, true).await
    }

    async fn resolve<F, Fut>(&self, key: &CacheKey, build: F, force: bool) -> Result<Bytes, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, ProxyError>>,
    {
        let arrived_at = self.clock.now();
        let slot = self.slot(key);
        let mut slot = slot.lock().await;

        if let Store::File { path, .. } = &self.store {
            self.sync_from_disk(path, &mut slot).await;
        }

        let now = self.clock.now();

        if !force {
            if let Some(entry) = slot.entry.as_ref().filter(|e| now <= e.expires_at) {
                metrics::record_cache("hit");
                return Ok(entry.payload.clone());
            }

            // A rebuild we queued behind already failed; don't hammer upstream again
            if let Some((failed_at, message)) = &slot.last_failure {
                if *failed_at > arrived_at {
                    return match &slot.entry {
                        Some(stale) => {
                            metrics::record_cache("stale");
                            Ok(stale.payload.clone())
                        }
                        None => Err(ProxyError::CacheBuildFailure(message.clone())),
                    };
                }
            }
        }

        metrics::record_cache("miss");
        tracing::debug!(key = key.as_str(), force = force, "Rebuilding playlist");

        match build().await {
            Ok(payload) => {
                let built_at = self.clock.now();
                if let Store::File { path, .. } = &self.store {
                    // The document is still served from memory when persisting fails
                    match write_atomic(path, &payload).await {
                        Ok(()) => slot.disk_mtime = file_mtime(path).await.ok(),
                        Err(e) => tracing::error!(
                            path = %path.display(),
                            error = %e,
                            "Failed to persist playlist"
                        ),
                    }
                }
                slot.entry = Some(CacheEntry {
                    payload: payload.clone(),
                    built_at,
                    expires_at: built_at + self.ttl,
                });
                slot.last_failure = None;
                Ok(payload)
            }
            Err(e) => {
                slot.last_failure = Some((self.clock.now(), e.to_string()));
                match &slot.entry {
                    Some(stale) => {
                        metrics::record_cache("stale");
                        tracing::warn!(
                            key = key.as_str(),
                            error = %e,
                            built_at = %stale.built_at,
                            "Playlist rebuild failed, serving previous document"
                        );
                        Ok(stale.payload.clone())
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Load the persisted document when it changed on disk; its mtime is the build time
    ///
    /// Storage errors are logged and leave the in-memory entry in place.
    async fn sync_from_disk(&self, path: &Path, slot: &mut Slot) {
        let modified = match file_mtime(path).await {
            Ok(modified) => modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Removed behind our back: what it held is gone too
                if slot.disk_mtime.take().is_some() {
                    slot.entry = None;
                }
                return;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot stat persisted playlist");
                return;
            }
        };

        if slot.disk_mtime == Some(modified) {
            return;
        }

        match fs::read(path).await {
            Ok(bytes) => {
                let payload = Bytes::from(bytes);
                tracing::info!(
                    path = %path.display(),
                    bytes = payload.len(),
                    modified = %modified,
                    "Loaded persisted playlist"
                );
                slot.entry = Some(CacheEntry {
                    payload,
                    built_at: modified,
                    expires_at: modified + self.ttl,
                });
                slot.disk_mtime = Some(modified);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read persisted playlist");
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let slots: Vec<SharedSlot> = match &self.store {
            Store::Memory { slots } => {
                let slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                slots.iter().map(|(_, slot)| slot.clone()).collect()
            }
            Store::File { slot, .. } => vec![slot.clone()],
        };

        let mut stats = CacheStats::default();
        for slot in slots {
            // Skip slots mid-rebuild rather than wait on them
            let Ok(slot) = slot.try_lock() else {
                continue;
            };
            if let Some(entry) = &slot.entry {
                stats.entries += 1;
                stats.last_built_at = stats.last_built_at.max(Some(entry.built_at));
            }
        }
        stats
    }
}

async fn file_mtime(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let meta = fs::metadata(path).await?;
    Ok(DateTime::<Utc>::from(meta.modified()?))
}

/// Write to a temp file, sync, then rename over the target
async fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), ProxyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "playlist".to_string());
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    Ok(())
}
