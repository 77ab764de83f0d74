//! Offline asset cache.
//!
//! The worker intercepts fetches so the app keeps working offline:
//! cache-first lookup, network on miss, and same-origin 200 responses are
//! copied into the cache on the way through. When the network fails, a
//! navigation request falls back to the cached root document; any other
//! miss propagates the failure to the caller.
//!
//! Caches are named by version tag. Activating a new version deletes every
//! cache whose name differs from the current tag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Current cache version tag.
pub const CACHE_NAME: &str = "todo-app-v1";

/// Assets pre-cached at install time.
pub const STATIC_ASSETS: &[&str] = &[
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./icon-192.png",
    "./icon-512.png",
    "./badge.png",
];

/// Served when a navigation request fails with nothing cached for its URL.
const ROOT_DOCUMENT: &str = "./index.html";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network unreachable for {url}")]
    Offline { url: String },

    #[error("request for {url} failed: {reason}")]
    Failed { url: String, reason: String },

    #[error("background worker unavailable")]
    WorkerGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// A page navigation; falls back to the root document when offline.
    Navigate,
    /// Everything else (scripts, styles, images, data).
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub mode: RequestMode,
}

impl Request {
    pub fn resource(url: impl Into<String>) -> Self {
        Request { url: url.into(), mode: RequestMode::Resource }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Request { url: url.into(), mode: RequestMode::Navigate }
    }
}

/// Response origin classification; only `Basic` (same-origin) responses are
/// cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Basic,
    Cors,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub kind: ResponseKind,
    pub body: Vec<u8>,
}

impl Response {
    pub fn basic(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Response {
            url: url.into(),
            status: 200,
            kind: ResponseKind::Basic,
            body: body.into(),
        }
    }

    fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic
    }
}

/// The network seam behind the cache.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Named caches, keyed by version tag.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, HashMap<String, Response>>,
}

impl CacheStorage {
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    pub fn open(&mut self, name: &str) -> &mut HashMap<String, Response> {
        self.caches.entry(name.to_owned()).or_default()
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str, url: &str) -> Option<&Response> {
        self.caches.get(name)?.get(url)
    }
}

/// The worker's fetch layer: one versioned cache over a [`Network`].
pub struct AssetCache {
    version: String,
    storage: CacheStorage,
    network: Arc<dyn Network>,
}

impl AssetCache {
    pub fn new(network: Arc<dyn Network>) -> Self {
        AssetCache {
            version: CACHE_NAME.to_owned(),
            storage: CacheStorage::default(),
            network,
        }
    }

    /// Override the version tag (stale-version pruning needs two of them).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Pre-populate the current cache with the static asset list. The new
    /// version takes effect immediately; there is no waiting phase.
    pub async fn install(&mut self) -> Result<(), FetchError> {
        for url in STATIC_ASSETS {
            let response = self.network.fetch(&Request::resource(*url)).await?;
            self.storage.open(&self.version).insert((*url).to_owned(), response);
        }
        log::info!("cache {} installed ({} assets)", self.version, STATIC_ASSETS.len());
        Ok(())
    }

    /// Delete every cache whose name differs from the current version.
    pub fn activate(&mut self) {
        let stale: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|name| name != &self.version)
            .collect();
        for name in stale {
            log::info!("dropping stale cache {name}");
            self.storage.delete(&name);
        }
    }

    /// Serve a request: cache hit, else network (filling the cache with
    /// same-origin 200 responses), else the offline fallback rules.
    pub async fn handle(&mut self, request: &Request) -> Result<Response, FetchError> {
        if let Some(hit) = self.storage.lookup(&self.version, &request.url) {
            return Ok(hit.clone());
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.storage
                        .open(&self.version)
                        .insert(request.url.clone(), response.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if request.mode == RequestMode::Navigate {
                    if let Some(root) = self.storage.lookup(&self.version, ROOT_DOCUMENT) {
                        log::debug!("offline navigation to {}, serving root document", request.url);
                        return Ok(root.clone());
                    }
                }
                // No fallback for non-navigation misses.
                Err(err)
            }
        }
    }

    #[cfg(test)]
    fn seed(&mut self, name: &str, url: &str, response: Response) {
        self.storage.open(name).insert(url.to_owned(), response);
    }
}
