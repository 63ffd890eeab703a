//! Cache layer that orchestrates the asset cache with network fetching.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CacheResult, CacheSource, CachedResponse};
use crate::error::WorkerError;
use crate::net::{Network, NetworkError, Request, Response};

/// Offline page built in place when nothing better is cached.
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
  <style>
    body { font-family: system-ui, sans-serif; text-align: center; padding: 3rem 1rem; color: #1e3a8a; }
    button { margin-top: 1.5rem; padding: 0.75rem 1.5rem; border: 0; border-radius: 0.5rem; background: #1e3a8a; color: #fff; font-size: 1rem; cursor: pointer; }
  </style>
</head>
<body>
  <h1>You're offline</h1>
  <p>Check your connection. Any form you submit will be sent once you're back online.</p>
  <button onclick="window.location.reload()">Try again</button>
</body>
</html>
"#;

/// Cache layer for GET traffic.
///
/// Sits between the controller and the network. Static content is served
/// cache-first with write-through on a miss; network-only paths (admin views,
/// API calls) never touch the cache.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  /// Current asset generation
  cache_name: String,
  offline_page: Option<Url>,
  /// Path segments that force a network-only fetch (lowercase)
  network_only: BTreeSet<String>,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, cache_name: impl Into<String>) -> Self {
    Self {
      storage,
      network,
      cache_name: cache_name.into(),
      offline_page: None,
      network_only: BTreeSet::new(),
    }
  }

  /// Serve this pre-cached page to offline navigations.
  pub fn with_offline_page(mut self, url: Option<Url>) -> Self {
    self.offline_page = url;
    self
  }

  pub fn with_network_only(mut self, segments: BTreeSet<String>) -> Self {
    self.network_only = segments;
    self
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// Whether any path segment marks the URL as dynamic content.
  pub fn is_network_only(&self, url: &Url) -> bool {
    url
      .path_segments()
      .map(|mut segments| {
        segments.any(|s| self.network_only.contains(&s.to_ascii_lowercase()))
      })
      .unwrap_or(false)
  }

  /// Fetch seed URLs and commit them to the asset cache in one step.
  ///
  /// All fetches run concurrently. A single failed or non-2xx fetch fails the
  /// whole seeding and nothing is written.
  pub async fn seed(&self, urls: &[Url]) -> Result<usize, WorkerError> {
    let results = join_all(urls.iter().map(|url| self.fetch_seed(url))).await;

    let mut entries = Vec::with_capacity(results.len());
    for (url, result) in urls.iter().zip(results) {
      match result {
        Ok(response) if response.is_success() => {
          entries.push(CachedResponse::new(url.clone(), &response));
        }
        Ok(response) => {
          return Err(WorkerError::InstallFailed {
            url: url.to_string(),
            reason: format!("status {}", response.status),
          });
        }
        Err(e) => {
          return Err(WorkerError::InstallFailed {
            url: url.to_string(),
            reason: e.to_string(),
          });
        }
      }
    }

    self.storage.put_all(&self.cache_name, &entries)?;
    info!(cache = %self.cache_name, count = entries.len(), "Seeded asset cache");
    Ok(entries.len())
  }

  async fn fetch_seed(&self, url: &Url) -> Result<Response, NetworkError> {
    self.network.fetch(&Request::get(url.clone())).await
  }

  /// Fetch a GET request.
  ///
  /// 1. Network-only path: straight to the network, failures included
  /// 2. Cache hit: return immediately, no freshness check
  /// 3. Miss: fetch, and store 2xx responses before returning them
  /// 4. Any failure in 2-3: cache again, then offline page, then 503
  pub async fn fetch(&self, request: &Request) -> Result<CacheResult, WorkerError> {
    if self.is_network_only(&request.url) {
      debug!(url = %request.url, "Network-only request");
      let response = self.network.fetch(request).await?;
      return Ok(CacheResult::from_network(response));
    }

    match self.cache_first(request).await {
      Ok(result) => Ok(result),
      Err(e) => {
        debug!(url = %request.url, error = %e, "Retrieval failed, falling back");
        Ok(self.offline_fallback(request))
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<CacheResult, WorkerError> {
    let key = request.url.as_str();

    if let Some(cached) = self.storage.get::<CachedResponse>(&self.cache_name, key)? {
      debug!(url = %request.url, "Asset cache hit");
      return Ok(CacheResult::from_cache(cached));
    }

    let response = self.network.fetch(request).await?;
    if response.is_success() {
      self.storage.put(
        &self.cache_name,
        &CachedResponse::new(request.url.clone(), &response),
      )?;
      debug!(url = %request.url, "Cached network response");
    }

    Ok(CacheResult::from_network(response))
  }

  fn offline_fallback(&self, request: &Request) -> CacheResult {
    if let Some(cached) = self.lookup(request.url.as_str()) {
      return CacheResult::from_cache(cached);
    }

    if request.is_navigation() {
      if let Some(page) = self
        .offline_page
        .as_ref()
        .and_then(|url| self.lookup(url.as_str()))
      {
        info!(url = %request.url, "Serving cached offline page");
        return CacheResult::offline(page.response, CacheSource::OfflinePage);
      }

      info!(url = %request.url, "Serving inline offline page");
      return CacheResult::offline(Response::html(200, OFFLINE_HTML), CacheSource::InlineFallback);
    }

    CacheResult::offline(Response::text(503, "Offline"), CacheSource::Unavailable)
  }

  /// Cache read for the fallback path, where a storage error is just a miss.
  fn lookup(&self, key: &str) -> Option<CachedResponse> {
    match self.storage.get::<CachedResponse>(&self.cache_name, key) {
      Ok(found) => found,
      Err(e) => {
        warn!(key, error = %e, "Asset cache unreadable during fallback");
        None
      }
    }
  }
}
