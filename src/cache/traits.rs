//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::net::Response;

/// Trait for values that live in a named cache.
pub trait CacheEntry: Send + Sync + Serialize + DeserializeOwned {
  /// Key of this entry within its cache (e.g. a URL, `form-<timestamp>`)
  fn cache_key(&self) -> String;
}

/// Trait for the host's deferred-task scheduler.
///
/// A registered tag asks the host to deliver a sync event once connectivity
/// is back. Registering the same tag twice is a no-op.
pub trait SyncRegistrar: Send + Sync {
  fn register(&self, tag: &str) -> Result<()>;

  /// Tags waiting for connectivity
  fn pending(&self) -> Result<Vec<String>>;

  fn complete(&self, tag: &str) -> Result<()>;
}

/// Registrar for hosts without background sync.
/// Every registration fails, so queued submissions wait for a manual sync.
pub struct UnsupportedRegistrar;

impl SyncRegistrar for UnsupportedRegistrar {
  fn register(&self, tag: &str) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
      "Background sync unavailable, cannot register '{}'",
      tag
    ))
  }

  fn pending(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn complete(&self, _tag: &str) -> Result<()> {
    Ok(())
  }
}

/// A stored GET response in the asset cache, keyed by absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub url: Url,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn new(url: Url, response: &Response) -> Self {
    Self {
      url,
      response: response.clone(),
      cached_at: Utc::now(),
    }
  }
}

impl CacheEntry for CachedResponse {
  fn cache_key(&self) -> String {
    self.url.to_string()
  }
}

/// Result of a retrieval, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// A locally produced response for when neither network nor cache could answer.
  pub fn offline(response: Response, source: CacheSource) -> Self {
    Self {
      response,
      source,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// Asset cache hit
  Cache,
  /// Pre-cached offline page
  OfflinePage,
  /// Offline page built in place
  InlineFallback,
  /// Synthetic 503
  Unavailable,
}
