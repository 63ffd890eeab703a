use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::SqliteStorage;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin serving the intake form (e.g. "http://localhost:8000")
  pub origin: String,
  pub cache: CacheConfig,
  /// Paths fetched into the asset cache at install time
  pub precache: Vec<String>,
  /// Path of the form POST endpoint
  pub submit_path: String,
  /// Pre-cached page served to offline navigations
  pub offline_path: Option<String>,
  /// Path segments that are never served from cache (case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub network_only_segments: BTreeSet<String>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
  pub request_timeout_secs: u64,
  /// Write logs to daily files here instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Asset cache name is "<static_prefix>-<version>"
  pub static_prefix: String,
  pub version: String,
  /// Name of the durable submission queue
  pub submissions: String,
  /// SQLite file (default: $XDG_DATA_HOME/formsync/cache.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub tag: String,
  /// Path probed by the host to detect connectivity
  pub probe_path: String,
  pub interval_secs: u64,
  /// Queue submissions the server answered with an error status.
  /// When false the error response goes straight back to the page.
  pub queue_rejected: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  /// Replay confirmation
  pub title: String,
  pub body: String,
  /// Title for server pushes
  pub push_title: String,
  /// Body for pushes without payload
  pub push_body: String,
  pub icon: String,
  pub badge: String,
  /// Opened when a notification is clicked
  pub click_path: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000".to_string(),
      cache: CacheConfig::default(),
      precache: vec![
        "/".to_string(),
        "/static/manifest.json".to_string(),
        "/static/mw_logo.png".to_string(),
        "/static/css/style.css".to_string(),
      ],
      submit_path: "/submit".to_string(),
      offline_path: Some("/offline.html".to_string()),
      network_only_segments: ["admin", "api"].iter().map(|s| s.to_string()).collect(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      request_timeout_secs: 15,
      log_dir: None,
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_prefix: "mw-intake-static".to_string(),
      version: "v1".to_string(),
      submissions: "mw-intake-submissions".to_string(),
      database: None,
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "form-sync".to_string(),
      probe_path: "/health".to_string(),
      interval_secs: 30,
      queue_rejected: true,
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Form Submitted".to_string(),
      body: "Your offline form submission has been sent successfully!".to_string(),
      push_title: "MW Design Studio".to_string(),
      push_body: "New update available".to_string(),
      icon: "/static/icons/icon-192x192.png".to_string(),
      badge: "/static/icons/icon-72x72.png".to_string(),
      click_path: "/".to_string(),
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

/// Controller settings with every path resolved against the origin.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub asset_cache: String,
  pub submission_cache: String,
  pub precache: Vec<Url>,
  pub submit_path: String,
  pub offline_page: Option<Url>,
  pub network_only_segments: BTreeSet<String>,
  pub sync_tag: String,
  pub queue_rejected: bool,
  pub notifications: NotificationConfig,
  pub click_url: Url,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./formsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/formsync/config.yaml
  ///
  /// Without a file the defaults apply. `FORMSYNC_ORIGIN` overrides the origin.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("FORMSYNC_ORIGIN") {
      config.origin = origin;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("formsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("formsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  pub fn asset_cache_name(&self) -> String {
    format!("{}-{}", self.cache.static_prefix, self.cache.version)
  }

  pub fn worker(&self) -> Result<WorkerConfig> {
    let precache = self
      .precache
      .iter()
      .map(|p| self.resolve(p))
      .collect::<Result<Vec<_>>>()?;

    let offline_page = self
      .offline_path
      .as_deref()
      .map(|p| self.resolve(p))
      .transpose()?;

    Ok(WorkerConfig {
      asset_cache: self.asset_cache_name(),
      submission_cache: self.cache.submissions.clone(),
      precache,
      submit_path: self.submit_path.clone(),
      offline_page,
      network_only_segments: self.network_only_segments.clone(),
      sync_tag: self.sync.tag.clone(),
      queue_rejected: self.sync.queue_rejected,
      notifications: self.notifications.clone(),
      click_url: self.resolve(&self.notifications.click_path)?,
    })
  }
}
