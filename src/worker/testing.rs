//! In-process doubles for controller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::{Controller, LifecycleEvent, Notification, Notifier, QueuedSubmission};
use crate::cache::{CacheStorage, SqliteStorage, SyncRegistrar};
use crate::config::Config;
use crate::net::{Network, NetworkError, Request, Response};

pub const ORIGIN: &str = "http://localhost:8000";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Scripted answer for one route.
#[derive(Debug, Clone)]
pub enum Outcome {
  Respond(Response),
  Status(u16),
  Offline,
}

impl Outcome {
  pub fn ok(body: &str) -> Self {
    Outcome::Respond(Response::text(200, body))
  }
}

type RouteKey = (String, String);

/// Network double. Unknown routes answer 404; `set_offline` fails everything.
#[derive(Default)]
pub struct ScriptedNetwork {
  offline: AtomicBool,
  routes: Mutex<HashMap<RouteKey, Outcome>>,
  /// One-shot outcomes, used before the standing route
  queued: Mutex<HashMap<RouteKey, VecDeque<Outcome>>>,
  calls: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offline() -> Self {
    let network = Self::new();
    network.set_offline(true);
    network
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn route(&self, method: &str, url: &Url, outcome: Outcome) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method.to_string(), url.to_string()), outcome);
  }

  pub fn queue(&self, method: &str, url: &Url, outcome: Outcome) {
    self
      .queued
      .lock()
      .unwrap()
      .entry((method.to_string(), url.to_string()))
      .or_default()
      .push_back(outcome);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Unreachable("offline".to_string()));
    }

    let key = (request.method.as_str().to_string(), request.url.to_string());
    let one_shot = self
      .queued
      .lock()
      .unwrap()
      .get_mut(&key)
      .and_then(|q| q.pop_front());
    let outcome = one_shot
      .or_else(|| self.routes.lock().unwrap().get(&key).cloned())
      .unwrap_or(Outcome::Status(404));

    match outcome {
      Outcome::Respond(response) => Ok(response),
      Outcome::Status(status) => Ok(Response::text(status, "")),
      Outcome::Offline => Err(NetworkError::Unreachable("offline".to_string())),
    }
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct RecordingRegistrar {
  tags: Mutex<Vec<String>>,
  failing: AtomicBool,
}

impl RecordingRegistrar {
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn tags(&self) -> Vec<String> {
    self.tags.lock().unwrap().clone()
  }
}

impl SyncRegistrar for RecordingRegistrar {
  fn register(&self, tag: &str) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(eyre!("sync registration refused"));
    }
    self.tags.lock().unwrap().push(tag.to_string());
    Ok(())
  }

  fn pending(&self) -> Result<Vec<String>> {
    Ok(self.tags())
  }

  fn complete(&self, tag: &str) -> Result<()> {
    self.tags.lock().unwrap().retain(|t| t != tag);
    Ok(())
  }
}

pub struct Harness {
  pub controller: Controller<SqliteStorage, ScriptedNetwork>,
  pub storage: Arc<SqliteStorage>,
  pub network: Arc<ScriptedNetwork>,
  pub notifier: Arc<RecordingNotifier>,
  pub registrar: Arc<RecordingRegistrar>,
}

pub fn harness() -> Harness {
  harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  harness_on(config, storage)
}

/// Build a controller over existing storage (e.g. a previous generation's).
pub fn harness_on(config: Config, storage: Arc<SqliteStorage>) -> Harness {
  let network = Arc::new(ScriptedNetwork::new());
  let notifier = Arc::new(RecordingNotifier::default());
  let registrar = Arc::new(RecordingRegistrar::default());

  let controller = Controller::new(
    config.worker().unwrap(),
    Arc::clone(&storage),
    Arc::clone(&network),
  )
  .with_notifier(notifier.clone())
  .with_registrar(registrar.clone());

  Harness {
    controller,
    storage,
    network,
    notifier,
    registrar,
  }
}

impl Harness {
  /// Answer every seed URL, then install and activate.
  pub async fn ready(self) -> Self {
    self.route_seeds();
    self.controller.dispatch(LifecycleEvent::Install).await.unwrap();
    self.controller.dispatch(LifecycleEvent::Activate).await.unwrap();
    self
  }

  pub fn route_seeds(&self) {
    for seed in &self.controller.config().precache {
      self.network.route("GET", seed, Outcome::ok(seed.path()));
    }
  }

  pub fn queued(&self) -> Vec<QueuedSubmission> {
    self
      .storage
      .entries(&self.controller.config().submission_cache)
      .unwrap()
  }
}
