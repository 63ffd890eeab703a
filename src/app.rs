use crate::cache::{CacheStorage, SqliteStorage, SyncRegistrar};
use crate::commands::Command;
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::net::{HttpNetwork, Network, Request, Response};
use crate::worker::{
  Controller, EventOutcome, LifecycleEvent, LogNotifier, Notification, NotificationClick,
  QueuedSubmission, ReplayReport, submission_key,
};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

/// Host for the controller: turns commands into lifecycle events and
/// schedules background sync when the origin is reachable.
pub struct App<N: Network = HttpNetwork> {
  config: Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
  controller: Controller<SqliteStorage, N>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
    let network = Arc::new(HttpNetwork::new(Duration::from_secs(
      config.request_timeout_secs,
    ))?);
    Self::with_parts(config, storage, network)
  }
}

impl<N: Network> App<N> {
  pub fn with_parts(config: Config, storage: Arc<SqliteStorage>, network: Arc<N>) -> Result<Self> {
    let worker = config.worker()?;
    let controller = Controller::new(worker, Arc::clone(&storage), Arc::clone(&network))
      .with_notifier(Arc::new(LogNotifier))
      .with_registrar(storage.clone());

    Ok(Self {
      config,
      storage,
      network,
      controller,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Install => self.install().await,
      Command::Fetch { path, navigate } => {
        self.boot().await?;
        let url = self.config.resolve(&path)?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        };
        self.fetch(request).await
      }
      Command::Submit { fields, path } => {
        self.boot().await?;
        let path = path.unwrap_or_else(|| self.config.submit_path.clone());
        let body = form_urlencoded::Serializer::new(String::new())
          .extend_pairs(&fields)
          .finish();
        self
          .fetch(Request::post_form(self.config.resolve(&path)?, body))
          .await
      }
      Command::Sync { tag } => {
        self.boot().await?;
        let tag = tag.unwrap_or_else(|| self.config.sync.tag.clone());
        match self.sync(&tag).await? {
          Some(report) => print_report(&report),
          None => println!("No handler for sync tag '{}'", tag),
        }
        Ok(())
      }
      Command::Push { text } => {
        if let EventOutcome::Notified(notification) = self
          .controller
          .dispatch(LifecycleEvent::Push { payload: text })
          .await?
        {
          println!("{}: {}", notification.title, notification.body);
        }
        Ok(())
      }
      Command::Click => self.click().await,
      Command::Queue => self.print_queue(),
      Command::Caches => self.print_caches(),
      Command::Watch => {
        self.boot().await?;
        self.watch().await
      }
    }
  }

  /// Resume the installed generation, installing it first if needed.
  async fn boot(&self) -> Result<()> {
    if self.controller.resume()? {
      debug!("Resumed installed cache generation");
      return Ok(());
    }
    self.install().await
  }

  async fn install(&self) -> Result<()> {
    if let EventOutcome::Installed { seeded } =
      self.controller.dispatch(LifecycleEvent::Install).await?
    {
      println!("Installed {} ({} assets)", self.config.asset_cache_name(), seeded);
    }
    if let EventOutcome::Activated { purged } =
      self.controller.dispatch(LifecycleEvent::Activate).await?
    {
      for name in purged {
        println!("Purged {}", name);
      }
    }
    Ok(())
  }

  async fn fetch(&self, request: Request) -> Result<()> {
    let response = self.respond(request).await?;
    print_response(&response);
    Ok(())
  }

  /// Answer a request through the controller, sending it ourselves when the
  /// controller lets it pass.
  async fn respond(&self, request: Request) -> Result<Response> {
    match self
      .controller
      .dispatch(LifecycleEvent::Fetch(request.clone()))
      .await?
    {
      EventOutcome::Respond(response) => Ok(response),
      _ => Ok(self.network.fetch(&request).await?),
    }
  }

  /// Dispatch a sync event.
  ///
  /// The registration is cleared before the sweep, so a submission queued
  /// while the sweep runs registers the tag again. Anything left pending
  /// registers it again afterwards. Tags without a handler stay cleared.
  async fn sync(&self, tag: &str) -> Result<Option<ReplayReport>> {
    self.storage.complete(tag)?;

    let outcome = match self
      .controller
      .dispatch(LifecycleEvent::Sync {
        tag: tag.to_string(),
      })
      .await
    {
      Ok(outcome) => outcome,
      Err(e) => {
        self.storage.register(tag)?;
        return Err(e.into());
      }
    };

    match outcome {
      EventOutcome::Replayed(report) => {
        if !report.pending.is_empty() {
          self.storage.register(tag)?;
        }
        Ok(Some(report))
      }
      _ => {
        debug!(tag, "Dropped sync registration without a handler");
        Ok(None)
      }
    }
  }

  async fn click(&self) -> Result<()> {
    let settings = &self.config.notifications;
    let click = NotificationClick {
      notification: Notification {
        title: settings.title.clone(),
        body: settings.body.clone(),
        icon: Some(settings.icon.clone()),
        badge: Some(settings.badge.clone()),
      },
      action: None,
    };

    if let EventOutcome::OpenWindow(url) = self
      .controller
      .dispatch(LifecycleEvent::NotificationClick(click))
      .await?
    {
      println!("Opening {}", url);
      open::that(url.as_str()).map_err(|e| eyre!("Failed to open {}: {}", url, e))?;
    }
    Ok(())
  }

  async fn watch(&self) -> Result<()> {
    let probe = self.config.resolve(&self.config.sync.probe_path)?;
    let tick_rate = Duration::from_secs(self.config.sync.interval_secs.max(1));
    let mut events = EventHandler::new(tick_rate);
    let mut online: Option<bool> = None;

    info!(probe = %probe, interval = ?tick_rate, "Watching connectivity");
    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          let reachable = self.sync_if_reachable(&probe).await;
          if online != Some(reachable) {
            info!(reachable, "Connectivity changed");
            online = Some(reachable);
          }
        }
        Event::Shutdown => {
          info!("Shutting down");
          break;
        }
      }
    }

    Ok(())
  }

  /// One watch tick: fire pending syncs if the origin answers the probe.
  async fn sync_if_reachable(&self, probe: &Url) -> bool {
    let reachable = self.probe(probe).await;
    if reachable {
      self.fire_pending_syncs().await;
    }
    reachable
  }

  async fn probe(&self, url: &Url) -> bool {
    match self.network.fetch(&Request::get(url.clone())).await {
      Ok(response) => response.is_success(),
      Err(e) => {
        debug!(error = %e, "Origin unreachable");
        false
      }
    }
  }

  async fn fire_pending_syncs(&self) {
    let tags = match self.storage.pending() {
      Ok(tags) => tags,
      Err(e) => {
        warn!(error = %e, "Failed to read sync registrations");
        return;
      }
    };

    for tag in tags {
      if let Err(e) = self.sync(&tag).await {
        warn!(tag = %tag, error = %e, "Background sync failed");
      }
    }
  }

  fn print_queue(&self) -> Result<()> {
    let queued: Vec<QueuedSubmission> = self.storage.entries(&self.config.cache.submissions)?;
    if queued.is_empty() {
      println!("No queued submissions");
      return Ok(());
    }

    for submission in queued {
      let queued_at = submission
        .queued_at()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
      println!(
        "{}  {}  {} fields  {}",
        submission_key(submission.timestamp),
        submission.url,
        submission.fields.len(),
        queued_at
      );
    }
    Ok(())
  }

  fn print_caches(&self) -> Result<()> {
    let current = self.config.asset_cache_name();
    for name in self.storage.cache_names()? {
      let marker = if name == current {
        " (current)"
      } else if name == self.config.cache.submissions {
        " (submissions)"
      } else {
        ""
      };
      println!("{}{}  {} entries", name, marker, self.storage.count(&name)?);
    }
    Ok(())
  }
}

fn print_response(response: &Response) {
  println!("HTTP {}", response.status);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  match std::str::from_utf8(&response.body) {
    Ok(text) => println!("{}", text),
    Err(_) => println!("<{} bytes of binary data>", response.body.len()),
  }
}

fn print_report(report: &ReplayReport) {
  for key in &report.delivered {
    println!("Delivered {}", key);
  }
  for key in &report.pending {
    println!("Still queued {}", key);
  }
  if report.delivered.is_empty() && report.pending.is_empty() {
    println!("Nothing to replay");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{FieldMap, NetworkError};
  use crate::worker::testing::{url, Outcome, ScriptedNetwork};
  use reqwest::Method;
  use std::sync::atomic::{AtomicBool, Ordering};

  const TAG: &str = "form-sync";
  const QUEUE: &str = "mw-intake-submissions";

  fn storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::open_in_memory().unwrap())
  }

  /// Build and boot an app over `network`, answering the seed list on `scripted`.
  async fn booted<N: Network>(
    storage: Arc<SqliteStorage>,
    scripted: &ScriptedNetwork,
    network: Arc<N>,
  ) -> App<N> {
    let config = Config::default();
    for seed in config.worker().unwrap().precache {
      scripted.route("GET", &seed, Outcome::ok(seed.path()));
    }
    scripted.route("GET", &url("/health"), Outcome::ok("ok"));
    let app = App::with_parts(config, storage, network).unwrap();
    app.boot().await.unwrap();
    app
  }

  async fn scripted_app() -> (App<ScriptedNetwork>, Arc<SqliteStorage>, Arc<ScriptedNetwork>) {
    let storage = storage();
    let network = Arc::new(ScriptedNetwork::new());
    let app = booted(Arc::clone(&storage), &network, Arc::clone(&network)).await;
    (app, storage, network)
  }

  /// Queue one submission the way an offline `submit` does.
  async fn submit_offline(app: &App<ScriptedNetwork>, network: &ScriptedNetwork) {
    network.set_offline(true);
    let response = app
      .respond(Request::post_form(url("/submit"), "business_name=Acme"))
      .await
      .unwrap();
    assert_eq!(response.status, 202);
    network.set_offline(false);
  }

  fn queued_submission(timestamp: i64, name: &str) -> QueuedSubmission {
    QueuedSubmission {
      url: url("/submit"),
      method: "POST".to_string(),
      fields: FieldMap::from_iter([("business_name", name)]),
      timestamp,
    }
  }

  #[tokio::test]
  async fn test_offline_submit_registers_background_sync() {
    let (app, storage, network) = scripted_app().await;

    submit_offline(&app, &network).await;

    assert_eq!(storage.count(QUEUE).unwrap(), 1);
    assert_eq!(storage.pending().unwrap(), vec![TAG.to_string()]);
  }

  #[tokio::test]
  async fn test_unreachable_origin_fires_nothing() {
    let (app, storage, network) = scripted_app().await;
    submit_offline(&app, &network).await;
    network.route("GET", &url("/health"), Outcome::Offline);
    let calls_before = network.calls().len();

    assert!(!app.sync_if_reachable(&url("/health")).await);

    let calls = network.calls();
    assert_eq!(calls.len() - calls_before, 1);
    assert_eq!(calls.last().unwrap().url, url("/health"));
    assert_eq!(storage.count(QUEUE).unwrap(), 1);
    assert_eq!(storage.pending().unwrap(), vec![TAG.to_string()]);
  }

  #[tokio::test]
  async fn test_reachable_origin_replays_and_completes_registration() {
    let (app, storage, network) = scripted_app().await;
    submit_offline(&app, &network).await;
    network.route("POST", &url("/submit"), Outcome::ok("saved"));

    assert!(app.sync_if_reachable(&url("/health")).await);

    assert_eq!(storage.count(QUEUE).unwrap(), 0);
    assert!(storage.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_replay_keeps_registration() {
    let (app, storage, network) = scripted_app().await;
    submit_offline(&app, &network).await;
    network.route("POST", &url("/submit"), Outcome::Status(500));

    assert!(app.sync_if_reachable(&url("/health")).await);

    assert_eq!(storage.count(QUEUE).unwrap(), 1);
    assert_eq!(storage.pending().unwrap(), vec![TAG.to_string()]);
  }

  #[tokio::test]
  async fn test_tag_without_handler_is_dropped() {
    let (app, storage, _network) = scripted_app().await;
    storage.register("newsletter-sync").unwrap();

    let report = app.sync("newsletter-sync").await.unwrap();

    assert!(report.is_none());
    assert!(storage.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unreadable_queue_entry_keeps_registration() {
    let (app, storage, network) = scripted_app().await;
    storage
      .put(QUEUE, &crate::cache::CachedResponse::new(url("/junk"), &Response::text(200, "?")))
      .unwrap();
    storage.register(TAG).unwrap();
    network.route("POST", &url("/submit"), Outcome::ok("saved"));

    let report = app.sync(TAG).await.unwrap().unwrap();

    assert_eq!(report.pending.len(), 1);
    assert_eq!(storage.pending().unwrap(), vec![TAG.to_string()]);
  }

  #[tokio::test]
  async fn test_passthrough_requests_go_to_network() {
    let (app, _storage, network) = scripted_app().await;
    let mut request = Request::get(url("/admin/submission/4"));
    request.method = Method::DELETE;
    network.route("DELETE", &url("/admin/submission/4"), Outcome::ok("deleted"));

    let response = app.respond(request).await.unwrap();

    assert_eq!(response.body_text(), "deleted");
    assert_eq!(network.calls().last().unwrap().method, Method::DELETE);
  }

  #[tokio::test]
  async fn test_boot_resumes_without_reseeding() {
    let storage = storage();
    let network = Arc::new(ScriptedNetwork::new());
    booted(Arc::clone(&storage), &network, Arc::clone(&network)).await;
    let calls_after_install = network.calls().len();

    let restarted = App::with_parts(Config::default(), storage, Arc::clone(&network)).unwrap();
    restarted.boot().await.unwrap();

    assert_eq!(network.calls().len(), calls_after_install);
  }

  /// Network that queues another submission, as a concurrent `submit` would,
  /// while the first replay POST is in flight.
  struct SubmitDuringReplay {
    inner: Arc<ScriptedNetwork>,
    storage: Arc<SqliteStorage>,
    submitted: AtomicBool,
  }

  impl Network for SubmitDuringReplay {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetworkError> {
      if request.method == Method::POST && !self.submitted.swap(true, Ordering::SeqCst) {
        self.storage.put(QUEUE, &queued_submission(2, "Late")).unwrap();
        self.storage.register(TAG).unwrap();
      }
      self.inner.fetch(request).await
    }
  }

  #[tokio::test]
  async fn test_submission_queued_during_replay_stays_registered() {
    let storage = storage();
    let scripted = Arc::new(ScriptedNetwork::new());
    let network = Arc::new(SubmitDuringReplay {
      inner: Arc::clone(&scripted),
      storage: Arc::clone(&storage),
      submitted: AtomicBool::new(false),
    });
    let app = booted(Arc::clone(&storage), &scripted, network).await;
    storage.put(QUEUE, &queued_submission(1, "Early")).unwrap();
    storage.register(TAG).unwrap();
    scripted.route("POST", &url("/submit"), Outcome::ok("saved"));

    let report = app.sync(TAG).await.unwrap().unwrap();

    assert_eq!(report.delivered, vec![submission_key(1)]);
    assert!(report.pending.is_empty());
    let remaining: Vec<QueuedSubmission> = storage.entries(QUEUE).unwrap();
    assert_eq!(remaining, vec![queued_submission(2, "Late")]);
    assert_eq!(storage.pending().unwrap(), vec![TAG.to_string()]);
  }
}
