//! Offline cache and sync controller.
//!
//! The controller intercepts requests from the form pages, serves static
//! content from a versioned asset cache, queues form submissions that cannot be
//! delivered and replays them when the host reports connectivity.
//!
//! Each host event (install, activate, fetch, sync, push, notification click)
//! is a typed `LifecycleEvent`; `Controller::dispatch` resolves once the
//! event's work is complete, so the host holds the event open by awaiting it.

mod lifecycle;
mod notify;
mod replay;
mod submission;
#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::Phase;
pub use notify::{LogNotifier, Notification, NotificationClick, Notifier};
pub use replay::ReplayReport;
pub use submission::{submission_key, QueuedSubmission};

use reqwest::Method;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, SyncRegistrar, UnsupportedRegistrar};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::net::{Network, Request, Response};

/// Input delivered by the host.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
  Install,
  Activate,
  Fetch(Request),
  Sync { tag: String },
  Push { payload: Option<String> },
  NotificationClick(NotificationClick),
}

impl LifecycleEvent {
  pub fn name(&self) -> &'static str {
    match self {
      LifecycleEvent::Install => "install",
      LifecycleEvent::Activate => "activate",
      LifecycleEvent::Fetch(_) => "fetch",
      LifecycleEvent::Sync { .. } => "sync",
      LifecycleEvent::Push { .. } => "push",
      LifecycleEvent::NotificationClick(_) => "notificationclick",
    }
  }
}

/// What the host should do once an event is handled.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed { seeded: usize },
  Activated { purged: Vec<String> },
  /// Answer the page with this response
  Respond(Response),
  /// Not intercepted: the host sends the request itself
  Passthrough,
  Replayed(ReplayReport),
  /// Sync tag not owned by this controller
  Ignored,
  Notified(Notification),
  OpenWindow(Url),
}

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  Submission,
  Retrieval,
  Passthrough,
}

pub struct Controller<S: CacheStorage, N: Network> {
  config: WorkerConfig,
  storage: Arc<S>,
  network: Arc<N>,
  assets: CacheLayer<S, N>,
  notifier: Arc<dyn Notifier>,
  registrar: Arc<dyn SyncRegistrar>,
  phase: Mutex<Phase>,
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  /// Create a controller for one cache generation.
  ///
  /// Notifications go to the log and background sync is unavailable until
  /// the host supplies its own notifier and registrar.
  pub fn new(config: WorkerConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    let assets = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      config.asset_cache.clone(),
    )
    .with_offline_page(config.offline_page.clone())
    .with_network_only(config.network_only_segments.clone());

    Self {
      config,
      storage,
      network,
      assets,
      notifier: Arc::new(LogNotifier),
      registrar: Arc::new(UnsupportedRegistrar),
      phase: Mutex::new(Phase::Parsed),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_registrar(mut self, registrar: Arc<dyn SyncRegistrar>) -> Self {
    self.registrar = registrar;
    self
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  /// Handle one host event to completion.
  pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome, WorkerError> {
    debug!(event = event.name(), "Dispatching event");
    match event {
      LifecycleEvent::Install => {
        let seeded = self.install().await?;
        Ok(EventOutcome::Installed { seeded })
      }
      LifecycleEvent::Activate => {
        let purged = self.activate()?;
        Ok(EventOutcome::Activated { purged })
      }
      LifecycleEvent::Fetch(request) => self.handle_fetch(request).await,
      LifecycleEvent::Sync { tag } => self.handle_sync(&tag).await,
      LifecycleEvent::Push { payload } => {
        let notification = self.handle_push(payload)?;
        Ok(EventOutcome::Notified(notification))
      }
      LifecycleEvent::NotificationClick(click) => {
        Ok(EventOutcome::OpenWindow(self.handle_notification_click(&click)))
      }
    }
  }

  /// Decide how a request is handled, in order: form POST, any GET, everything else.
  pub fn route(&self, request: &Request) -> Route {
    if request.method == Method::POST && request.url.path() == self.config.submit_path {
      Route::Submission
    } else if request.method == Method::GET {
      Route::Retrieval
    } else {
      Route::Passthrough
    }
  }

  /// Intercept a request from a controlled page.
  ///
  /// Until activation completes no page is controlled and every request
  /// passes through.
  pub async fn handle_fetch(&self, request: Request) -> Result<EventOutcome, WorkerError> {
    if self.phase()? != Phase::Ready {
      return Ok(EventOutcome::Passthrough);
    }

    match self.route(&request) {
      Route::Submission => {
        let response = self.handle_submission(request).await?;
        Ok(EventOutcome::Respond(response))
      }
      Route::Retrieval => {
        let result = self.assets.fetch(&request).await?;
        debug!(url = %request.url, source = ?result.source, status = result.response.status, "Served GET");
        Ok(EventOutcome::Respond(result.response))
      }
      Route::Passthrough => Ok(EventOutcome::Passthrough),
    }
  }

  async fn handle_sync(&self, tag: &str) -> Result<EventOutcome, WorkerError> {
    if tag != self.config.sync_tag {
      debug!(tag, "Ignoring sync for unknown tag");
      return Ok(EventOutcome::Ignored);
    }

    let report = self.replay_submissions().await?;
    info!(
      delivered = report.delivered.len(),
      pending = report.pending.len(),
      "Background replay finished"
    );
    Ok(EventOutcome::Replayed(report))
  }
}
