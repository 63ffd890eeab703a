use color_eyre::Result;
use tracing::{info, warn};
use url::Url;

use super::Controller;
use crate::cache::CacheStorage;
use crate::error::WorkerError;
use crate::net::Network;

/// A user-visible system notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
}

/// The user clicked a notification (or one of its actions).
#[derive(Debug, Clone)]
pub struct NotificationClick {
  pub notification: Notification,
  pub action: Option<String>,
}

/// Trait for whatever displays notifications on the host.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that writes notifications to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      "Notification"
    );
    Ok(())
  }
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  fn branded(&self, title: &str, body: String) -> Notification {
    let settings = &self.config.notifications;
    Notification {
      title: title.to_string(),
      body,
      icon: Some(settings.icon.clone()),
      badge: Some(settings.badge.clone()),
    }
  }

  /// Confirmation shown after a queued submission was delivered.
  pub(super) fn notify_replayed(&self) {
    let settings = &self.config.notifications;
    let notification = self.branded(&settings.title, settings.body.clone());
    if let Err(e) = self.notifier.show(&notification) {
      warn!(error = %e, "Failed to show replay notification");
    }
  }

  /// Show a server push. The payload text is displayed verbatim.
  pub fn handle_push(&self, payload: Option<String>) -> Result<Notification, WorkerError> {
    let settings = &self.config.notifications;
    let body = payload.unwrap_or_else(|| settings.push_body.clone());
    let notification = self.branded(&settings.push_title, body);

    self
      .notifier
      .show(&notification)
      .map_err(WorkerError::Notification)?;
    Ok(notification)
  }

  /// Closing is up to the host; the controller says which page to bring up.
  pub fn handle_notification_click(&self, click: &NotificationClick) -> Url {
    info!(
      title = %click.notification.title,
      action = click.action.as_deref().unwrap_or("default"),
      "Notification clicked"
    );
    self.config.click_url.clone()
  }
}
