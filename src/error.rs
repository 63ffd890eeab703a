use thiserror::Error;

use crate::net::NetworkError;
use crate::worker::Phase;

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("Install failed while caching {url}: {reason}")]
  InstallFailed { url: String, reason: String },

  #[error("Cannot handle {event} while {phase:?}")]
  InvalidTransition { event: &'static str, phase: Phase },

  #[error("Server rejected submission with status {status}")]
  Rejected { status: u16 },

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("Cache storage error: {0}")]
  Storage(color_eyre::Report),

  #[error("Failed to show notification: {0}")]
  Notification(color_eyre::Report),

  #[error("Failed to encode response: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("Controller state lock poisoned")]
  Poisoned,
}

impl From<color_eyre::Report> for WorkerError {
  fn from(e: color_eyre::Report) -> Self {
    WorkerError::Storage(e)
  }
}
