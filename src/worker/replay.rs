use tracing::{info, warn};

use super::{Controller, QueuedSubmission};
use crate::cache::{CacheEntry, CacheStorage};
use crate::error::WorkerError;
use crate::net::Network;

/// Keys delivered and keys still queued after one replay sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub delivered: Vec<String>,
  pub pending: Vec<String>,
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  /// Re-POST every queued submission.
  ///
  /// Each entry is independent: a failure leaves that entry queued and the
  /// sweep moves on. Order follows the queue's enumeration order, which is
  /// not a delivery-order guarantee. Rows that cannot be decoded stay in the
  /// queue and are reported as pending.
  pub async fn replay_submissions(&self) -> Result<ReplayReport, WorkerError> {
    let queued: Vec<QueuedSubmission> = self.storage.entries(&self.config.submission_cache)?;
    let stored = self.storage.keys(&self.config.submission_cache)?;
    info!(count = queued.len(), "Replaying queued submissions");

    let mut report = ReplayReport::default();
    for submission in &queued {
      let key = submission.cache_key();
      match self.replay_one(submission).await {
        Ok(()) => {
          info!(key = %key, "Delivered queued submission");
          report.delivered.push(key);
        }
        Err(e) => {
          warn!(key = %key, error = %e, "Replay failed, submission stays queued");
          report.pending.push(key);
        }
      }
    }

    for key in stored {
      if !queued.iter().any(|q| q.cache_key() == key) {
        warn!(key = %key, "Queued submission unreadable, leaving it in place");
        report.pending.push(key);
      }
    }

    Ok(report)
  }

  async fn replay_one(&self, submission: &QueuedSubmission) -> Result<(), WorkerError> {
    let response = self.network.fetch(&submission.to_request()).await?;
    if !response.is_success() {
      return Err(WorkerError::Rejected {
        status: response.status,
      });
    }

    self
      .storage
      .delete(&self.config.submission_cache, &submission.cache_key())?;
    self.notify_replayed();
    Ok(())
  }
}
