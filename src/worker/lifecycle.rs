use tracing::{error, info};

use super::Controller;
use crate::cache::CacheStorage;
use crate::error::WorkerError;
use crate::net::Network;

/// Controller phase. Not persisted: a new process starts at `Parsed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Parsed,
  Installing,
  /// Waiting to activate
  Installed,
  Activating,
  /// Controlling pages
  Ready,
  /// Install failed; the previous generation stays in charge
  Redundant,
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  pub fn phase(&self) -> Result<Phase, WorkerError> {
    self
      .phase
      .lock()
      .map(|phase| *phase)
      .map_err(|_| WorkerError::Poisoned)
  }

  fn set_phase(&self, phase: Phase) -> Result<(), WorkerError> {
    let mut current = self.phase.lock().map_err(|_| WorkerError::Poisoned)?;
    *current = phase;
    Ok(())
  }

  fn transition(&self, event: &'static str, from: Phase, to: Phase) -> Result<(), WorkerError> {
    let mut current = self.phase.lock().map_err(|_| WorkerError::Poisoned)?;
    if *current != from {
      return Err(WorkerError::InvalidTransition {
        event,
        phase: *current,
      });
    }
    *current = to;
    Ok(())
  }

  /// Seed the asset cache with the precache list.
  ///
  /// All-or-nothing: on any failure nothing is written and the controller
  /// becomes redundant.
  pub async fn install(&self) -> Result<usize, WorkerError> {
    self.transition("install", Phase::Parsed, Phase::Installing)?;
    info!(
      cache = %self.assets.cache_name(),
      seeds = self.config.precache.len(),
      "Installing"
    );

    match self.assets.seed(&self.config.precache).await {
      Ok(seeded) => {
        self.set_phase(Phase::Installed)?;
        Ok(seeded)
      }
      Err(e) => {
        error!(error = %e, "Install failed, previous generation stays active");
        self.set_phase(Phase::Redundant)?;
        Err(e)
      }
    }
  }

  /// Purge every cache except the current asset generation and the
  /// submission queue, then take control of pages.
  pub fn activate(&self) -> Result<Vec<String>, WorkerError> {
    self.transition("activate", Phase::Installed, Phase::Activating)?;

    match self.purge_generations() {
      Ok(purged) => {
        self.set_phase(Phase::Ready)?;
        info!(cache = %self.config.asset_cache, purged = purged.len(), "Activated");
        Ok(purged)
      }
      Err(e) => {
        self.set_phase(Phase::Installed)?;
        Err(e)
      }
    }
  }

  fn purge_generations(&self) -> Result<Vec<String>, WorkerError> {
    let mut purged = Vec::new();
    for name in self.storage.cache_names()? {
      if name == self.config.asset_cache || name == self.config.submission_cache {
        continue;
      }
      if self.storage.delete_cache(&name)? {
        info!(cache = %name, "Deleted old cache");
        purged.push(name);
      }
    }
    Ok(purged)
  }

  /// Pick up an installed generation after a host restart.
  ///
  /// Activation may not have finished before the previous process exited, so
  /// older generations are purged again before taking control. Returns false
  /// when the current generation was never installed.
  pub fn resume(&self) -> Result<bool, WorkerError> {
    if !self.storage.has_cache(&self.config.asset_cache)? {
      return Ok(false);
    }
    self.transition("resume", Phase::Parsed, Phase::Activating)?;

    match self.purge_generations() {
      Ok(purged) => {
        self.set_phase(Phase::Ready)?;
        info!(cache = %self.config.asset_cache, purged = purged.len(), "Resumed");
        Ok(true)
      }
      Err(e) => {
        self.set_phase(Phase::Parsed)?;
        Err(e)
      }
    }
  }
}
