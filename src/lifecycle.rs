//! Worker lifecycle state.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::debug;

/// Where this worker generation is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, install not started
  #[default]
  Parsed,
  /// Pre-populating the store
  Installing,
  /// Installed and waiting to replace the active version
  Installed,
  /// Evicting stale stores and claiming clients
  Activating,
  /// Active; fetches are intercepted
  Activated,
  /// Unusable; only reported when the state itself cannot be read
  Redundant,
}

#[derive(Debug, Default)]
struct Inner {
  state: WorkerState,
  skip_waiting: bool,
}

/// Lifecycle state machine shared by every task of one worker.
#[derive(Debug, Default)]
pub struct Lifecycle {
  inner: Mutex<Inner>,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> WorkerState {
    self.lock().map(|inner| inner.state).unwrap_or(WorkerState::Redundant)
  }

  pub fn is_active(&self) -> bool {
    self.state() == WorkerState::Activated
  }

  /// Parsed -> Installing. Returns false when install already ran.
  pub fn begin_install(&self) -> Result<bool> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)
  }

  /// Installing -> Installed.
  pub fn finish_install(&self) -> Result<bool> {
    self.transition(WorkerState::Installing, WorkerState::Installed)
  }

  /// Ask to be promoted without waiting for clients of the active version
  /// to go away. Returns true if the worker is waiting and should activate
  /// now; otherwise activation happens as soon as install finishes.
  pub fn skip_waiting(&self) -> Result<bool> {
    let mut inner = self.lock()?;
    inner.skip_waiting = true;
    Ok(inner.state == WorkerState::Installed)
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.lock().map(|inner| inner.skip_waiting).unwrap_or(false)
  }

  /// Installed -> Activating. Returns false when not waiting.
  pub fn begin_activate(&self) -> Result<bool> {
    self.transition(WorkerState::Installed, WorkerState::Activating)
  }

  /// Activating -> Activated.
  pub fn finish_activate(&self) -> Result<bool> {
    self.transition(WorkerState::Activating, WorkerState::Activated)
  }

  /// Parsed -> Activating, for a generation whose store was fully installed
  /// before the host restarted. Returns false once install has started.
  pub fn resume(&self) -> Result<bool> {
    self.transition(WorkerState::Parsed, WorkerState::Activating)
  }

  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<bool> {
    let mut inner = self.lock()?;
    if inner.state != from {
      debug!(state = ?inner.state, wanted = ?from, "Ignoring lifecycle transition");
      return Ok(false);
    }
    debug!(?from, ?to, "Lifecycle transition");
    inner.state = to;
    Ok(true)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}
