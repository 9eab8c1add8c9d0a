//! Single-partition lifecycle.
//!
//! A [`Partition`] moves through
//! `Free` → `Activating` → `Active` → `Passivating` → `Free`,
//! with `Failed` as a parking state for partitions whose hook failed.
//! Domain behaviour plugs in through [`PartitionHooks`], implemented by the
//! payload type; the state machine itself is shared by every payload.

use std::panic::{self, AssertUnwindSafe};

use crate::coords::GridPosition;
use crate::scheduling::panic_message;

/// Lifecycle state of a partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PartitionState {
  /// In the pool, no position bound.
  #[default]
  Free,
  /// Position bound, activation work queued or running.
  Activating,
  /// Fully activated; visible to consumers.
  Active,
  /// Passivation work queued or running.
  Passivating,
  /// An activation or passivation hook failed. The partition stays parked at
  /// its position until the manager is told to recover it.
  Failed,
}

impl PartitionState {
  /// Returns true for every state except `Free`.
  pub fn is_live(self) -> bool {
    self != Self::Free
  }
}

/// Per-kind behaviour of a partition payload.
///
/// `activate` and `passivate` run on a background worker and may block.
/// They only receive the payload, never the manager's bookkeeping.
pub trait PartitionHooks: Send + 'static {
  /// One-time setup, called the first time the instance leaves the pool.
  fn initialize(&mut self) {}

  /// Loads or builds the content for `pos`.
  fn activate(&mut self, pos: GridPosition) -> Result<(), HookError>;

  /// Tears down the content for `pos`.
  fn passivate(&mut self, pos: GridPosition) -> Result<(), HookError>;
}

/// A pooled partition and its payload.
#[derive(Debug)]
pub struct Partition<P> {
  position: Option<GridPosition>,
  state: PartitionState,
  activation_completed: bool,
  initialized: bool,
  /// Derived state (mesh, light) needs a rebuild.
  dirty: bool,
  /// Completed activations over the instance's lifetime.
  activations: u64,
  payload: P,
}

impl<P: PartitionHooks> Partition<P> {
  pub fn new(payload: P) -> Self {
    Self {
      position: None,
      state: PartitionState::Free,
      activation_completed: false,
      initialized: false,
      dirty: false,
      activations: 0,
      payload,
    }
  }

  /// Grid position, or `None` while in the pool.
  pub fn position(&self) -> Option<GridPosition> {
    self.position
  }

  pub fn state(&self) -> PartitionState {
    self.state
  }

  /// False until background activation finished. Consumers must check this
  /// before reading content.
  pub fn is_activation_completed(&self) -> bool {
    self.activation_completed
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  /// Number of completed activations over this instance's lifetime.
  pub fn activations(&self) -> u64 {
    self.activations
  }

  pub fn payload(&self) -> &P {
    &self.payload
  }

  pub fn payload_mut(&mut self) -> &mut P {
    &mut self.payload
  }

  // === Transitions (manager thread) ===

  /// `Free → Activating`: binds a position and runs one-time setup.
  pub(crate) fn assign(&mut self, pos: GridPosition) {
    debug_assert_eq!(self.state, PartitionState::Free, "assign on live partition");
    self.position = Some(pos);
    self.state = PartitionState::Activating;
    self.activation_completed = false;
    self.dirty = false;
    if !self.initialized {
      self.payload.initialize();
      self.initialized = true;
    }
  }

  /// `Activating → Active`.
  pub(crate) fn complete_activation(&mut self) {
    debug_assert_eq!(self.state, PartitionState::Activating);
    self.state = PartitionState::Active;
    self.activation_completed = true;
    self.dirty = true;
    self.activations += 1;
  }

  /// `Active → Passivating`.
  pub(crate) fn begin_passivation(&mut self) {
    debug_assert_eq!(self.state, PartitionState::Active);
    self.state = PartitionState::Passivating;
    self.activation_completed = false;
  }

  /// Any state → `Failed`.
  pub(crate) fn mark_failed(&mut self) {
    self.state = PartitionState::Failed;
    self.activation_completed = false;
  }

  /// `Passivating | Failed → Free`: clears the position before pooling.
  pub(crate) fn reset(&mut self) {
    self.position = None;
    self.state = PartitionState::Free;
    self.activation_completed = false;
    self.dirty = false;
  }

  pub(crate) fn set_dirty(&mut self, dirty: bool) {
    self.dirty = dirty;
  }

  // === Hooks (worker thread) ===

  pub(crate) fn run_activate(&mut self) -> Result<(), HookError> {
    let pos = self.position.ok_or(HookError::Unassigned)?;
    let payload = &mut self.payload;
    guarded(move || payload.activate(pos))
  }

  pub(crate) fn run_passivate(&mut self) -> Result<(), HookError> {
    let pos = self.position.ok_or(HookError::Unassigned)?;
    let payload = &mut self.payload;
    guarded(move || payload.passivate(pos))
  }
}

/// Runs a hook, turning a panic into [`HookError::Panicked`].
fn guarded(hook: impl FnOnce() -> Result<(), HookError>) -> Result<(), HookError> {
  match panic::catch_unwind(AssertUnwindSafe(hook)) {
    Ok(result) => result,
    Err(payload) => Err(HookError::Panicked(panic_message(payload.as_ref()))),
  }
}

/// Failure of an activation or passivation hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
  /// The hook reported an error.
  Failed(String),
  /// The hook panicked.
  Panicked(String),
  /// The hook ran on a partition with no position.
  Unassigned,
}

impl HookError {
  pub fn failed(msg: impl Into<String>) -> Self {
    Self::Failed(msg.into())
  }
}

impl std::fmt::Display for HookError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Failed(msg) => write!(f, "hook failed: {}", msg),
      Self::Panicked(msg) => write!(f, "hook panicked: {}", msg),
      Self::Unassigned => write!(f, "hook ran on a partition without a position"),
    }
  }
}

impl std::error::Error for HookError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Default)]
  struct Tracker {
    initialized: u32,
    activated: Vec<GridPosition>,
    fail_passivate: bool,
  }

  impl PartitionHooks for Tracker {
    fn initialize(&mut self) {
      self.initialized += 1;
    }

    fn activate(&mut self, pos: GridPosition) -> Result<(), HookError> {
      self.activated.push(pos);
      Ok(())
    }

    fn passivate(&mut self, _pos: GridPosition) -> Result<(), HookError> {
      if self.fail_passivate {
        return Err(HookError::failed("disk full"));
      }
      Ok(())
    }
  }

  struct Exploding;

  impl PartitionHooks for Exploding {
    fn activate(&mut self, _pos: GridPosition) -> Result<(), HookError> {
      panic!("generator crashed");
    }

    fn passivate(&mut self, _pos: GridPosition) -> Result<(), HookError> {
      Ok(())
    }
  }

  #[test]
  fn full_cycle() {
    let pos = GridPosition::new(1, 2, 3);
    let mut p = Partition::new(Tracker::default());
    assert_eq!(p.state(), PartitionState::Free);

    p.assign(pos);
    assert_eq!(p.state(), PartitionState::Activating);
    assert_eq!(p.position(), Some(pos));
    assert!(!p.is_activation_completed());

    p.run_activate().unwrap();
    p.complete_activation();
    assert_eq!(p.state(), PartitionState::Active);
    assert!(p.is_activation_completed());
    assert!(p.is_dirty());

    p.begin_passivation();
    assert!(!p.is_activation_completed());
    p.run_passivate().unwrap();
    p.reset();
    assert_eq!(p.state(), PartitionState::Free);
    assert_eq!(p.position(), None);
    assert_eq!(p.payload().activated, vec![pos]);
  }

  #[test]
  fn initialize_runs_once_per_instance() {
    let mut p = Partition::new(Tracker::default());
    for i in 0..3 {
      p.assign(GridPosition::new(i, 0, 0));
      p.complete_activation();
      p.begin_passivation();
      p.reset();
    }
    assert_eq!(p.payload().initialized, 1);
    assert_eq!(p.activations(), 3);
  }

  #[test]
  fn hook_error_is_returned() {
    let mut p = Partition::new(Tracker {
      fail_passivate: true,
      ..Default::default()
    });
    p.assign(GridPosition::ORIGIN);
    p.complete_activation();
    p.begin_passivation();
    assert_eq!(p.run_passivate(), Err(HookError::failed("disk full")));
  }

  #[test]
  fn hook_panic_is_caught() {
    let mut p = Partition::new(Exploding);
    p.assign(GridPosition::ORIGIN);
    let err = p.run_activate().unwrap_err();
    assert_eq!(err, HookError::Panicked("generator crashed".to_string()));
  }

  #[test]
  fn unassigned_hook_is_rejected() {
    let mut p = Partition::new(Exploding);
    assert_eq!(p.run_activate(), Err(HookError::Unassigned));
  }
}
