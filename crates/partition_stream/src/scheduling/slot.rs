//! Scheduler slots.
//!
//! A slot binds one dispatched task to one background execution unit. Slots
//! are recycled through a free list, the same way pooled objects are. The
//! free list lives behind a mutex because the worker that finishes a task
//! returns its slot from its own thread.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use web_time::Instant;

/// Recyclable binding between a task and an execution unit.
#[derive(Debug)]
pub(crate) struct Slot {
  /// Stable index, for logging.
  pub index: usize,
}

/// Slot bookkeeping shared between the scheduler and its workers.
#[derive(Debug, Default)]
pub(crate) struct SlotBook {
  pub free: Vec<Slot>,
  pub active: usize,
  pub allocated: usize,
  pub completed_total: u64,
  pub panicked_total: u64,
  pub busy_time: Duration,
}

/// Shared handle to the slot book plus a condition variable signalled on
/// every slot release.
#[derive(Debug, Default)]
pub(crate) struct SharedSlots {
  book: Mutex<SlotBook>,
  released: Condvar,
}

impl SharedSlots {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Locks the book, ignoring poisoning (the book holds only counters).
  pub fn lock(&self) -> MutexGuard<'_, SlotBook> {
    self.book.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Blocks until a slot is released or `timeout` elapses.
  ///
  /// Returns immediately if no slot is active.
  pub fn wait_release(&self, timeout: Duration) {
    let book = self.lock();
    if book.active == 0 {
      return;
    }
    let _ = self
      .released
      .wait_timeout(book, timeout)
      .unwrap_or_else(PoisonError::into_inner);
  }

  fn notify(&self) {
    self.released.notify_all();
  }
}

/// Returns its slot to the free list when dropped.
///
/// Moved into the dispatched task, so the slot is reclaimed even when the
/// task body fails.
pub(crate) struct SlotGuard {
  slot: Option<Slot>,
  shared: Arc<SharedSlots>,
  started: Instant,
  panicked: bool,
}

impl SlotGuard {
  pub fn new(slot: Slot, shared: Arc<SharedSlots>) -> Self {
    Self {
      slot: Some(slot),
      shared,
      started: Instant::now(),
      panicked: false,
    }
  }

  pub fn slot_index(&self) -> usize {
    self.slot.as_ref().map_or(usize::MAX, |s| s.index)
  }

  pub fn mark_panicked(&mut self) {
    self.panicked = true;
  }
}

impl Drop for SlotGuard {
  fn drop(&mut self) {
    let Some(slot) = self.slot.take() else {
      return;
    };
    {
      let mut book = self.shared.lock();
      book.active = book.active.saturating_sub(1);
      book.completed_total += 1;
      if self.panicked {
        book.panicked_total += 1;
      }
      book.busy_time += self.started.elapsed();
      book.free.push(slot);
    }
    self.shared.notify();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dropping_guard_frees_slot() {
    let shared = SharedSlots::new();
    {
      let mut book = shared.lock();
      book.active = 1;
      book.allocated = 1;
    }
    let guard = SlotGuard::new(Slot { index: 0 }, shared.clone());
    assert_eq!(guard.slot_index(), 0);
    drop(guard);

    let book = shared.lock();
    assert_eq!(book.active, 0);
    assert_eq!(book.free.len(), 1);
    assert_eq!(book.completed_total, 1);
    assert_eq!(book.panicked_total, 0);
  }

  #[test]
  fn panicked_guard_is_counted() {
    let shared = SharedSlots::new();
    shared.lock().active = 1;
    let mut guard = SlotGuard::new(Slot { index: 3 }, shared.clone());
    guard.mark_panicked();
    drop(guard);
    assert_eq!(shared.lock().panicked_total, 1);
  }

  #[test]
  fn wait_release_returns_when_idle() {
    let shared = SharedSlots::new();
    // No active slots: must not block for the full timeout.
    let start = Instant::now();
    shared.wait_release(Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(1));
  }
}
