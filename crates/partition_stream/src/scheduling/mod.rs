//! Slot-based bounded-concurrency task scheduling.
//!
//! [`TaskScheduler`] keeps an unbounded FIFO of queued tasks and, once per
//! tick, dispatches as many of them as free concurrency allows. Each
//! dispatched task holds a slot; the worker returns the slot when the task
//! body finishes, whether it succeeded or panicked.
//!
//! Dispatch order follows `enqueue` order. Completion order across tasks is
//! unspecified.

mod executor;
mod slot;

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

pub use executor::Executor;
use slot::{SharedSlots, Slot, SlotGuard};

/// Unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Snapshot of a scheduler's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SchedulerStats {
  pub concurrency_level: usize,
  pub queued: usize,
  pub active_slots: usize,
  pub free_slots: usize,
  pub allocated_slots: usize,
  pub dispatched_total: u64,
  pub completed_total: u64,
  pub panicked_total: u64,
  /// Mean wall time of completed tasks, in milliseconds.
  pub mean_task_ms: f64,
}

/// Bounded-concurrency queue of background tasks.
pub struct TaskScheduler {
  name: Arc<str>,
  queue: VecDeque<Task>,
  concurrency_level: usize,
  slots: Arc<SharedSlots>,
  executor: Executor,
  dispatched_total: u64,
}

impl TaskScheduler {
  /// Creates a scheduler running at most `concurrency_level` tasks at once.
  pub fn new(name: &str, concurrency_level: usize, executor: Executor) -> Self {
    Self {
      name: Arc::from(name),
      queue: VecDeque::new(),
      concurrency_level: concurrency_level.max(1),
      slots: SharedSlots::new(),
      executor,
      dispatched_total: 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn executor(&self) -> &Executor {
    &self.executor
  }

  /// Appends a task to the queue. It is dispatched on a later `update`.
  pub fn enqueue(&mut self, task: impl FnOnce() + Send + 'static) {
    self.queue.push_back(Box::new(task));
  }

  /// Discards every queued task that has not been dispatched yet.
  ///
  /// Returns the number of discarded tasks. Dispatched tasks keep running.
  pub fn clear(&mut self) -> usize {
    let n = self.queue.len();
    self.queue.clear();
    n
  }

  /// Changes the concurrency level. Takes effect on the next `update`.
  pub fn set_concurrency_level(&mut self, level: usize) {
    self.concurrency_level = level.max(1);
  }

  pub fn concurrency_level(&self) -> usize {
    self.concurrency_level
  }

  pub fn queued_len(&self) -> usize {
    self.queue.len()
  }

  pub fn active_slot_count(&self) -> usize {
    self.slots.lock().active
  }

  pub fn free_slot_count(&self) -> usize {
    self.slots.lock().free.len()
  }

  /// Returns true if nothing is queued or running.
  pub fn is_idle(&self) -> bool {
    self.queue.is_empty() && self.slots.lock().active == 0
  }

  /// Trims excess free slots, then dispatches queued tasks while slots are
  /// available.
  ///
  /// Returns the number of tasks dispatched.
  #[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
  pub fn update(&mut self) -> usize {
    self.trim_free_slots();

    let mut dispatched = 0;
    loop {
      let mut book = self.slots.lock();
      if book.active >= self.concurrency_level {
        break;
      }
      let Some(task) = self.queue.pop_front() else {
        break;
      };
      let slot = match book.free.pop() {
        Some(slot) => slot,
        None => {
          let index = book.allocated;
          book.allocated += 1;
          Slot { index }
        }
      };
      book.active += 1;
      drop(book);

      let guard = SlotGuard::new(slot, self.slots.clone());
      let name = self.name.clone();
      self.executor.execute(move || run_task(&name, task, guard));
      self.dispatched_total += 1;
      dispatched += 1;
    }
    dispatched
  }

  /// Blocks until some running task releases its slot, or `timeout` elapses.
  pub fn wait_for_release(&self, timeout: Duration) {
    self.slots.wait_release(timeout);
  }

  /// Dispatches and waits until the queue is empty and no task is running.
  pub fn drain(&mut self) {
    loop {
      self.update();
      if self.is_idle() {
        return;
      }
      self.wait_for_release(Duration::from_millis(10));
    }
  }

  pub fn stats(&self) -> SchedulerStats {
    let book = self.slots.lock();
    let mean_task_ms = if book.completed_total == 0 {
      0.0
    } else {
      book.busy_time.as_secs_f64() * 1000.0 / book.completed_total as f64
    };
    SchedulerStats {
      concurrency_level: self.concurrency_level,
      queued: self.queue.len(),
      active_slots: book.active,
      free_slots: book.free.len(),
      allocated_slots: book.allocated,
      dispatched_total: self.dispatched_total,
      completed_total: book.completed_total,
      panicked_total: book.panicked_total,
      mean_task_ms,
    }
  }

  fn trim_free_slots(&mut self) {
    let mut book = self.slots.lock();
    let keep = self.concurrency_level.saturating_sub(book.active);
    if book.free.len() > keep {
      let excess = book.free.len() - keep;
      book.free.truncate(keep);
      book.allocated -= excess;
      log::debug!("{}: trimmed {} free slots", self.name, excess);
    }
  }
}

/// Runs a task body, converting a panic into a logged failure.
///
/// The guard is dropped afterwards in every case, releasing the slot.
fn run_task(name: &str, task: Task, mut guard: SlotGuard) {
  if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
    guard.mark_panicked();
    log::error!(
      "{}: task on slot {} panicked: {}",
      name,
      guard.slot_index(),
      panic_message(payload.as_ref())
    );
  }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
