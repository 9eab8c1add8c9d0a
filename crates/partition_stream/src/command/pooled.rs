//! Pooled command objects.
//!
//! Commands are small and created at input rate, so they are recycled
//! through a [`Pool`] shared behind a mutex: any thread may acquire one and
//! submit it, while release happens on the thread that applies commands.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::pool::Pool;

/// Object that can be cleared and reused.
pub trait Recyclable: Default + Send + 'static {
  /// Clears per-use state before the instance returns to its pool.
  ///
  /// Must drop any handle to the pool itself, or free instances keep the
  /// pool alive.
  fn reset(&mut self);
}

/// Thread-safe pool of boxed commands.
pub struct CommandPool<T> {
  inner: Arc<Mutex<Pool<Box<T>>>>,
}

impl<T> Clone for CommandPool<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T: Recyclable> CommandPool<T> {
  /// Creates a pool keeping at most `max_capacity` free commands
  /// (0 = unbounded).
  pub fn new(max_capacity: usize) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Pool::with_max_capacity(
        Box::<T>::default,
        max_capacity,
      ))),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Pool<Box<T>>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn acquire(&self) -> Box<T> {
    self.lock().acquire()
  }

  /// Resets `item` and returns it to the free list.
  ///
  /// Returns false if the free list was full and the command was dropped.
  pub fn release(&self, mut item: Box<T>) -> bool {
    item.reset();
    self.lock().release(item)
  }

  pub fn free_count(&self) -> usize {
    self.lock().free_count()
  }

  pub fn total_object_count(&self) -> usize {
    self.lock().total_object_count()
  }

  pub fn in_use_count(&self) -> usize {
    self.lock().in_use_count()
  }
}
