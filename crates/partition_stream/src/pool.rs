//! Bounded object reuse.
//!
//! [`Pool`] hands out free instances or builds new ones through a factory,
//! and takes instances back unless that would grow the free list past
//! `max_capacity`.
//!
//! The pool is not synchronized. Its owner serializes access: the partition
//! manager only touches it from its own update thread, and
//! [`CommandPool`](crate::command::CommandPool) wraps it in a mutex.

/// Factory used to build new pool instances on demand.
pub type PoolFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Generic pool of reusable objects.
pub struct Pool<T> {
  /// Instances available for reuse.
  free: Vec<T>,
  /// Builds a new instance when the free list is empty.
  factory: PoolFactory<T>,
  /// Maximum free-list length (0 = unbounded).
  max_capacity: usize,
  /// Instances constructed and not dropped by the capacity check.
  total_object_count: usize,
}

impl<T> Pool<T> {
  /// Creates an unbounded pool.
  pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
    Self::with_max_capacity(factory, 0)
  }

  /// Creates a pool whose free list never exceeds `max_capacity` entries.
  ///
  /// A `max_capacity` of 0 means unbounded.
  pub fn with_max_capacity(
    factory: impl Fn() -> T + Send + Sync + 'static,
    max_capacity: usize,
  ) -> Self {
    Self {
      free: Vec::new(),
      factory: Box::new(factory),
      max_capacity,
      total_object_count: 0,
    }
  }

  /// Constructs instances until `count` are free (bounded by `max_capacity`).
  pub fn prewarm(&mut self, count: usize) {
    let target = if self.max_capacity == 0 {
      count
    } else {
      count.min(self.max_capacity)
    };
    while self.free.len() < target {
      self.free.push((self.factory)());
      self.total_object_count += 1;
    }
  }

  /// Takes a free instance, or constructs a new one.
  pub fn acquire(&mut self) -> T {
    match self.free.pop() {
      Some(item) => item,
      None => {
        self.total_object_count += 1;
        (self.factory)()
      }
    }
  }

  /// Returns an instance to the free list.
  ///
  /// Returns false if the free list is at `max_capacity`; the instance is
  /// dropped and no longer counted.
  pub fn release(&mut self, item: T) -> bool {
    if self.max_capacity != 0 && self.free.len() >= self.max_capacity {
      self.total_object_count = self.total_object_count.saturating_sub(1);
      drop(item);
      return false;
    }
    self.free.push(item);
    true
  }

  /// Changes the free-list bound, dropping excess free instances.
  pub fn set_max_capacity(&mut self, max_capacity: usize) {
    self.max_capacity = max_capacity;
    if max_capacity != 0 && self.free.len() > max_capacity {
      let excess = self.free.len() - max_capacity;
      self.free.truncate(max_capacity);
      self.total_object_count = self.total_object_count.saturating_sub(excess);
    }
  }

  pub fn max_capacity(&self) -> usize {
    self.max_capacity
  }

  /// Instances constructed and still alive (free or in use).
  pub fn total_object_count(&self) -> usize {
    self.total_object_count
  }

  /// Instances sitting in the free list.
  pub fn free_count(&self) -> usize {
    self.free.len()
  }

  /// Instances currently handed out.
  pub fn in_use_count(&self) -> usize {
    self.total_object_count.saturating_sub(self.free.len())
  }
}

impl<T: Default + 'static> Default for Pool<T> {
  fn default() -> Self {
    Self::new(T::default)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[derive(Debug, PartialEq)]
  struct Tagged(usize);

  fn counting_pool(max_capacity: usize) -> (Pool<Tagged>, Arc<AtomicUsize>) {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let pool = Pool::with_max_capacity(
      move || Tagged(counter.fetch_add(1, Ordering::Relaxed)),
      max_capacity,
    );
    (pool, built)
  }

  #[test]
  fn acquire_constructs_when_empty() {
    let (mut pool, built) = counting_pool(0);
    let a = pool.acquire();
    let b = pool.acquire();
    assert_ne!(a, b);
    assert_eq!(built.load(Ordering::Relaxed), 2);
    assert_eq!(pool.total_object_count(), 2);
    assert_eq!(pool.in_use_count(), 2);
    assert_eq!(pool.free_count(), 0);
  }

  #[test]
  fn released_instance_is_reused() {
    let (mut pool, built) = counting_pool(0);
    let a = pool.acquire();
    assert!(pool.release(a));
    let again = pool.acquire();
    assert_eq!(again, Tagged(0));
    assert_eq!(built.load(Ordering::Relaxed), 1);
  }

  #[test]
  fn release_beyond_capacity_drops_instance() {
    let (mut pool, _) = counting_pool(1);
    let a = pool.acquire();
    let b = pool.acquire();
    assert!(pool.release(a));
    assert!(!pool.release(b));
    assert_eq!(pool.free_count(), 1);
    assert_eq!(pool.total_object_count(), 1);
  }

  #[test]
  fn total_only_grows_without_trimming() {
    let (mut pool, _) = counting_pool(0);
    let mut last = 0;
    for round in 0..5 {
      let items: Vec<_> = (0..round + 1).map(|_| pool.acquire()).collect();
      assert!(pool.total_object_count() >= last);
      last = pool.total_object_count();
      for item in items {
        pool.release(item);
      }
    }
    assert_eq!(pool.total_object_count(), 5);
  }

  #[test]
  fn lowering_capacity_trims_free_list() {
    let (mut pool, _) = counting_pool(0);
    pool.prewarm(6);
    assert_eq!(pool.free_count(), 6);
    pool.set_max_capacity(2);
    assert_eq!(pool.free_count(), 2);
    assert_eq!(pool.total_object_count(), 2);
  }

  #[test]
  fn acquired_instances_are_distinct_until_released() {
    let (mut pool, _) = counting_pool(0);
    pool.prewarm(3);
    let held: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
    let fresh = pool.acquire();
    assert!(!held.contains(&fresh));
  }
}
