//! Capacity-bounded history stack.

use std::collections::VecDeque;

/// Stack backed by a ring buffer. Pushing onto a full stack evicts the
/// oldest entry and hands it back to the caller.
#[derive(Debug)]
pub struct HistoryStack<T> {
  items: VecDeque<T>,
  capacity: usize,
}

impl<T> HistoryStack<T> {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      items: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Pushes `item` on top, returning the evicted bottom entry if full.
  #[must_use = "an evicted entry must be released"]
  pub fn push(&mut self, item: T) -> Option<T> {
    let evicted = if self.items.len() == self.capacity {
      self.items.pop_front()
    } else {
      None
    };
    self.items.push_back(item);
    evicted
  }

  /// Pops the most recent entry.
  pub fn pop(&mut self) -> Option<T> {
    self.items.pop_back()
  }

  pub fn peek(&self) -> Option<&T> {
    self.items.back()
  }

  /// Removes every entry, most recent first.
  pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
    self.items.drain(..).rev()
  }

  /// Changes the capacity, returning the oldest entries that no longer fit.
  #[must_use = "evicted entries must be released"]
  pub fn set_capacity(&mut self, capacity: usize) -> Vec<T> {
    self.capacity = capacity.max(1);
    let excess = self.items.len().saturating_sub(self.capacity);
    self.items.drain(..excess).collect()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lifo_order() {
    let mut stack = HistoryStack::new(3);
    assert!(stack.push(1).is_none());
    assert!(stack.push(2).is_none());
    assert_eq!(stack.peek(), Some(&2));
    assert_eq!(stack.pop(), Some(2));
    assert_eq!(stack.pop(), Some(1));
    assert_eq!(stack.pop(), None);
  }

  #[test]
  fn full_stack_evicts_oldest() {
    let mut stack = HistoryStack::new(2);
    assert!(stack.push('a').is_none());
    assert!(stack.push('b').is_none());
    assert_eq!(stack.push('c'), Some('a'));
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.drain().collect::<Vec<_>>(), vec!['c', 'b']);
    assert!(stack.is_empty());
  }

  #[test]
  fn shrinking_returns_oldest() {
    let mut stack = HistoryStack::new(5);
    for i in 0..5 {
      let _ = stack.push(i);
    }
    assert_eq!(stack.set_capacity(2), vec![0, 1, 2]);
    assert_eq!(stack.pop(), Some(4));
    assert_eq!(stack.capacity(), 2);
  }
}
