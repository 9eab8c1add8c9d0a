//! Streaming statistics.

use std::fmt;

use crate::scheduling::SchedulerStats;

/// What one `update` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
  /// Partitions moved `Active → Passivating`.
  pub passivations_started: usize,
  /// Partitions moved `Free → Activating`.
  pub activations_started: usize,
  /// Completions folded back from workers.
  pub completions_applied: usize,
  /// Completions that reported a hook failure.
  pub failures: usize,
  /// Active partitions and clusters examined by the passivation search.
  pub passivation_examined: usize,
  /// Positions examined by the activation search.
  pub activation_examined: usize,
}

/// Snapshot of a manager's state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamStats {
  pub ticks: u64,
  pub activating: usize,
  pub active: usize,
  pub passivating: usize,
  pub failed: usize,
  /// Clusters holding at least one active partition.
  pub clusters: usize,
  /// Partitions alive in the pool's accounting (free or in use).
  pub pool_total: usize,
  pub pool_free: usize,
  pub activation: SchedulerStats,
  pub passivation: SchedulerStats,
  pub activations_total: u64,
  pub passivations_total: u64,
  pub hook_failures_total: u64,
  pub last_tick: TickSummary,
}

impl StreamStats {
  /// Non-free partitions.
  pub fn live(&self) -> usize {
    self.activating + self.active + self.passivating + self.failed
  }

  /// Returns true if no background work is queued or running.
  pub fn is_idle(&self) -> bool {
    self.activating == 0
      && self.passivating == 0
      && self.activation.queued == 0
      && self.passivation.queued == 0
  }
}

impl fmt::Display for StreamStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "tick {}: {} active, {} activating, {} passivating, {} failed | pool {}/{} free | \
       tasks act {}+{} pas {}+{} | {:.2} ms/act",
      self.ticks,
      self.active,
      self.activating,
      self.passivating,
      self.failed,
      self.pool_free,
      self.pool_total,
      self.activation.active_slots,
      self.activation.queued,
      self.passivation.active_slots,
      self.passivation.queued,
      self.activation.mean_task_ms,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn live_counts_every_non_free_state() {
    let stats = StreamStats {
      activating: 1,
      active: 5,
      passivating: 2,
      failed: 1,
      ..Default::default()
    };
    assert_eq!(stats.live(), 9);
    assert!(!stats.is_idle());
  }

  #[test]
  fn display_is_single_line() {
    let text = StreamStats::default().to_string();
    assert!(text.starts_with("tick 0:"));
    assert!(!text.contains('\n'));
  }
}
